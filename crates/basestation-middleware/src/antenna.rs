//! Tracking-antenna side channel over UDP.
//!
//! Once per interval the sender loop emits one text datagram to the antenna
//! peer: the rover's latest position line, or an operator override.  An
//! override arrives as an `antenna` wire message:
//!
//! * `"!text"` – sticky: `text` is sent every tick until replaced;
//! * `"text"` – sent once on the next tick, then position lines resume.
//!
//! The listener loop decodes every datagram the antenna sends back as a bare
//! `antenna/feedback` data object and broadcasts it to the wire clients.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use basestation_types::{MessageSchema, TypedMessage, Value};
use serde_json::{Map, Value as Json};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::channel::ChannelHandler;
use crate::channels::Position;
use crate::codec;
use crate::error::{ChannelError, LoopFailure, RouteError};
use crate::fanout::FanoutQueue;

pub const DEFAULT_ANTENNA_PORT: u16 = 42069;

/// Default interval between two datagrams to the antenna.
pub const SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Shortest send period; a zero interval is raised to this.
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(1);

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Consecutive receive failures after which the listener gives up.
const MAX_RECV_FAILURES: u32 = 100;

/// Pause schedule between failed receives: doubles per consecutive failure,
/// capped at [`RECV_BACKOFF_MAX`].
#[derive(Debug, Default)]
struct RecvBackoff {
    failures: u32,
}

impl RecvBackoff {
    /// Record a failure.  `None` once the failure budget is spent.
    fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= MAX_RECV_FAILURES {
            return None;
        }
        let doublings = (self.failures - 1).min(7);
        Some((RECV_BACKOFF_MIN * (1 << doublings)).min(RECV_BACKOFF_MAX))
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

pub struct AntennaChannel {
    reset_schema: Arc<MessageSchema>,
    feedback_schema: Arc<MessageSchema>,
    fanout: FanoutQueue,
    position: Position,
    overwrite: Mutex<Option<String>>,
}

impl std::fmt::Debug for AntennaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntennaChannel")
            .field("overwrite", &self.overwrite)
            .finish_non_exhaustive()
    }
}

impl AntennaChannel {
    pub fn new(catalog: &Catalog, fanout: &FanoutQueue, position: Position) -> Self {
        Self {
            reset_schema: Arc::clone(&catalog.antenna_reset),
            feedback_schema: Arc::clone(&catalog.antenna_feedback),
            fanout: fanout.clone(),
            position,
            overwrite: Mutex::new(None),
        }
    }

    /// Payload of the next datagram, or `None` when there is nothing to send.
    pub fn next_frame(&self) -> Option<String> {
        let mut overwrite = self.overwrite.lock().unwrap_or_else(PoisonError::into_inner);
        let frame = match overwrite.take() {
            Some(text) => match text.strip_prefix('!') {
                Some(sticky) => {
                    let frame = sticky.to_string();
                    *overwrite = Some(text);
                    frame
                }
                None => text,
            },
            None => self.position.borrow().clone().unwrap_or_default(),
        };
        (!frame.is_empty()).then_some(frame)
    }

    /// Decode one datagram received from the antenna.
    pub fn ingest_datagram(&self, payload: &[u8]) -> Result<TypedMessage, RouteError> {
        let raw: Map<String, Json> =
            serde_json::from_slice(payload).map_err(|e| RouteError::Malformed(e.to_string()))?;
        Ok(codec::decode(&self.feedback_schema, &raw)?)
    }

    /// Send loop.  Send failures are logged; the loop itself never ends.
    pub async fn run_sender(
        self: Arc<Self>,
        peer: SocketAddr,
        interval: Duration,
    ) -> Result<(), LoopFailure> {
        info!(%peer, "antenna sender started");
        let mut ticker = tokio::time::interval(interval.max(MIN_SEND_INTERVAL));
        loop {
            ticker.tick().await;
            let Some(frame) = self.next_frame() else {
                continue;
            };
            match send_datagram(peer, frame.as_bytes()).await {
                Ok(_) => debug!(%peer, frame = %frame.trim_end(), "antenna datagram sent"),
                Err(e) => warn!(%peer, error = %e, "antenna datagram send failed"),
            }
        }
    }

    /// Bind `addr` and run the receive loop.
    ///
    /// # Errors
    ///
    /// Fails with [`LoopFailure::Io`] when the address cannot be bound.
    pub async fn run_listener(self: Arc<Self>, addr: SocketAddr) -> Result<(), LoopFailure> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| LoopFailure::io(format!("bind antenna listener on {addr}"), e))?;
        info!(%addr, "listening for antenna datagrams");
        self.listen(socket).await
    }

    /// Receive loop on an already bound socket.
    ///
    /// Bad datagrams are logged and dropped.  Receive errors back off and
    /// become fatal after `MAX_RECV_FAILURES` in a row.  Also returns when
    /// the fan-out queue is gone.
    pub async fn listen(&self, socket: UdpSocket) -> Result<(), LoopFailure> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let mut backoff = RecvBackoff::default();
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => {
                    backoff.reset();
                    received
                }
                Err(e) => match backoff.failed() {
                    Some(pause) => {
                        warn!(error = %e, ?pause, "antenna receive failed");
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    None => return Err(LoopFailure::io("receive antenna datagram", e)),
                },
            };
            match self.ingest_datagram(&buf[..len]) {
                Ok(msg) => {
                    debug!(%from, "antenna feedback received");
                    self.fanout.enqueue(codec::encode_text(&msg))?;
                }
                Err(e) => warn!(%from, error = %e, "antenna datagram dropped"),
            }
        }
    }
}

async fn send_datagram(peer: SocketAddr, payload: &[u8]) -> std::io::Result<usize> {
    let local: SocketAddr = if peer.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.send_to(payload, peer).await
}

impl ChannelHandler for AntennaChannel {
    fn name(&self) -> &str {
        "antenna"
    }

    fn inbound_schemas(&self) -> Vec<Arc<MessageSchema>> {
        vec![Arc::clone(&self.reset_schema)]
    }

    fn handle(&self, msg: &TypedMessage) -> Result<bool, ChannelError> {
        if !Arc::ptr_eq(msg.schema(), &self.reset_schema) {
            return Ok(false);
        }
        let Some(text) = msg.get("message").and_then(Value::as_str) else {
            return Ok(false);
        };
        info!(message = %text, "antenna override set");
        *self.overwrite.lock().unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
        Ok(true)
    }
}
