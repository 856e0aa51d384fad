//! [`CockpitServer`] – websocket endpoint for the operator interface.
//!
//! Listens on `0.0.0.0:5000` (configurable via [`CockpitServer::with_addr`])
//! and accepts websocket upgrades on [`WS_PATH`] only.  Any other path is
//! refused with `404 Not Found` during the handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use basestation_middleware::{Connection, Dispatcher, FanoutQueue, LoopFailure, TransportError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

/// Default TCP port of the websocket endpoint.
pub const DEFAULT_PORT: u16 = 5000;

/// The only path that accepts websocket upgrades.
pub const WS_PATH: &str = "/api/ws";

/// Text payload a client sends to ask the server to close the connection.
pub const CLOSE_COMMAND: &str = "close";

/// How long a client may take to complete the websocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest ping period a session will use.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Per-connection liveness check.
///
/// The server pings every `interval`; a connection that has not answered
/// with a pong for `interval + timeout` is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_millis(1500),
        }
    }
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Websocket server bridging operator clients to the gateway.
///
/// Outbound traffic comes from the [`FanoutQueue`]: each accepted connection
/// is attached to it and drains its own outbox.  Inbound text frames go to
/// the shared [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct CockpitServer {
    dispatcher: Arc<Dispatcher>,
    fanout: FanoutQueue,
    addr: SocketAddr,
    heartbeat: Heartbeat,
    handshake_timeout: Duration,
}

impl CockpitServer {
    /// Create a server on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(dispatcher: Arc<Dispatcher>, fanout: FanoutQueue) -> Self {
        Self {
            dispatcher,
            fanout,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            heartbeat: Heartbeat::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the listening address (builder-style).
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Override only the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    /// Bind the configured address and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`LoopFailure::Io`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), LoopFailure> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| LoopFailure::io(format!("bind websocket listener on {}", self.addr), e))?;
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener.  Accept errors are logged;
    /// each connection runs on its own task.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LoopFailure> {
        let local = listener.local_addr().map_err(|e| LoopFailure::io("websocket listener address", e))?;
        info!(addr = %local, path = WS_PATH, "websocket endpoint listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            warn!(%peer, error = %e, "websocket connection failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-connection session
    // -----------------------------------------------------------------------

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) -> Result<(), TransportError> {
        let ws_stream = tokio::time::timeout(self.handshake_timeout, accept_hdr_async(stream, check_path))
            .await
            .map_err(|_| TransportError::Handshake {
                peer,
                reason: format!("no upgrade within {:?}", self.handshake_timeout),
            })?
            .map_err(|e| TransportError::Handshake {
                peer,
                reason: e.to_string(),
            })?;

        let (connection, mut outbox) = Connection::channel(peer);
        self.fanout.attach(connection)?;
        info!(%peer, "websocket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let send_failed = |e: tokio_tungstenite::tungstenite::Error| TransportError::Send {
            peer,
            reason: e.to_string(),
        };
        let Heartbeat { interval, timeout } = self.heartbeat;
        let interval = interval.max(MIN_PING_INTERVAL);
        let deadline = interval.saturating_add(timeout);
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                // ── Downstream: fan-out queue → client ─────────────────────
                queued = outbox.recv() => {
                    match queued {
                        Ok(text) => ws_tx.send(Message::Text(text.into())).await.map_err(send_failed)?,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(%peer, missed, "client lagging; oldest frames dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                // ── Heartbeat ──────────────────────────────────────────────
                _ = ticker.tick() => {
                    if last_pong.elapsed() > deadline {
                        warn!(%peer, "heartbeat timed out; closing");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    ws_tx.send(Message::Ping(Vec::new().into())).await.map_err(send_failed)?;
                }
                // ── Upstream: client → dispatcher ──────────────────────────
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.as_str() == CLOSE_COMMAND {
                                info!(%peer, "client requested close");
                                let _ = ws_tx.close().await;
                                break;
                            }
                            match self.dispatcher.dispatch_text(text.as_str()) {
                                Ok(outcome) => debug!(
                                    %peer,
                                    tag = %outcome.tag,
                                    offered = outcome.offered,
                                    consumed = outcome.consumed_by.len(),
                                    "frame dispatched"
                                ),
                                Err(e) => warn!(%peer, error = %e, "inbound frame dropped"),
                            }
                        }
                        Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                        Some(Ok(Message::Ping(_))) => {
                            // The pong is queued by tungstenite; push it out.
                            ws_tx.flush().await.map_err(send_failed)?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            // Flushes the close reply tungstenite has queued.
                            let _ = ws_tx.close().await;
                            break;
                        }
                        None => break,
                        Some(Ok(other)) => {
                            warn!(%peer, len = other.len(), "non-text frame ignored");
                        }
                        Some(Err(e)) => {
                            warn!(%peer, error = %e, "websocket transport error");
                            break;
                        }
                    }
                }
            }
        }

        info!(%peer, "websocket disconnected");
        Ok(())
    }
}

/// Handshake callback: only [`WS_PATH`] may be upgraded.
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }
    let mut refusal = ErrorResponse::new(Some(format!(
        "no websocket endpoint at {}",
        request.uri().path()
    )));
    *refusal.status_mut() = StatusCode::NOT_FOUND;
    Err(refusal)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
