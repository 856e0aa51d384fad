//! Broadcast fan-out to every connected wire client.
//!
//! Producers (channel callbacks, the antenna listener, the websocket accept
//! path) hold a cloneable [`FanoutQueue`].  Exactly one [`DeliveryLoop`]
//! consumes the queue and owns the connection pool, so inserting and pruning
//! connections never races with a broadcast pass.

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LoopFailure, TransportError};

/// Per-connection outbox depth.  A client further behind than this loses its
/// oldest queued messages rather than stalling the others.
pub const OUTBOX_CAPACITY: usize = 256;

/// Receiving half of a connection's outbox.  A lagging session gets
/// [`broadcast::error::RecvError::Lagged`] and resumes at the oldest message
/// still queued.
pub type Outbox = broadcast::Receiver<String>;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One wire client as seen by the delivery loop: an id, its address and the
/// sending half of its outbox.  The session task owns the receiving half.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    peer: SocketAddr,
    outbox: broadcast::Sender<String>,
}

impl Connection {
    /// Create a connection and the receiver its session drains.
    pub fn channel(peer: SocketAddr) -> (Self, Outbox) {
        let (outbox, rx) = broadcast::channel(OUTBOX_CAPACITY);
        (
            Self {
                id: Uuid::new_v4(),
                peer,
                outbox,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Broadcast(String),
    Attach(Connection),
}

/// Producer handle of the fan-out queue.  Never blocks.
#[derive(Debug, Clone)]
pub struct FanoutQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl FanoutQueue {
    /// Create the queue and its single consumer.
    pub fn new() -> (Self, DeliveryLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            DeliveryLoop {
                rx,
                pool: Vec::new(),
            },
        )
    }

    /// Queue `text` for every connection.
    ///
    /// # Errors
    ///
    /// Returns [`LoopFailure::QueueClosed`] once the delivery loop is gone.
    pub fn enqueue(&self, text: String) -> Result<(), LoopFailure> {
        self.tx
            .send(Command::Broadcast(text))
            .map_err(|_| LoopFailure::QueueClosed)
    }

    /// Hand a new connection to the delivery loop.  It receives every
    /// broadcast queued after this call.
    pub fn attach(&self, connection: Connection) -> Result<(), TransportError> {
        self.tx
            .send(Command::Attach(connection))
            .map_err(|_| TransportError::QueueClosed)
    }
}

// ---------------------------------------------------------------------------
// Delivery loop
// ---------------------------------------------------------------------------

/// Single consumer of the fan-out queue; owner of the connection pool.
#[derive(Debug)]
pub struct DeliveryLoop {
    rx: mpsc::UnboundedReceiver<Command>,
    pool: Vec<Connection>,
}

impl DeliveryLoop {
    /// Drain the queue forever.
    ///
    /// Returns [`LoopFailure::QueueClosed`] when every [`FanoutQueue`] handle
    /// has been dropped.
    pub async fn run(mut self) -> Result<(), LoopFailure> {
        info!("fan-out delivery loop started");
        while let Some(command) = self.rx.recv().await {
            self.apply(command);
        }
        warn!("fan-out queue closed");
        Err(LoopFailure::QueueClosed)
    }

    /// Apply every command already queued without waiting.  Returns how many
    /// were applied.
    pub fn pump_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.rx.try_recv() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Attach(connection) => self.attach(connection),
            Command::Broadcast(text) => {
                self.broadcast(&text);
            }
        }
    }

    /// Add `connection` to the pool.
    pub fn attach(&mut self, connection: Connection) {
        debug!(peer = %connection.peer, id = %connection.id, "connection attached");
        self.pool.push(connection);
    }

    /// Offer `text` to every connection in one pass.
    ///
    /// A full outbox drops its oldest message to make room.  A connection
    /// whose session has ended is pruned once the pass is over.  Returns the
    /// number of connections that accepted the message.
    pub fn broadcast(&mut self, text: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (index, connection) in self.pool.iter().enumerate() {
            match connection.outbox.send(text.to_string()) {
                Ok(_) => delivered += 1,
                Err(_) => closed.push(index),
            }
        }
        for index in closed.into_iter().rev() {
            let connection = self.pool.remove(index);
            debug!(peer = %connection.peer, id = %connection.id, "connection pruned");
        }
        delivered
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn all_connections_observe_enqueue_order() {
        let (queue, mut delivery) = FanoutQueue::new();
        let (c1, mut rx1) = Connection::channel(peer(1));
        let (c2, mut rx2) = Connection::channel(peer(2));
        queue.attach(c1).unwrap();
        queue.attach(c2).unwrap();
        queue.enqueue("m1".to_string()).unwrap();
        queue.enqueue("m2".to_string()).unwrap();

        assert_eq!(delivery.pump_pending(), 4);
        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv().unwrap(), "m1");
            assert_eq!(rx.try_recv().unwrap(), "m2");
        }
    }

    #[test]
    fn attach_only_sees_later_broadcasts() {
        let (queue, mut delivery) = FanoutQueue::new();
        queue.enqueue("before".to_string()).unwrap();
        let (c, mut rx) = Connection::channel(peer(1));
        queue.attach(c).unwrap();
        queue.enqueue("after".to_string()).unwrap();
        delivery.pump_pending();

        assert_eq!(rx.try_recv().unwrap(), "after");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_connection_is_pruned_without_error() {
        let (_queue, mut delivery) = FanoutQueue::new();
        let (c1, rx1) = Connection::channel(peer(1));
        let (c2, mut rx2) = Connection::channel(peer(2));
        delivery.attach(c1);
        delivery.attach(c2);
        drop(rx1);

        assert_eq!(delivery.broadcast("m"), 1);
        assert_eq!(delivery.len(), 1);
        assert_eq!(rx2.try_recv().unwrap(), "m");
    }

    #[test]
    fn full_outbox_drops_oldest_and_keeps_connection() {
        let (_queue, mut delivery) = FanoutQueue::new();
        let (c, mut rx) = Connection::channel(peer(1));
        delivery.attach(c);
        for i in 0..OUTBOX_CAPACITY {
            assert_eq!(delivery.broadcast(&i.to_string()), 1);
        }

        assert_eq!(delivery.broadcast("newest"), 1);
        assert_eq!(delivery.len(), 1);

        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(1)));
        assert_eq!(rx.try_recv().unwrap(), "1");
        let rest: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(rest.len(), OUTBOX_CAPACITY - 1);
        assert_eq!(rest.last().map(String::as_str), Some("newest"));
    }

    #[tokio::test]
    async fn run_fails_when_all_producers_are_gone() {
        let (queue, delivery) = FanoutQueue::new();
        let (c, mut rx) = Connection::channel(peer(1));
        queue.attach(c).unwrap();
        queue.enqueue("last".to_string()).unwrap();
        drop(queue);

        let result = tokio::time::timeout(Duration::from_secs(1), delivery.run())
            .await
            .expect("delivery loop must return");
        assert!(matches!(result, Err(LoopFailure::QueueClosed)));
        assert_eq!(rx.recv().await.unwrap(), "last");
    }

    #[tokio::test]
    async fn enqueue_fails_after_delivery_loop_drops() {
        let (queue, delivery) = FanoutQueue::new();
        drop(delivery);
        assert!(matches!(
            queue.enqueue("x".to_string()),
            Err(LoopFailure::QueueClosed)
        ));
        let (c, _rx) = Connection::channel(peer(1));
        assert!(matches!(queue.attach(c), Err(TransportError::QueueClosed)));
    }
}
