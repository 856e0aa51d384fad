//! Topic-based publish/subscribe control bus.
//!
//! [`ControlBus`] stands in for the robot's middleware.  It follows the same
//! contract the gateway relies on:
//!
//! | Operation | Meaning |
//! |---|---|
//! | [`ControlBus::publisher`] | obtain a [`Publisher`] for a topic |
//! | [`Publisher::publish`] | hand a [`BusMessage`] to every subscriber |
//! | [`Publisher::subscription_count`] | number of live subscriptions |
//! | [`ControlBus::subscribe`] | register a callback for a topic |
//! | [`ControlBus::spin_once`] | deliver pending messages to callbacks |
//! | [`ControlBus::register_service`] / [`ControlBus::call`] | liveness pings |
//!
//! Each topic is a [`tokio::sync::broadcast`] channel, so a slow subscription
//! never blocks the publisher; it lags and loses the oldest messages instead.
//! Callbacks only run inside [`spin_once`](ControlBus::spin_once), which the
//! [`pump`] loop calls with a small idle delay between passes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use basestation_types::BusMessage;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::error::{BusError, LoopFailure};

/// Default per-topic queue depth.
const DEFAULT_CAPACITY: usize = 10;

/// Idle delay between two [`ControlBus::spin_once`] passes of the [`pump`].
pub const PUMP_IDLE: Duration = Duration::from_micros(100);

/// Subscription callback.
pub type Callback = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Liveness service handler.
pub type ServiceFn = Arc<dyn Fn() + Send + Sync>;

struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
    callback: Callback,
}

struct BusInner {
    capacity: usize,
    running: AtomicBool,
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    services: Mutex<HashMap<String, ServiceFn>>,
}

/// Shared control bus handle.  Clone it cheaply – all clones share the same
/// topics, subscriptions and services.
#[derive(Clone)]
pub struct ControlBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ControlBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBus")
            .field("capacity", &self.inner.capacity)
            .field("running", &self.is_running())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControlBus {
    /// Create a bus whose topics buffer up to `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                running: AtomicBool::new(true),
                topics: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
                services: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Obtain a publisher for `topic`, creating the topic if needed.
    pub fn publisher(&self, topic: &str) -> Publisher {
        Publisher {
            topic: topic.to_string(),
            sender: self.topic_sender(topic),
            bus: self.clone(),
        }
    }

    /// Register `callback` for every message published on `topic`.
    ///
    /// The callback runs on whichever task calls [`spin_once`](Self::spin_once).
    pub fn subscribe<F>(&self, topic: &str, callback: F)
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let receiver = self.topic_sender(topic).subscribe();
        lock(&self.inner.subscriptions).push(Subscription {
            topic: topic.to_string(),
            receiver,
            callback: Arc::new(callback),
        });
        debug!(topic, "bus subscription created");
    }

    /// Deliver every pending message to its subscription callbacks.
    ///
    /// Returns the number of callback invocations.  Callbacks run after the
    /// subscription lock is released, so they may use the bus themselves.
    pub fn spin_once(&self) -> usize {
        let mut ready: Vec<(Callback, BusMessage)> = Vec::new();
        {
            let mut subscriptions = lock(&self.inner.subscriptions);
            for sub in subscriptions.iter_mut() {
                loop {
                    match sub.receiver.try_recv() {
                        Ok(msg) => ready.push((Arc::clone(&sub.callback), msg)),
                        Err(TryRecvError::Lagged(n)) => {
                            warn!(topic = %sub.topic, lagged_by = n, "bus subscription lagged");
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
            }
        }
        let delivered = ready.len();
        for (callback, msg) in ready {
            callback(&msg);
        }
        delivered
    }

    /// Register a liveness service under `name` (e.g. `/core/ping`).
    pub fn register_service<F>(&self, name: &str, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.inner.services).insert(name.to_string(), Arc::new(handler));
    }

    /// Invoke the service registered as `name`.
    ///
    /// # Errors
    ///
    /// * [`BusError::Shutdown`] – the bus has been shut down.
    /// * [`BusError::UnknownService`] – nothing is registered under `name`.
    pub fn call(&self, name: &str) -> Result<(), BusError> {
        if !self.is_running() {
            return Err(BusError::Shutdown);
        }
        let handler = lock(&self.inner.services)
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::UnknownService(name.to_string()))?;
        handler();
        Ok(())
    }

    /// Whether the bus still accepts traffic.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop the bus.  Publishing fails afterwards and the [`pump`] returns.
    pub fn shutdown(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("control bus shutting down");
        }
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        lock(&self.inner.topics)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Publishing end of one topic.
#[derive(Clone)]
pub struct Publisher {
    topic: String,
    sender: broadcast::Sender<BusMessage>,
    bus: ControlBus,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of subscriptions currently attached to the topic.
    pub fn subscription_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish `msg` to every subscription on the topic.
    ///
    /// Returns the number of subscriptions that were handed the message.
    ///
    /// # Errors
    ///
    /// * [`BusError::Shutdown`] – the bus has been shut down.
    /// * [`BusError::NoSubscribers`] – nobody listens on the topic.
    pub fn publish(&self, msg: BusMessage) -> Result<usize, BusError> {
        if !self.bus.is_running() {
            return Err(BusError::Shutdown);
        }
        self.sender
            .send(msg)
            .map_err(|_| BusError::NoSubscribers(self.topic.clone()))
    }
}

/// Bus pump loop: spins the bus until it is shut down, yielding for `idle`
/// between passes.
///
/// Returning at all is a terminal event for the orchestrator.
pub async fn pump(bus: ControlBus, idle: Duration) -> Result<(), LoopFailure> {
    info!("control bus pump started");
    while bus.is_running() {
        bus.spin_once();
        tokio::time::sleep(idle).await;
    }
    info!("control bus pump exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn relay(data: &str) -> BusMessage {
        BusMessage::new("std_msgs/String").with("data", data)
    }

    fn collector(bus: &ControlBus, topic: &str) -> Arc<Mutex<Vec<BusMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topic, move |msg| lock(&sink).push(msg.clone()));
        seen
    }

    #[test]
    fn publish_and_spin_delivers_to_callback() -> Result<(), Box<dyn std::error::Error>> {
        let bus = ControlBus::default();
        let seen = collector(&bus, "/anchor/relay");
        let publisher = bus.publisher("/anchor/relay");

        assert_eq!(publisher.publish(relay("on"))?, 1);
        assert!(lock(&seen).is_empty(), "callbacks only run while spinning");

        assert_eq!(bus.spin_once(), 1);
        assert_eq!(lock(&seen).as_slice(), &[relay("on")]);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = ControlBus::default();
        let publisher = bus.publisher("/ptz/control");
        assert_eq!(publisher.subscription_count(), 0);
        assert_eq!(
            publisher.publish(relay("x")),
            Err(BusError::NoSubscribers("/ptz/control".to_string()))
        );
    }

    #[test]
    fn subscription_count_tracks_subscribers() {
        let bus = ControlBus::default();
        let publisher = bus.publisher("/core/control");
        let _a = collector(&bus, "/core/control");
        let _b = collector(&bus, "/core/control");
        let _other = collector(&bus, "/core/feedback");
        assert_eq!(publisher.subscription_count(), 2);
    }

    #[test]
    fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = ControlBus::default();
        let core = collector(&bus, "/core/feedback");
        let bio = collector(&bus, "/bio/feedback");

        bus.publisher("/core/feedback").publish(relay("core"))?;
        bus.spin_once();

        assert_eq!(lock(&core).len(), 1);
        assert!(lock(&bio).is_empty());
        Ok(())
    }

    #[test]
    fn slow_subscription_lags_instead_of_blocking() -> Result<(), Box<dyn std::error::Error>> {
        let bus = ControlBus::new(4);
        let seen = collector(&bus, "/arm/feedback/socket");
        let publisher = bus.publisher("/arm/feedback/socket");

        for i in 0..20 {
            publisher.publish(relay(&i.to_string()))?;
        }
        bus.spin_once();

        let seen = lock(&seen);
        assert_eq!(seen.len(), 4, "only the newest messages survive");
        assert_eq!(seen.last(), Some(&relay("19")));
        Ok(())
    }

    #[test]
    fn shutdown_rejects_publish_and_calls() {
        let bus = ControlBus::default();
        let _seen = collector(&bus, "/core/control");
        bus.register_service("/core/ping", || {});
        bus.shutdown();

        assert!(!bus.is_running());
        assert_eq!(
            bus.publisher("/core/control").publish(relay("x")),
            Err(BusError::Shutdown)
        );
        assert_eq!(bus.call("/core/ping"), Err(BusError::Shutdown));
    }

    #[test]
    fn services_are_invoked_by_name() {
        let bus = ControlBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.register_service("/bio/ping", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.call("/bio/ping"), Ok(()));
        assert_eq!(bus.call("/bio/ping"), Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(
            bus.call("/arm/ping"),
            Err(BusError::UnknownService("/arm/ping".to_string()))
        );
    }

    #[tokio::test]
    async fn pump_returns_after_shutdown() {
        let bus = ControlBus::default();
        let seen = collector(&bus, "/auto/feedback");
        bus.publisher("/auto/feedback").publish(relay("tick")).unwrap();

        let handle = tokio::spawn(pump(bus.clone(), PUMP_IDLE));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(lock(&seen).len(), 1, "pump must deliver pending messages");

        bus.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump must exit after shutdown")
            .expect("pump task must not panic");
        assert!(result.is_ok());
    }
}
