//! Channel handlers: the bridge between one group of bus topics and the wire.
//!
//! A channel owns two kinds of routes:
//!
//! * **outbound** – wire messages of a schema are converted with
//!   [`codec::to_bus`] and published on a bus topic;
//! * **feeds** – bus messages arriving on a topic are converted with
//!   [`codec::from_bus`] + [`codec::encode_text`] and queued for every wire
//!   client.
//!
//! Every [`BusChannel`] also answers the `/{name}/ping` liveness service.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use basestation_types::{MessageSchema, TypedMessage, now_ms};
use tracing::{debug, info, warn};

use crate::bus::{ControlBus, Publisher};
use crate::codec;
use crate::error::{BusError, ChannelError};
use crate::fanout::FanoutQueue;

/// Contract between the [`Dispatcher`](crate::Dispatcher) and a channel.
pub trait ChannelHandler: Send + Sync {
    /// Channel name, e.g. `core`.
    fn name(&self) -> &str;

    /// Schemas this channel wants to be offered.
    fn inbound_schemas(&self) -> Vec<Arc<MessageSchema>>;

    /// Offer `msg` to the channel.
    ///
    /// `Ok(true)` means the message was consumed.  `Ok(false)` means the
    /// channel declined it, e.g. because nobody listens on the bus topic.
    fn handle(&self, msg: &TypedMessage) -> Result<bool, ChannelError>;

    /// Record a liveness ping.
    fn ping(&self) {}
}

/// Callback run on every decoded feed message before it is queued.
pub type FeedbackHook = Arc<dyn Fn(&TypedMessage) + Send + Sync>;

struct Route {
    schema: Arc<MessageSchema>,
    publisher: Publisher,
}

struct Feed {
    schema: Arc<MessageSchema>,
    topic: String,
    hook: Option<FeedbackHook>,
}

/// Generic bus-topic group handler.
pub struct BusChannel {
    name: String,
    routes: Vec<Route>,
    last_ping: Arc<AtomicI64>,
}

impl fmt::Debug for BusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusChannel")
            .field("name", &self.name)
            .field(
                "routes",
                &self
                    .routes
                    .iter()
                    .map(|r| r.publisher.topic())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl BusChannel {
    pub fn builder(bus: &ControlBus, name: &str, fanout: &FanoutQueue) -> BusChannelBuilder {
        BusChannelBuilder {
            bus: bus.clone(),
            name: name.to_string(),
            fanout: fanout.clone(),
            routes: Vec::new(),
            feeds: Vec::new(),
        }
    }

    /// Time of the last ping in milliseconds, if any.
    pub fn last_ping(&self) -> Option<i64> {
        match self.last_ping.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }
}

impl ChannelHandler for BusChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn inbound_schemas(&self) -> Vec<Arc<MessageSchema>> {
        self.routes.iter().map(|r| Arc::clone(&r.schema)).collect()
    }

    fn handle(&self, msg: &TypedMessage) -> Result<bool, ChannelError> {
        let Some(route) = self
            .routes
            .iter()
            .find(|r| Arc::ptr_eq(&r.schema, msg.schema()))
        else {
            return Ok(false);
        };
        if route.publisher.subscription_count() == 0 {
            debug!(channel = %self.name, topic = %route.publisher.topic(), "no bus subscribers; not publishing");
            return Ok(false);
        }
        let bus_msg = codec::to_bus(msg)?;
        match route.publisher.publish(bus_msg) {
            Ok(_) => Ok(true),
            // Last subscriber left between the check and the publish.
            Err(BusError::NoSubscribers(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn ping(&self) {
        self.last_ping.store(now_ms(), Ordering::SeqCst);
        debug!(channel = %self.name, "ping received");
    }
}

/// Builder returned by [`BusChannel::builder`].
pub struct BusChannelBuilder {
    bus: ControlBus,
    name: String,
    fanout: FanoutQueue,
    routes: Vec<Route>,
    feeds: Vec<Feed>,
}

impl BusChannelBuilder {
    /// Publish wire messages of `schema` on bus `topic`.
    pub fn publishes(mut self, schema: &Arc<MessageSchema>, topic: &str) -> Self {
        self.routes.push(Route {
            schema: Arc::clone(schema),
            publisher: self.bus.publisher(topic),
        });
        self
    }

    /// Forward bus messages on `topic`, read as `schema`, to the wire.
    pub fn feeds(mut self, schema: &Arc<MessageSchema>, topic: &str) -> Self {
        self.feeds.push(Feed {
            schema: Arc::clone(schema),
            topic: topic.to_string(),
            hook: None,
        });
        self
    }

    /// Like [`feeds`](Self::feeds), running `hook` on each decoded message.
    pub fn feeds_with<F>(mut self, schema: &Arc<MessageSchema>, topic: &str, hook: F) -> Self
    where
        F: Fn(&TypedMessage) + Send + Sync + 'static,
    {
        self.feeds.push(Feed {
            schema: Arc::clone(schema),
            topic: topic.to_string(),
            hook: Some(Arc::new(hook)),
        });
        self
    }

    /// Subscribe every feed, register the ping service and return the
    /// active channel.
    pub fn build(self) -> BusChannel {
        info!(channel = %self.name, "initializing channel");
        for feed in self.feeds {
            let Feed {
                schema,
                topic,
                hook,
            } = feed;
            let fanout = self.fanout.clone();
            let channel = self.name.clone();
            let subscribed = topic.clone();
            self.bus.subscribe(&subscribed, move |bus_msg| {
                let msg = match codec::from_bus(&schema, bus_msg, now_ms()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(channel = %channel, topic = %topic, error = %e, "feedback conversion failed; dropped");
                        return;
                    }
                };
                if let Some(hook) = &hook {
                    hook(&msg);
                }
                if let Err(e) = fanout.enqueue(codec::encode_text(&msg)) {
                    warn!(channel = %channel, error = %e, "feedback dropped");
                }
            });
        }

        let last_ping = Arc::new(AtomicI64::new(0));
        let stamp = Arc::clone(&last_ping);
        let channel = self.name.clone();
        self.bus
            .register_service(&format!("/{}/ping", self.name), move || {
                stamp.store(now_ms(), Ordering::SeqCst);
                debug!(channel = %channel, "ping received");
            });

        BusChannel {
            name: self.name,
            routes: self.routes,
            last_ping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basestation_types::{BusMessage, FieldType, Value};
    use serde_json::json;
    use std::sync::Mutex;

    fn relay_schema() -> Arc<MessageSchema> {
        MessageSchema::builder("/anchor/relay")
            .bus_type("std_msgs/String")
            .field("data", FieldType::String)
            .build()
            .unwrap()
    }

    fn relay(schema: &Arc<MessageSchema>, text: &str) -> TypedMessage {
        let values = [("data".to_string(), Value::from(text))].into_iter().collect();
        TypedMessage::new(Arc::clone(schema), 1, values).unwrap()
    }

    #[test]
    fn declines_without_bus_subscribers() {
        let bus = ControlBus::default();
        let (fanout, _delivery) = FanoutQueue::new();
        let schema = relay_schema();
        let channel = BusChannel::builder(&bus, "anchor", &fanout)
            .publishes(&schema, "/anchor/relay")
            .build();

        assert_eq!(channel.handle(&relay(&schema, "on")), Ok(false));
    }

    #[test]
    fn publishes_when_subscribed() {
        let bus = ControlBus::default();
        let (fanout, _delivery) = FanoutQueue::new();
        let schema = relay_schema();
        let channel = BusChannel::builder(&bus, "anchor", &fanout)
            .publishes(&schema, "/anchor/relay")
            .build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("/anchor/relay", move |m| sink.lock().unwrap().push(m.clone()));

        assert_eq!(channel.handle(&relay(&schema, "on")), Ok(true));
        bus.spin_once();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[BusMessage::new("std_msgs/String").with("data", "on")]
        );
    }

    #[test]
    fn routes_match_by_schema_identity() {
        let bus = ControlBus::default();
        let (fanout, _delivery) = FanoutQueue::new();
        let schema = relay_schema();
        let lookalike = relay_schema();
        let channel = BusChannel::builder(&bus, "anchor", &fanout)
            .publishes(&schema, "/anchor/relay")
            .build();
        bus.subscribe("/anchor/relay", |_| {});

        assert_eq!(channel.handle(&relay(&lookalike, "on")), Ok(false));
        assert_eq!(channel.inbound_schemas().len(), 1);
    }

    #[test]
    fn shutdown_bus_surfaces_error() {
        let bus = ControlBus::default();
        let (fanout, _delivery) = FanoutQueue::new();
        let schema = relay_schema();
        let channel = BusChannel::builder(&bus, "anchor", &fanout)
            .publishes(&schema, "/anchor/relay")
            .build();
        bus.subscribe("/anchor/relay", |_| {});
        bus.shutdown();

        assert_eq!(
            channel.handle(&relay(&schema, "on")),
            Err(ChannelError::Bus(BusError::Shutdown))
        );
    }

    #[test]
    fn feed_converts_and_queues_envelopes() {
        let bus = ControlBus::default();
        let (fanout, mut delivery) = FanoutQueue::new();
        let (conn, mut rx) = crate::fanout::Connection::channel(([127, 0, 0, 1], 9).into());
        delivery.attach(conn);
        let schema = relay_schema();
        let hooked = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&hooked);
        let _channel = BusChannel::builder(&bus, "anchor", &fanout)
            .feeds_with(&schema, "/anchor/state", move |m| {
                *sink.lock().unwrap() = m.get("data").and_then(Value::as_str).map(str::to_string);
            })
            .build();

        bus.publisher("/anchor/state")
            .publish(BusMessage::new("std_msgs/String").with("data", "armed"))
            .unwrap();
        bus.spin_once();
        delivery.pump_pending();

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "/anchor/relay");
        assert_eq!(frame["data"], json!({"data": "armed"}));
        assert_eq!(hooked.lock().unwrap().as_deref(), Some("armed"));
    }

    #[test]
    fn malformed_feedback_is_dropped() {
        let bus = ControlBus::default();
        let (fanout, mut delivery) = FanoutQueue::new();
        let schema = relay_schema();
        let _channel = BusChannel::builder(&bus, "anchor", &fanout)
            .feeds(&schema, "/anchor/state")
            .build();

        bus.publisher("/anchor/state")
            .publish(BusMessage::new("std_msgs/String"))
            .unwrap();
        bus.spin_once();
        assert_eq!(delivery.pump_pending(), 0);
    }

    #[test]
    fn ping_service_records_last_ping() {
        let bus = ControlBus::default();
        let (fanout, _delivery) = FanoutQueue::new();
        let channel = BusChannel::builder(&bus, "core", &fanout).build();
        assert_eq!(channel.last_ping(), None);

        bus.call("/core/ping").unwrap();
        assert!(channel.last_ping().is_some());
    }
}
