//! Schema-keyed routing of inbound wire frames.
//!
//! Channels declare the schemas they consume; the [`Dispatcher`] indexes them
//! by [`SchemaId`] once at start-up.  Routing a frame is then one registry
//! lookup plus one map lookup, with no inspection of the decoded value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use basestation_types::{SchemaError, TypedMessage};
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::channel::ChannelHandler;
use crate::codec;
use crate::error::RouteError;
use crate::registry::{SchemaId, SchemaRegistry};

/// Wire envelope of every text frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    timestamp: i64,
    data: Map<String, Json>,
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Concrete wire tag of the message.
    pub tag: String,
    /// Number of handlers the message was offered to.
    pub offered: usize,
    /// Names of the handlers that consumed it.
    pub consumed_by: Vec<String>,
}

/// Inbound router shared by every websocket session.
pub struct Dispatcher {
    registry: Arc<SchemaRegistry>,
    routes: HashMap<SchemaId, Vec<Arc<dyn ChannelHandler>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("schemas", &self.registry.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            routes: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Index `handler` under every schema it consumes.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnregisteredSchema`] if the handler consumes a
    /// schema that is not in the registry.
    pub fn register(&mut self, handler: Arc<dyn ChannelHandler>) -> Result<(), RouteError> {
        for schema in handler.inbound_schemas() {
            let id = self
                .registry
                .id_of(&schema)
                .ok_or_else(|| RouteError::UnregisteredSchema {
                    channel: handler.name().to_string(),
                    tag: schema.tag().to_string(),
                })?;
            self.routes.entry(id).or_default().push(Arc::clone(&handler));
            debug!(channel = %handler.name(), tag = %schema.tag(), "route registered");
        }
        Ok(())
    }

    /// Parse, decode and route one text frame.
    ///
    /// # Errors
    ///
    /// * [`RouteError::Malformed`] – not JSON, or no `type`/`timestamp`/`data`.
    /// * [`RouteError::Schema`] – unknown tag or a decode failure.
    ///
    /// Nobody consuming the message is not an error.
    pub fn dispatch_text(&self, text: &str) -> Result<Dispatch, RouteError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RouteError::Malformed(e.to_string()))?;
        let id = self
            .registry
            .resolve_id(&envelope.tag)
            .ok_or_else(|| SchemaError::UnknownTag(envelope.tag.clone()))?;
        let schema = self
            .registry
            .get(id)
            .ok_or_else(|| SchemaError::UnknownTag(envelope.tag.clone()))?;
        let msg = codec::decode_at(schema, &envelope.data, &envelope.tag, envelope.timestamp)?;
        Ok(self.dispatch(id, &msg))
    }

    /// Offer an already decoded message to every handler of schema `id`.
    ///
    /// Handler failures are logged and count as "not consumed".
    pub fn dispatch(&self, id: SchemaId, msg: &TypedMessage) -> Dispatch {
        let handlers = self.routes.get(&id).map(Vec::as_slice).unwrap_or_default();
        let mut consumed_by = Vec::new();
        for handler in handlers {
            match handler.handle(msg) {
                Ok(true) => consumed_by.push(handler.name().to_string()),
                Ok(false) => {}
                Err(e) => {
                    warn!(channel = %handler.name(), tag = %msg.tag(), error = %e, "handler failed");
                }
            }
        }
        if handlers.is_empty() {
            debug!(tag = %msg.tag(), "no handler for message");
        }
        Dispatch {
            tag: msg.tag().to_string(),
            offered: handlers.len(),
            consumed_by,
        }
    }
}
