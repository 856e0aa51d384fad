//! Declarative message schemas.
//!
//! A [`MessageSchema`] names a wire-level type tag, the bus message type it
//! maps onto, and the ordered list of [`FieldDescriptor`]s every message of
//! that type must carry.  Schemas are immutable once built and are shared as
//! `Arc<MessageSchema>`; nested composite fields hold the `Arc` of their own
//! schema.
//!
//! ```
//! use basestation_types::{FieldType, MessageSchema};
//!
//! let schema = MessageSchema::builder("/core/control")
//!     .bus_type("basestation_msgs/CoreControl")
//!     .field("max_speed", FieldType::Int)
//!     .field("brake", FieldType::Bool)
//!     .build()
//!     .unwrap();
//!
//! assert!(schema.matches("/core/control"));
//! assert_eq!(schema.fields().len(), 2);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::SchemaError;
use crate::bus_message::BusMessage;

/// Type of a single schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    /// A composite field decoded through its own schema.
    Nested(Arc<MessageSchema>),
}

impl FieldType {
    /// Human-readable type name used in diagnostics.
    pub fn name(&self) -> &str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Nested(schema) => schema.tag(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One field of a [`MessageSchema`].
///
/// `wire_name` is the key used in the JSON `data` object; `bus_name` is the
/// attribute written on the bus message.  The two are usually identical.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    wire_name: String,
    bus_name: String,
    field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(
        wire_name: impl Into<String>,
        bus_name: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            wire_name: wire_name.into(),
            bus_name: bus_name.into(),
            field_type,
        }
    }

    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }
}

/// How a schema claims incoming type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagMatch {
    /// The tag must equal the schema tag.
    #[default]
    Exact,
    /// Any tag starting with the schema tag belongs to the schema.  Used by
    /// schema families that multiplex sub-devices, e.g.
    /// `/basestation/controller/2`.
    Prefix,
}

/// Field contract for one message type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    tag: String,
    tag_match: TagMatch,
    bus_type: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl MessageSchema {
    /// Start building a schema for `tag`.
    pub fn builder(tag: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            tag: tag.into(),
            tag_match: TagMatch::Exact,
            bus_type: None,
            fields: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn tag_match(&self) -> TagMatch {
        self.tag_match
    }

    /// Bus message type name, or `None` for wire-only schemas.
    pub fn bus_type(&self) -> Option<&str> {
        self.bus_type.as_deref()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by its wire name.
    pub fn field(&self, wire_name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.wire_name == wire_name)
    }

    /// Whether `tag` belongs to this schema.
    pub fn matches(&self, tag: &str) -> bool {
        match self.tag_match {
            TagMatch::Exact => self.tag == tag,
            TagMatch::Prefix => tag.starts_with(&self.tag),
        }
    }

    /// Allocate an empty bus message of this schema's bus type.
    pub fn new_bus_message(&self) -> Option<BusMessage> {
        self.bus_type.as_deref().map(BusMessage::new)
    }
}

/// Builder returned by [`MessageSchema::builder`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    tag: String,
    tag_match: TagMatch,
    bus_type: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    /// Claim every tag that starts with this schema's tag.
    pub fn prefix(mut self) -> Self {
        self.tag_match = TagMatch::Prefix;
        self
    }

    pub fn bus_type(mut self, bus_type: impl Into<String>) -> Self {
        self.bus_type = Some(bus_type.into());
        self
    }

    /// Add a field whose wire and bus names are identical.
    pub fn field(self, name: &str, field_type: FieldType) -> Self {
        self.mapped(name, name, field_type)
    }

    /// Add a field whose bus attribute differs from its wire key.
    pub fn mapped(mut self, wire_name: &str, bus_name: &str, field_type: FieldType) -> Self {
        self.fields
            .push(FieldDescriptor::new(wire_name, bus_name, field_type));
        self
    }

    /// Finish the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateField`] when two fields share a wire
    /// name.
    pub fn build(self) -> Result<Arc<MessageSchema>, SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.wire_name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    tag: self.tag.clone(),
                    field: field.wire_name.clone(),
                });
            }
        }
        Ok(Arc::new(MessageSchema {
            tag: self.tag,
            tag_match: self.tag_match,
            bus_type: self.bus_type,
            fields: self.fields,
        }))
    }
}
