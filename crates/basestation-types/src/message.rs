//! [`TypedMessage`] – a message instance guaranteed to satisfy its schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::SchemaError;
use crate::schema::{FieldType, MessageSchema};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Value held by a single message field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Message(TypedMessage),
}

impl Value {
    /// Runtime type name used in diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Message(m) => m.schema().tag(),
        }
    }

    /// Whether this value satisfies `field_type`.  Nested messages must have
    /// been built from the same schema.
    pub fn satisfies(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (Value::Bool(_), FieldType::Bool)
            | (Value::Int(_), FieldType::Int)
            | (Value::Float(_), FieldType::Float)
            | (Value::String(_), FieldType::String) => true,
            (Value::Message(m), FieldType::Nested(schema)) => {
                Arc::ptr_eq(m.schema(), schema) || m.schema().as_ref() == schema.as_ref()
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&TypedMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<TypedMessage> for Value {
    fn from(v: TypedMessage) -> Self {
        Value::Message(v)
    }
}

/// A fully populated, schema-checked message.
///
/// The only way to obtain one is through the validating constructor
/// [`TypedMessage::new`], so every descriptor in the schema is guaranteed to
/// have a present, type-matching value.  Each instance owns its value map.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedMessage {
    schema: Arc<MessageSchema>,
    tag: String,
    timestamp: i64,
    values: BTreeMap<String, Value>,
}

impl TypedMessage {
    /// Build a message from `values`, keyed by wire name.
    ///
    /// Entries that the schema does not declare are discarded.
    ///
    /// # Errors
    ///
    /// * [`SchemaError::MissingField`] – a declared field has no value.
    /// * [`SchemaError::TypeMismatch`] – a value does not satisfy its
    ///   descriptor.
    pub fn new(
        schema: Arc<MessageSchema>,
        timestamp: i64,
        mut values: BTreeMap<String, Value>,
    ) -> Result<Self, SchemaError> {
        let mut checked = BTreeMap::new();
        for field in schema.fields() {
            let value = values
                .remove(field.wire_name())
                .ok_or_else(|| SchemaError::MissingField {
                    tag: schema.tag().to_string(),
                    field: field.wire_name().to_string(),
                })?;
            if !value.satisfies(field.field_type()) {
                return Err(SchemaError::TypeMismatch {
                    tag: schema.tag().to_string(),
                    field: field.wire_name().to_string(),
                    expected: field.field_type().to_string(),
                    actual: value.kind().to_string(),
                });
            }
            checked.insert(field.wire_name().to_string(), value);
        }
        Ok(Self {
            tag: schema.tag().to_string(),
            schema,
            timestamp,
            values: checked,
        })
    }

    /// Replace the wire tag with a concrete tag claimed by the schema, e.g. a
    /// sub-device tag of a prefix schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTag`] when the schema does not match
    /// `tag`.
    pub fn with_tag(mut self, tag: &str) -> Result<Self, SchemaError> {
        if !self.schema.matches(tag) {
            return Err(SchemaError::UnknownTag(tag.to_string()));
        }
        self.tag = tag.to_string();
        Ok(self)
    }

    pub fn schema(&self) -> &Arc<MessageSchema> {
        &self.schema
    }

    /// The concrete wire tag of this message.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, wire_name: &str) -> Option<&Value> {
        self.values.get(wire_name)
    }
}
