//! `basestation-types` – shared vocabulary of the basestation gateway.
//!
//! # Modules
//!
//! - [`schema`] – declarative message schemas: [`FieldDescriptor`],
//!   [`FieldType`], [`MessageSchema`] and the [`TagMatch`] rule used to
//!   resolve wire-level type tags.
//! - [`message`] – [`TypedMessage`], a message instance that is guaranteed to
//!   satisfy its schema, and its field [`Value`]s.
//! - [`bus_message`] – [`BusMessage`], the untyped attribute bag exchanged with
//!   the robot control bus.

pub mod bus_message;
pub mod message;
pub mod schema;

pub use bus_message::{BusMessage, BusValue, Vector3, VECTOR3_BUS_TYPE};
pub use message::{TypedMessage, Value, now_ms};
pub use schema::{FieldDescriptor, FieldType, MessageSchema, SchemaBuilder, TagMatch};

use thiserror::Error;

/// Schema-level failures.
///
/// Every variant is recoverable at the granularity of a single message: the
/// offending message is dropped and processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema '{tag}' is already registered")]
    DuplicateSchema { tag: String },

    #[error("schema '{tag}' declares field '{field}' more than once")]
    DuplicateField { tag: String, field: String },

    #[error("field '{field}' missing from '{tag}' message")]
    MissingField { tag: String, field: String },

    #[error("field '{field}' of '{tag}' expected {expected}, got {actual}")]
    TypeMismatch {
        tag: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("no schema registered for tag '{0}'")]
    UnknownTag(String),

    #[error("schema '{0}' has no bus message type")]
    NoBusType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display() {
        let err = SchemaError::MissingField {
            tag: "/core/control".to_string(),
            field: "brake".to_string(),
        };
        assert!(err.to_string().contains("brake"));
        assert!(err.to_string().contains("/core/control"));

        let err = SchemaError::TypeMismatch {
            tag: "/core/control".to_string(),
            field: "max_speed".to_string(),
            expected: "int".to_string(),
            actual: "string".to_string(),
        };
        assert!(err.to_string().contains("expected int, got string"));
    }
}
