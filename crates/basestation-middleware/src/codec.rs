//! Conversion between the three message representations.
//!
//! ```text
//!  wire JSON ──decode──▶ TypedMessage ──to_bus──▶ BusMessage
//!  wire JSON ◀──encode── TypedMessage ◀─from_bus─ BusMessage
//! ```
//!
//! Decoding is all-or-nothing: either every declared field is present with
//! the declared type, or the whole message is rejected.  The only coercion
//! is an integral JSON number widening into a `Float` field.

use std::collections::BTreeMap;
use std::sync::Arc;

use basestation_types::{
    BusMessage, BusValue, FieldType, MessageSchema, SchemaError, TypedMessage, Value, Vector3,
    VECTOR3_BUS_TYPE, now_ms,
};
use serde_json::{Map, Value as Json, json};
use tracing::warn;

/// Stand-in for floats JSON cannot represent (NaN, ±infinity).  Operator
/// tooling treats it as "no reading".
pub const NAN_SENTINEL: f64 = -69420.0;

/// Decode a wire `data` object, stamping it with the current time.
pub fn decode(
    schema: &Arc<MessageSchema>,
    raw: &Map<String, Json>,
) -> Result<TypedMessage, SchemaError> {
    decode_at(schema, raw, schema.tag(), now_ms())
}

/// Decode a wire `data` object using the envelope's `tag` and `timestamp`.
///
/// `tag` is kept as the message's concrete tag, so a sub-device of a prefix
/// family (e.g. `/basestation/controller/2`) survives the round trip.
///
/// # Errors
///
/// * [`SchemaError::MissingField`] – a declared field is absent.  Nested
///   fields are reported by dotted path (`bno_gyro.x`).
/// * [`SchemaError::TypeMismatch`] – a value has the wrong JSON type.
/// * [`SchemaError::UnknownTag`] – `schema` does not claim `tag`.
pub fn decode_at(
    schema: &Arc<MessageSchema>,
    raw: &Map<String, Json>,
    tag: &str,
    timestamp: i64,
) -> Result<TypedMessage, SchemaError> {
    let msg = decode_object(schema, raw, timestamp, tag, "")?;
    if msg.tag() == tag {
        Ok(msg)
    } else {
        msg.with_tag(tag)
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn decode_object(
    schema: &Arc<MessageSchema>,
    raw: &Map<String, Json>,
    timestamp: i64,
    root: &str,
    path: &str,
) -> Result<TypedMessage, SchemaError> {
    let mut values = BTreeMap::new();
    for field in schema.fields() {
        let field_path = join(path, field.wire_name());
        let raw_value = raw
            .get(field.wire_name())
            .ok_or_else(|| SchemaError::MissingField {
                tag: root.to_string(),
                field: field_path.clone(),
            })?;
        let value = decode_value(field.field_type(), raw_value, timestamp, root, &field_path)?;
        values.insert(field.wire_name().to_string(), value);
    }

    for key in raw.keys().filter(|k| schema.field(k).is_none()) {
        warn!(tag = %root, field = %join(path, key), "field not in schema; dropped");
    }

    TypedMessage::new(Arc::clone(schema), timestamp, values)
}

fn decode_value(
    field_type: &FieldType,
    raw: &Json,
    timestamp: i64,
    root: &str,
    path: &str,
) -> Result<Value, SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        tag: root.to_string(),
        field: path.to_string(),
        expected: field_type.to_string(),
        actual: json_kind(raw).to_string(),
    };
    match (field_type, raw) {
        (FieldType::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
        (FieldType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (FieldType::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (FieldType::Nested(inner), Json::Object(map)) => {
            decode_object(inner, map, timestamp, root, path).map(Value::Message)
        }
        _ => Err(mismatch()),
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_f64() => "float",
        Json::Number(_) => "int",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Encode `msg` as a full wire envelope `{type, timestamp, data}`.
pub fn encode(msg: &TypedMessage) -> Json {
    json!({
        "type": msg.tag(),
        "timestamp": msg.timestamp(),
        "data": encode_data(msg),
    })
}

/// Encode only the `data` object of `msg`.
pub fn encode_data(msg: &TypedMessage) -> Json {
    let mut out = Map::new();
    for field in msg.schema().fields() {
        if let Some(value) = msg.get(field.wire_name()) {
            out.insert(field.wire_name().to_string(), encode_value(value));
        }
    }
    Json::Object(out)
}

/// Serialized [`encode`] output, ready for a text frame.
pub fn encode_text(msg: &TypedMessage) -> String {
    encode(msg).to_string()
}

fn encode_value(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) if f.is_finite() => Json::from(*f),
        Value::Float(_) => Json::from(NAN_SENTINEL),
        Value::String(s) => Json::String(s.clone()),
        Value::Message(m) => encode_data(m),
    }
}

/// Read a bus message into a [`TypedMessage`] of `schema`.
///
/// Attributes are looked up by each field's bus name.  Native vectors and
/// nested bus messages convert through the field's nested schema.
pub fn from_bus(
    schema: &Arc<MessageSchema>,
    bus: &BusMessage,
    timestamp: i64,
) -> Result<TypedMessage, SchemaError> {
    let mut values = BTreeMap::new();
    for field in schema.fields() {
        let raw = bus
            .get(field.bus_name())
            .ok_or_else(|| SchemaError::MissingField {
                tag: schema.tag().to_string(),
                field: field.wire_name().to_string(),
            })?;
        let value = match (raw, field.field_type()) {
            (BusValue::Vector3(v), FieldType::Nested(inner)) => {
                Value::Message(from_bus(inner, &v.to_bus_message(), timestamp)?)
            }
            (BusValue::Message(m), FieldType::Nested(inner)) => {
                Value::Message(from_bus(inner, m, timestamp)?)
            }
            (BusValue::Vector3(_), expected) => {
                return Err(mismatch(schema, field.wire_name(), expected, "vector3"));
            }
            (BusValue::Message(m), expected) => {
                return Err(mismatch(schema, field.wire_name(), expected, m.bus_type()));
            }
            (BusValue::Bool(b), _) => Value::Bool(*b),
            (BusValue::Int(i), _) => Value::Int(*i),
            (BusValue::Float(f), _) => Value::Float(*f),
            (BusValue::String(s), _) => Value::String(s.clone()),
        };
        values.insert(field.wire_name().to_string(), value);
    }
    TypedMessage::new(Arc::clone(schema), timestamp, values)
}

fn mismatch(schema: &MessageSchema, field: &str, expected: &FieldType, actual: &str) -> SchemaError {
    SchemaError::TypeMismatch {
        tag: schema.tag().to_string(),
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Build the bus message for `msg`.
///
/// # Errors
///
/// Returns [`SchemaError::NoBusType`] for wire-only schemas.
pub fn to_bus(msg: &TypedMessage) -> Result<BusMessage, SchemaError> {
    let schema = msg.schema();
    let mut bus = schema
        .new_bus_message()
        .ok_or_else(|| SchemaError::NoBusType(schema.tag().to_string()))?;
    for field in schema.fields() {
        let Some(value) = msg.get(field.wire_name()) else {
            continue;
        };
        let bus_value = match value {
            Value::Bool(b) => BusValue::Bool(*b),
            Value::Int(i) => BusValue::Int(*i),
            Value::Float(f) => BusValue::Float(*f),
            Value::String(s) => BusValue::String(s.clone()),
            Value::Message(inner) => {
                let nested = to_bus(inner)?;
                match Vector3::from_bus_message(&nested) {
                    Some(v) if nested.bus_type() == VECTOR3_BUS_TYPE => BusValue::Vector3(v),
                    _ => BusValue::Message(nested),
                }
            }
        };
        bus.set(field.bus_name(), bus_value);
    }
    Ok(bus)
}
