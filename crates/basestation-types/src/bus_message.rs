//! Untyped messages exchanged with the robot control bus.
//!
//! A [`BusMessage`] is an attribute bag tagged with its bus type name
//! (e.g. `basestation_msgs/CoreControl`).  The bus itself never inspects the
//! attributes; translation to and from [`TypedMessage`] happens in the codec.
//!
//! [`TypedMessage`]: crate::TypedMessage

use std::collections::BTreeMap;

/// Bus type name of the 3-axis vector message.
pub const VECTOR3_BUS_TYPE: &str = "geometry_msgs/Vector3";

/// 3-axis vector carried natively by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// View this vector as a generic `geometry_msgs/Vector3` bus message.
    pub fn to_bus_message(self) -> BusMessage {
        BusMessage::new(VECTOR3_BUS_TYPE)
            .with("x", BusValue::Float(self.x))
            .with("y", BusValue::Float(self.y))
            .with("z", BusValue::Float(self.z))
    }

    /// Read a vector back out of a `geometry_msgs/Vector3` bus message.
    pub fn from_bus_message(msg: &BusMessage) -> Option<Self> {
        if msg.bus_type() != VECTOR3_BUS_TYPE {
            return None;
        }
        let axis = |name: &str| match msg.get(name) {
            Some(BusValue::Float(v)) => Some(*v),
            _ => None,
        };
        Some(Self::new(axis("x")?, axis("y")?, axis("z")?))
    }
}

/// Attribute value on a [`BusMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector3(Vector3),
    Message(BusMessage),
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        BusValue::Bool(v)
    }
}

impl From<i64> for BusValue {
    fn from(v: i64) -> Self {
        BusValue::Int(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        BusValue::Float(v)
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        BusValue::String(v.to_string())
    }
}

impl From<Vector3> for BusValue {
    fn from(v: Vector3) -> Self {
        BusValue::Vector3(v)
    }
}

/// A message instance as seen by the control bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    bus_type: String,
    fields: BTreeMap<String, BusValue>,
}

impl BusMessage {
    /// Allocate an empty message of `bus_type`.
    pub fn new(bus_type: impl Into<String>) -> Self {
        Self {
            bus_type: bus_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn bus_type(&self) -> &str {
        &self.bus_type
    }

    pub fn get(&self, attribute: &str) -> Option<&BusValue> {
        self.fields.get(attribute)
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<BusValue>) {
        self.fields.insert(attribute.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<BusValue>) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, BusValue> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_converts_through_bus_message() {
        let v = Vector3::new(1.0, -2.0, 0.5);
        let msg = v.to_bus_message();
        assert_eq!(msg.bus_type(), VECTOR3_BUS_TYPE);
        assert_eq!(msg.get("y"), Some(&BusValue::Float(-2.0)));
        assert_eq!(Vector3::from_bus_message(&msg), Some(v));
    }

    #[test]
    fn vector_rejects_other_bus_types() {
        let msg = BusMessage::new("std_msgs/String").with("x", 1.0);
        assert_eq!(Vector3::from_bus_message(&msg), None);
    }

    #[test]
    fn set_overwrites_existing_attribute() {
        let mut msg = BusMessage::new("std_msgs/String").with("data", "a");
        msg.set("data", "b");
        assert_eq!(msg.get("data"), Some(&BusValue::String("b".to_string())));
        assert_eq!(msg.fields().len(), 1);
    }
}
