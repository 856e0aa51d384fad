//! Built-in message catalog.
//!
//! Every wire message type the gateway understands, registered in a fixed
//! order so tag resolution is deterministic.  `vector3` is only ever nested
//! inside other messages and is not a routable tag.

use std::sync::Arc;

use basestation_types::{FieldType, MessageSchema, SchemaError, VECTOR3_BUS_TYPE};

use crate::registry::SchemaRegistry;

/// Handles to every built-in schema.
///
/// Channels route by schema identity, so they are wired with these exact
/// `Arc`s.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub vector3: Arc<MessageSchema>,
    pub arm_ik: Arc<MessageSchema>,
    pub arm_manual: Arc<MessageSchema>,
    pub controller_state: Arc<MessageSchema>,
    pub core_control: Arc<MessageSchema>,
    pub auto_feedback: Arc<MessageSchema>,
    pub core_feedback: Arc<MessageSchema>,
    pub digit_feedback: Arc<MessageSchema>,
    pub bio_feedback: Arc<MessageSchema>,
    pub socket_feedback: Arc<MessageSchema>,
    pub bio_control: Arc<MessageSchema>,
    pub anchor_relay: Arc<MessageSchema>,
    pub ptz_control: Arc<MessageSchema>,
    pub antenna_reset: Arc<MessageSchema>,
    pub antenna_feedback: Arc<MessageSchema>,
}

fn fields(
    tag: &str,
    bus_type: Option<&str>,
    declared: &[(&str, FieldType)],
) -> Result<Arc<MessageSchema>, SchemaError> {
    let mut builder = MessageSchema::builder(tag);
    if let Some(bus_type) = bus_type {
        builder = builder.bus_type(bus_type);
    }
    declared
        .iter()
        .fold(builder, |b, (name, ty)| b.field(name, ty.clone()))
        .build()
}

impl Catalog {
    /// Build every schema and register the routable ones with `registry`.
    ///
    /// # Errors
    ///
    /// Fails with [`SchemaError::DuplicateSchema`] if `registry` already holds
    /// one of the built-in tags.
    pub fn install(registry: &mut SchemaRegistry) -> Result<Self, SchemaError> {
        use FieldType::{Bool, Float, Int, String};

        let vector3 = fields(
            "vector3",
            Some(VECTOR3_BUS_TYPE),
            &[("x", Float), ("y", Float), ("z", Float)],
        )?;
        let vec = || FieldType::Nested(Arc::clone(&vector3));

        let arm_ik = fields(
            "/arm/control/ik",
            Some("basestation_msgs/ArmIK"),
            &[
                ("movement_vector", vec()),
                ("gripper", Int),
                ("linear_actuator", Int),
                ("laser", Int),
                ("effector_roll", Int),
                ("effector_yaw", Int),
            ],
        )?;
        let arm_manual = fields(
            "/arm/control/manual",
            Some("basestation_msgs/ArmManual"),
            &[
                ("axis0", Int),
                ("axis1", Int),
                ("axis2", Int),
                ("axis3", Int),
                ("brake", Bool),
                ("effector_roll", Int),
                ("effector_yaw", Int),
                ("gripper", Int),
                ("linear_actuator", Int),
                ("laser", Int),
            ],
        )?;

        let mut controller = MessageSchema::builder("/basestation/controller")
            .prefix()
            .bus_type("basestation_msgs/ControllerState");
        for (name, ty) in [
            ("lt", Float),
            ("rt", Float),
            ("lb", Bool),
            ("rb", Bool),
            ("plus", Bool),
            ("minus", Bool),
            ("ls_x", Float),
            ("ls_y", Float),
            ("rs_x", Float),
            ("rs_y", Float),
            ("a", Bool),
            ("b", Bool),
            ("x", Bool),
            ("y", Bool),
            ("d_up", Bool),
            ("d_down", Bool),
            ("d_left", Bool),
            ("d_right", Bool),
            ("home", Bool),
        ] {
            controller = controller.field(name, ty);
        }
        let controller_state = controller.build()?;

        let core_control = fields(
            "/core/control",
            Some("basestation_msgs/CoreControl"),
            &[
                ("left_stick", Float),
                ("right_stick", Float),
                ("max_speed", Int),
                ("brake", Bool),
                ("turn_to_enable", Bool),
                ("turn_to", Float),
                ("turn_to_timeout", Float),
            ],
        )?;
        let auto_feedback = fields(
            "/auto/feedback",
            Some("basestation_msgs/AutoFeedback"),
            &[
                ("mission_type", Int),
                ("target_lat", Float),
                ("target_long", Float),
                ("distance", Float),
                ("update", String),
                ("current", String),
                ("warn", String),
            ],
        )?;
        let core_feedback = fields(
            "/core/feedback",
            Some("basestation_msgs/CoreFeedback"),
            &[
                ("gps_lat", Float),
                ("gps_long", Float),
                ("gps_sats", Int),
                ("gps_alt", Float),
                ("bno_gyro", vec()),
                ("bno_accel", vec()),
                ("orientation", Float),
                ("imu_calib", Int),
                ("bmp_temp", Float),
                ("bmp_alt", Float),
                ("bmp_pres", Float),
                ("bat_voltage", Float),
                ("voltage_12", Float),
                ("voltage_5", Float),
                ("voltage_3", Float),
                ("fl_temp", Float),
                ("fl_voltage", Float),
                ("fl_current", Float),
                ("bl_temp", Float),
                ("bl_voltage", Float),
                ("bl_current", Float),
                ("fr_temp", Float),
                ("fr_voltage", Float),
                ("fr_current", Float),
                ("br_temp", Float),
                ("br_voltage", Float),
                ("br_current", Float),
            ],
        )?;
        let digit_feedback = fields(
            "/arm/feedback/digit",
            Some("basestation_msgs/DigitFeedback"),
            &[
                ("wrist_angle", Float),
                ("bat_voltage", Float),
                ("voltage_12", Float),
                ("voltage_5", Float),
            ],
        )?;
        let bio_feedback = fields(
            "/bio/feedback",
            Some("basestation_msgs/BioFeedback"),
            &[
                ("bat_voltage", Float),
                ("voltage_12", Float),
                ("voltage_5", Float),
                ("drill_temp", Float),
                ("drill_humidity", Float),
            ],
        )?;

        let mut socket = MessageSchema::builder("/arm/feedback/socket")
            .bus_type("basestation_msgs/SocketFeedback");
        for axis in 0..4 {
            for reading in ["angle", "temp", "voltage", "current"] {
                socket = socket.field(&format!("axis{axis}_{reading}"), Float);
            }
        }
        for rail in ["bat_voltage", "voltage_12", "voltage_5", "voltage_3"] {
            socket = socket.field(rail, Float);
        }
        let socket_feedback = socket.build()?;

        let bio_control = fields(
            "/bio/control",
            Some("basestation_msgs/BioControl"),
            &[
                ("pump_id", Int),
                ("pump_amount", Float),
                ("fan_id", Int),
                ("fan_duration", Int),
                ("servo_id", Int),
                ("servo_state", Bool),
                ("bio_arm", Int),
                ("laser", Int),
                ("drill", Int),
                ("drill_arm", Int),
                ("vibration_motor", Int),
            ],
        )?;
        let anchor_relay = fields("/anchor/relay", Some("std_msgs/String"), &[("data", String)])?;
        let ptz_control = fields(
            "/ptz/control",
            Some("basestation_msgs/PtzControl"),
            &[
                ("control_mode", Int),
                ("turn_yaw", Int),
                ("turn_pitch", Int),
                ("yaw", Float),
                ("pitch", Float),
                ("axis_id", Int),
                ("angle", Float),
                ("zoom_level", Float),
                ("stream_type", Int),
                ("stream_freq", Int),
                ("reset", Bool),
            ],
        )?;
        let antenna_reset = fields("antenna", None, &[("message", String)])?;
        let antenna_feedback = fields(
            "antenna/feedback",
            None,
            &[
                ("lat", Float),
                ("lon", Float),
                ("sat", Int),
                ("heading", Float),
                ("calib", Int),
            ],
        )?;

        let catalog = Self {
            vector3,
            arm_ik,
            arm_manual,
            controller_state,
            core_control,
            auto_feedback,
            core_feedback,
            digit_feedback,
            bio_feedback,
            socket_feedback,
            bio_control,
            anchor_relay,
            ptz_control,
            antenna_reset,
            antenna_feedback,
        };
        for schema in catalog.schemas() {
            registry.register(Arc::clone(schema))?;
        }
        Ok(catalog)
    }

    /// Routable schemas, in registration order.
    pub fn schemas(&self) -> [&Arc<MessageSchema>; 14] {
        [
            &self.arm_ik,
            &self.arm_manual,
            &self.controller_state,
            &self.core_control,
            &self.auto_feedback,
            &self.core_feedback,
            &self.digit_feedback,
            &self.bio_feedback,
            &self.socket_feedback,
            &self.bio_control,
            &self.anchor_relay,
            &self.ptz_control,
            &self.antenna_reset,
            &self.antenna_feedback,
        ]
    }
}
