//! `basestation-middleware` – the translation layer between the robot control
//! bus and the operator websocket.
//!
//! Routes messages between bus topics and wire clients without static
//! knowledge of any particular message type: everything is driven by the
//! [`SchemaRegistry`].
//!
//! # Modules
//!
//! - [`bus`] – [`ControlBus`], the topic-based publish/subscribe collaborator
//!   built on Tokio broadcast channels, plus its pump loop.
//! - [`registry`] – [`SchemaRegistry`], ordered tag → schema resolution.
//! - [`catalog`] – the built-in message [`Catalog`].
//! - [`codec`] – wire JSON ⇄ [`TypedMessage`] ⇄ bus message conversion.
//! - [`channel`] – the [`ChannelHandler`] contract and the generic
//!   [`BusChannel`] implementation.
//! - [`channels`] – the concrete channel set (core, arm, bio, auto, anchor,
//!   ptz).
//! - [`router`] – [`Dispatcher`], schema-keyed routing of inbound frames.
//! - [`fanout`] – [`FanoutQueue`] / [`DeliveryLoop`], ordered broadcast to
//!   every connected wire client.
//! - [`antenna`] – [`AntennaChannel`] and its UDP side-channel loops.
//!
//! [`TypedMessage`]: basestation_types::TypedMessage

pub mod antenna;
pub mod bus;
pub mod catalog;
pub mod channel;
pub mod channels;
pub mod codec;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod router;

pub use antenna::AntennaChannel;
pub use bus::{ControlBus, Publisher};
pub use catalog::Catalog;
pub use channel::{BusChannel, ChannelHandler};
pub use channels::{Position, standard_channels};
pub use codec::NAN_SENTINEL;
pub use error::{BusError, ChannelError, LoopFailure, RouteError, TransportError};
pub use fanout::{Connection, DeliveryLoop, FanoutQueue, Outbox};
pub use registry::{SchemaId, SchemaRegistry};
pub use router::{Dispatch, Dispatcher};
