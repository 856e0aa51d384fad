//! `basestation-cockpit` – the operator websocket endpoint.
//!
//! Serves one websocket route (`/api/ws`, default port `5000`) that:
//!
//! 1. **Streams** every message queued on the fan-out queue (bus feedback,
//!    antenna feedback) to each connected operator client.
//! 2. **Accepts** `{"type", "timestamp", "data"}` text frames from the client
//!    and hands them to the [`Dispatcher`], which decodes them and offers them
//!    to the channels.
//! 3. **Supervises** each connection with a ping/pong heartbeat.
//!
//! Bad input never closes a connection: it is logged and dropped.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use basestation_cockpit::CockpitServer;
//! use basestation_middleware::{Dispatcher, FanoutQueue, SchemaRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (fanout, delivery) = FanoutQueue::new();
//!     tokio::spawn(delivery.run());
//!     let dispatcher = Arc::new(Dispatcher::new(Arc::new(SchemaRegistry::new())));
//!     CockpitServer::new(dispatcher, fanout)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`Dispatcher`]: basestation_middleware::Dispatcher

pub mod server;

pub use server::{CLOSE_COMMAND, CockpitServer, DEFAULT_PORT, HANDSHAKE_TIMEOUT, Heartbeat, WS_PATH};
