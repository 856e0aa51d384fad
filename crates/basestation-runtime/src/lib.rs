//! `basestation-runtime` – process-level wiring of the gateway.
//!
//! # Modules
//!
//! - [`gateway`] – [`Gateway`][gateway::Gateway]: installs the message
//!   catalog, builds every channel plus the antenna, and spawns the six
//!   long-running loops (bus pump, websocket, fan-out, antenna sender,
//!   antenna listener, signal watcher).
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]:
//!   fail-fast supervision.  The first loop to stop, cleanly or not, aborts
//!   all the others.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod gateway;
pub mod orchestrator;
pub mod telemetry;

pub use gateway::{Gateway, GatewayConfig, RuntimeError, is_clean_shutdown};
pub use orchestrator::{ExitReason, LoopExit, Orchestrator};
pub use telemetry::{TracerProviderGuard, init_tracing};
