//! Error taxonomy of the middleware.
//!
//! | Type | Scope | Effect |
//! |---|---|---|
//! | [`SchemaError`] | one message | message dropped |
//! | [`RouteError`] | one inbound frame | frame dropped, connection kept |
//! | [`BusError`] / [`ChannelError`] | one publish | message not consumed |
//! | [`TransportError`] | one connection | connection pruned |
//! | [`LoopFailure`] | one orchestrated loop | whole process torn down |

use std::net::SocketAddr;

use basestation_types::SchemaError;
use thiserror::Error;

/// Control bus failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("no subscribers on topic {0}")]
    NoSubscribers(String),

    #[error("control bus is shut down")]
    Shutdown,

    #[error("no service registered as {0}")]
    UnknownService(String),
}

/// Failure while a channel handler converts or publishes a message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Rejection of a single inbound wire frame or datagram.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("channel '{channel}' consumes unregistered schema '{tag}'")]
    UnregisteredSchema { channel: String, tag: String },
}

/// Failure of a single wire connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    #[error("send to {peer} failed: {reason}")]
    Send { peer: SocketAddr, reason: String },

    #[error("fan-out queue closed")]
    QueueClosed,
}

/// Unhandled failure escaping one of the orchestrated loops.  Always fatal.
#[derive(Error, Debug)]
pub enum LoopFailure {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fan-out queue closed")]
    QueueClosed,
}

impl LoopFailure {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LoopFailure::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_pass_through_route_errors() {
        let err: RouteError = SchemaError::UnknownTag("/nope".to_string()).into();
        assert_eq!(err.to_string(), "no schema registered for tag '/nope'");
    }

    #[test]
    fn loop_failure_io_keeps_context() {
        let err = LoopFailure::io(
            "bind 0.0.0.0:5000",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(err.to_string().starts_with("bind 0.0.0.0:5000"));
    }
}
