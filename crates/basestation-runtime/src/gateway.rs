//! Gateway wiring: builds every component and hands the loops to the
//! [`Orchestrator`].
//!
//! | Loop | Body |
//! |---|---|
//! | `bus_pump` | [`bus::pump`] – delivers bus messages to channel callbacks |
//! | `websocket` | [`CockpitServer::serve`] – accepts operator clients |
//! | `fanout` | [`DeliveryLoop::run`] – broadcasts queued frames |
//! | `antenna_send` | [`AntennaChannel::run_sender`] |
//! | `antenna_listen` | [`AntennaChannel::run_listener`] |
//! | `signal` | waits for ctrl-c, then shuts the bus down |

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use basestation_cockpit::{CockpitServer, DEFAULT_PORT, Heartbeat};
use basestation_middleware::antenna::{DEFAULT_ANTENNA_PORT, SEND_INTERVAL};
use basestation_middleware::{
    AntennaChannel, Catalog, ControlBus, DeliveryLoop, Dispatcher, FanoutQueue, LoopFailure,
    RouteError, SchemaRegistry, bus, standard_channels,
};
use basestation_types::SchemaError;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::orchestrator::{ExitReason, LoopExit, Orchestrator};

pub const BUS_PUMP_LOOP: &str = "bus_pump";
pub const WEBSOCKET_LOOP: &str = "websocket";
pub const FANOUT_LOOP: &str = "fanout";
pub const ANTENNA_SEND_LOOP: &str = "antenna_send";
pub const ANTENNA_LISTEN_LOOP: &str = "antenna_listen";
pub const SIGNAL_LOOP: &str = "signal";

/// Start-up failures.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("schema setup failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("channel setup failed: {0}")]
    Route(#[from] RouteError),

    #[error(transparent)]
    Loop(#[from] LoopFailure),
}

/// Runtime settings of the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub ws_addr: SocketAddr,
    pub heartbeat: Heartbeat,
    pub antenna_peer: SocketAddr,
    pub antenna_listen: SocketAddr,
    pub antenna_interval: Duration,
    pub pump_idle: Duration,
    pub bus_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            heartbeat: Heartbeat::default(),
            antenna_peer: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::new(192, 168, 1, 4),
                DEFAULT_ANTENNA_PORT,
            )),
            antenna_listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_ANTENNA_PORT)),
            antenna_interval: SEND_INTERVAL,
            pump_idle: bus::PUMP_IDLE,
            bus_capacity: 10,
        }
    }
}

/// Every gateway component, built but not yet running.
pub struct Gateway {
    config: GatewayConfig,
    bus: ControlBus,
    dispatcher: Arc<Dispatcher>,
    fanout: FanoutQueue,
    delivery: DeliveryLoop,
    antenna: Arc<AntennaChannel>,
}

impl Gateway {
    /// Install the catalog, build every channel and index them for dispatch.
    pub fn new(config: GatewayConfig) -> Result<Self, RuntimeError> {
        let mut registry = SchemaRegistry::new();
        let catalog = Catalog::install(&mut registry)?;
        let registry = Arc::new(registry);

        let bus = ControlBus::new(config.bus_capacity);
        let (fanout, delivery) = FanoutQueue::new();
        let (handlers, position) = standard_channels(&bus, &fanout, &catalog);
        let antenna = Arc::new(AntennaChannel::new(&catalog, &fanout, position));

        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        for handler in handlers {
            dispatcher.register(handler)?;
        }
        dispatcher.register(antenna.clone())?;
        info!(schemas = registry.len(), "gateway initialised");

        Ok(Self {
            config,
            bus,
            dispatcher: Arc::new(dispatcher),
            fanout,
            delivery,
            antenna,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Handle to the control bus, e.g. for an in-process robot stack.
    pub fn bus(&self) -> &ControlBus {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn fanout(&self) -> &FanoutQueue {
        &self.fanout
    }

    /// Bind the websocket endpoint and spawn every loop.
    ///
    /// Returns the orchestrator and the bound websocket address.
    ///
    /// # Errors
    ///
    /// Fails if the websocket address cannot be bound.
    pub async fn start(self) -> Result<(Orchestrator, SocketAddr), LoopFailure> {
        let Self {
            config,
            bus,
            dispatcher,
            fanout,
            delivery,
            antenna,
        } = self;

        let listener = TcpListener::bind(config.ws_addr)
            .await
            .map_err(|e| LoopFailure::io(format!("bind websocket listener on {}", config.ws_addr), e))?;
        let ws_addr = listener
            .local_addr()
            .map_err(|e| LoopFailure::io("websocket listener address", e))?;
        let server = CockpitServer::new(dispatcher, fanout)
            .with_addr(ws_addr)
            .with_heartbeat(config.heartbeat);

        let signal_bus = bus.clone();
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .spawn(BUS_PUMP_LOOP, bus::pump(bus, config.pump_idle))
            .spawn(WEBSOCKET_LOOP, server.serve(listener))
            .spawn(FANOUT_LOOP, delivery.run())
            .spawn(
                ANTENNA_SEND_LOOP,
                Arc::clone(&antenna).run_sender(config.antenna_peer, config.antenna_interval),
            )
            .spawn(ANTENNA_LISTEN_LOOP, antenna.run_listener(config.antenna_listen))
            .spawn(SIGNAL_LOOP, async move {
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|e| LoopFailure::io("wait for ctrl-c", e))?;
                info!("interrupt received; shutting down control bus");
                signal_bus.shutdown();
                Ok(())
            });
        Ok((orchestrator, ws_addr))
    }

    /// Run until the first loop exits.
    pub async fn run(self) -> Result<LoopExit, RuntimeError> {
        let (orchestrator, addr) = self.start().await?;
        info!(%addr, "gateway running");
        Ok(orchestrator.run().await)
    }
}

/// Whether `exit` is the operator stopping the gateway rather than a fault.
///
/// Only the signal loop shuts the bus down, so a bus pump that returned
/// cleanly counts as well.
pub fn is_clean_shutdown(exit: &LoopExit) -> bool {
    matches!(exit.reason, ExitReason::Returned)
        && (exit.name == SIGNAL_LOOP || exit.name == BUS_PUMP_LOOP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basestation_types::BusMessage;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::UdpSocket;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn default_config_matches_field_deployment() {
        let config = GatewayConfig::default();
        assert_eq!(config.ws_addr.port(), 5000);
        assert_eq!(config.antenna_peer.to_string(), "192.168.1.4:42069");
        assert_eq!(config.antenna_listen.port(), 42069);
        assert_eq!(config.antenna_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(3));
    }

    #[test]
    fn new_indexes_every_channel() {
        let gateway = Gateway::new(GatewayConfig::default()).unwrap();
        assert_eq!(gateway.dispatcher().registry().len(), 14);
        let outcome = gateway
            .dispatcher()
            .dispatch_text(r#"{"type":"antenna","timestamp":1,"data":{"message":"x"}}"#)
            .unwrap();
        assert_eq!(outcome.consumed_by, ["antenna"]);
    }

    #[tokio::test]
    async fn end_to_end_and_fail_fast_on_bus_shutdown() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = GatewayConfig {
            ws_addr: local(0),
            antenna_peer: peer.local_addr().unwrap(),
            antenna_listen: local(0),
            antenna_interval: Duration::from_millis(20),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config).unwrap();
        let bus = gateway.bus().clone();
        let (orchestrator, ws_addr) = gateway.start().await.unwrap();
        let running = tokio::spawn(orchestrator.run());

        // Wire → antenna override → UDP peer.
        let (mut ws, _) = connect_async(format!("ws://{ws_addr}/api/ws")).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"antenna","timestamp":1,"data":{"message":"!hello"}}"#.into(),
        ))
        .await
        .unwrap();
        let mut buf = [0u8; 32];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .expect("antenna datagram expected")
            .unwrap();
        assert_eq!(&buf[..len], b"hello");

        // Bus → wire.
        let mut feedback = BusMessage::new("basestation_msgs/BioFeedback");
        for name in ["bat_voltage", "voltage_12", "voltage_5", "drill_temp", "drill_humidity"] {
            feedback.set(name, f64::NAN);
        }
        bus.publisher("/bio/feedback").publish(feedback).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    return text;
                }
            }
        })
        .await
        .expect("feedback frame expected");
        let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(json["type"], "/bio/feedback");
        assert_eq!(json["data"]["drill_temp"], -69420.0);

        // Bus shutdown ends the pump, which tears everything down.
        bus.shutdown();
        let exit = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("orchestrator must stop")
            .unwrap();
        assert_eq!(exit.name, BUS_PUMP_LOOP);
        assert!(is_clean_shutdown(&exit));
    }

    #[tokio::test]
    async fn busy_websocket_port_fails_start() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = GatewayConfig {
            ws_addr: taken.local_addr().unwrap(),
            ..GatewayConfig::default()
        };
        let result = Gateway::new(config).unwrap().start().await;
        assert!(matches!(result, Err(LoopFailure::Io { .. })));
    }
}
