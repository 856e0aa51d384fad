//! The rover's channel set.
//!
//! | Channel | Publishes (wire → bus) | Feeds (bus → wire) |
//! |---|---|---|
//! | core | `/core/control` | `/core/feedback` |
//! | arm | `/arm/control/ik`, `/arm/control/manual` | `/arm/feedback/socket`, `/arm/feedback`, `/arm/feedback/digit` |
//! | bio | `/bio/control` | `/bio/feedback` |
//! | auto | – | `/auto/feedback` |
//! | anchor | `/anchor/relay` | – |
//! | ptz | `/ptz/control` | – |

use std::sync::Arc;

use basestation_types::{TypedMessage, Value};
use tokio::sync::watch;

use crate::bus::ControlBus;
use crate::catalog::Catalog;
use crate::channel::{BusChannel, ChannelHandler};
use crate::fanout::FanoutQueue;

/// Latest GPS fix of the rover as sent to the antenna: `"{lat},{long}\n"`
/// with seven decimals.  `None` until the first core feedback arrives.
pub type Position = watch::Receiver<Option<String>>;

/// Format the antenna position line from a `/core/feedback` message.
pub fn position_line(msg: &TypedMessage) -> Option<String> {
    let lat = msg.get("gps_lat").and_then(Value::as_f64)?;
    let long = msg.get("gps_long").and_then(Value::as_f64)?;
    Some(format!("{lat:.7},{long:.7}\n"))
}

pub fn core_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> (BusChannel, Position) {
    let (position_tx, position_rx) = watch::channel(None);
    let channel = BusChannel::builder(bus, "core", fanout)
        .publishes(&catalog.core_control, "/core/control")
        .feeds_with(&catalog.core_feedback, "/core/feedback", move |msg| {
            if let Some(line) = position_line(msg) {
                position_tx.send_replace(Some(line));
            }
        })
        .build();
    (channel, position_rx)
}

pub fn arm_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> BusChannel {
    BusChannel::builder(bus, "arm", fanout)
        .publishes(&catalog.arm_ik, "/arm/control/ik")
        .publishes(&catalog.arm_manual, "/arm/control/manual")
        .feeds(&catalog.socket_feedback, "/arm/feedback/socket")
        .feeds(&catalog.bio_feedback, "/arm/feedback")
        .feeds(&catalog.digit_feedback, "/arm/feedback/digit")
        .build()
}

pub fn bio_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> BusChannel {
    BusChannel::builder(bus, "bio", fanout)
        .publishes(&catalog.bio_control, "/bio/control")
        .feeds(&catalog.bio_feedback, "/bio/feedback")
        .build()
}

pub fn auto_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> BusChannel {
    BusChannel::builder(bus, "auto", fanout)
        .feeds(&catalog.auto_feedback, "/auto/feedback")
        .build()
}

pub fn anchor_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> BusChannel {
    BusChannel::builder(bus, "anchor", fanout)
        .publishes(&catalog.anchor_relay, "/anchor/relay")
        .build()
}

pub fn ptz_channel(bus: &ControlBus, fanout: &FanoutQueue, catalog: &Catalog) -> BusChannel {
    BusChannel::builder(bus, "ptz", fanout)
        .publishes(&catalog.ptz_control, "/ptz/control")
        .build()
}

/// Build every bus channel, core first.  Also returns the core channel's
/// position feed.
pub fn standard_channels(
    bus: &ControlBus,
    fanout: &FanoutQueue,
    catalog: &Catalog,
) -> (Vec<Arc<dyn ChannelHandler>>, Position) {
    let (core, position) = core_channel(bus, fanout, catalog);
    let handlers: Vec<Arc<dyn ChannelHandler>> = vec![
        Arc::new(core),
        Arc::new(arm_channel(bus, fanout, catalog)),
        Arc::new(auto_channel(bus, fanout, catalog)),
        Arc::new(bio_channel(bus, fanout, catalog)),
        Arc::new(anchor_channel(bus, fanout, catalog)),
        Arc::new(ptz_channel(bus, fanout, catalog)),
    ];
    (handlers, position)
}
