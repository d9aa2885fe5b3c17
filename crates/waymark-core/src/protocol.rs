//! Message protocol between the bridge and its external state manager.
//!
//! Every message is JSON, adjacently tagged:
//!
//! ```text
//! {"type": "BOUNDS_UPDATE", "payload": {"bounds": {...}, "source": "map_event", "timestamp": 1712}}
//! ```
//!
//! Delivery is fire-and-forget. The bridge never waits for a reply.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::geo::{Bounds, LatLng};

/// A point of interest supplied by the external state manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub color: String,
    pub secondary_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl PointOfInterest {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// True if the coordinates are finite and on the globe.
    pub fn has_valid_position(&self) -> bool {
        self.position().is_valid()
    }
}

/// Payload of `BOUNDS_UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsBroadcast {
    pub bounds: Bounds,
    pub source: String,
    pub timestamp: Millis,
}

/// Payload of the marker pointer messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

impl MarkerEvent {
    pub fn for_poi(poi: &PointOfInterest) -> Self {
        Self {
            id: poi.id.clone(),
            lat: poi.latitude,
            lng: poi.longitude,
        }
    }
}

/// Messages the bridge sends out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    BridgeReady {},
    BoundsUpdate(BoundsBroadcast),
    NativeActive {},
    MarkerClick(MarkerEvent),
    MarkerHover(MarkerEvent),
    MarkerLeave(MarkerEvent),
}

impl OutboundMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::BridgeReady {} => "BRIDGE_READY",
            OutboundMessage::BoundsUpdate(_) => "BOUNDS_UPDATE",
            OutboundMessage::NativeActive {} => "NATIVE_ACTIVE",
            OutboundMessage::MarkerClick(_) => "MARKER_CLICK",
            OutboundMessage::MarkerHover(_) => "MARKER_HOVER",
            OutboundMessage::MarkerLeave(_) => "MARKER_LEAVE",
        }
    }
}

/// Messages the bridge accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    DataUpdate { pois: Vec<PointOfInterest> },
    BridgeEnable { enabled: bool },
}

/// Somewhere outbound messages can be posted.
pub trait MessagePort {
    fn post(&self, message: OutboundMessage);
}

/// A second delivery path for consumers living in an isolated context that
/// cannot see the primary channel.
pub trait ContextMirror {
    fn mirror(&self, payload: &BoundsBroadcast);
}

/// In-memory message queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Rc<RefCell<VecDeque<OutboundMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<OutboundMessage> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl MessagePort for Outbox {
    fn post(&self, message: OutboundMessage) {
        self.queue.borrow_mut().push_back(message);
    }
}

impl ContextMirror for Outbox {
    fn mirror(&self, payload: &BoundsBroadcast) {
        self.post(OutboundMessage::BoundsUpdate(payload.clone()));
    }
}
