//! Waymark Core - capture, isolate and overlay third-party map instances.
//!
//! The bridge finds map objects that a page builds with one of several map
//! engines, binds each one to a fixed identity and origin, broadcasts the
//! active viewport to an external consumer and draws point markers over
//! every instance on a single batched surface.
//!
//! The page itself is reached only through [`HostPage`]. [`host::sim`] ships
//! an in-memory page used by the tests and the CLI driver.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use waymark_core::{Bridge, BridgeSettings, ManualClock, Outbox, SimPage, SiteConfigTable};
//!
//! let page = Rc::new(SimPage::new("https://shop.example/"));
//! let clock = ManualClock::new(0);
//! let outbox = Outbox::new();
//! let mut bridge = Bridge::new(
//!     page,
//!     Rc::new(clock.clone()),
//!     BridgeSettings::default(),
//!     Arc::new(SiteConfigTable::default()),
//!     Rc::new(outbox.clone()),
//! );
//! bridge.initialize();
//! clock.advance_ms(500);
//! bridge.advance();
//! for message in outbox.drain() {
//!     println!("{}", serde_json::to_string(&message).unwrap());
//! }
//! ```

pub mod bridge;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod geo;
pub mod host;
pub mod intercept;
pub mod portal;
pub mod protocol;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod sites;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeTask, TickReport};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::{sources, BridgeSettings};
pub use discovery::{DiscoveryScanner, ScanMode, ScanReport};
pub use engine::{probe, EngineKind};
pub use error::{BridgeError, Result};
pub use geo::{Bounds, LatLng};
pub use host::sim::{PageFixture, SimPage};
pub use host::{HostError, HostPage, HostValue, NodeRef, ObjectRef};
pub use intercept::{EventQueue, HostEvent, InterceptionLayer};
pub use portal::{RejectReason, StateBroadcastChannel, UpdateOutcome};
pub use protocol::{
    BoundsBroadcast, InboundMessage, MarkerEvent, MessagePort, Outbox, OutboundMessage,
    PointOfInterest,
};
pub use registry::{CapturedInstance, EntryId, InstanceRegistry, RegistryEntry};
pub use render::{MarkerRenderEngine, OverlayState, RenderOutcome};
pub use scheduler::{Scheduler, TimerHandle};
pub use sites::{SiteConfig, SiteConfigProvider, SiteConfigTable};
