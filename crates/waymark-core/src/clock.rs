//! Time sources.
//!
//! Every timestamp in the bridge is milliseconds as `u64`. Production code
//! reads the wall clock; tests share a [`ManualClock`] and move it by hand.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Milliseconds since an arbitrary epoch.
pub type Millis = u64;

/// A source of the current time.
pub trait Clock {
    fn now_ms(&self) -> Millis;
}

/// Wall clock, milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        chrono::Utc::now().timestamp_millis().max(0) as Millis
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the bridge.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Millis>>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by.as_millis() as Millis);
    }

    pub fn advance_ms(&self, by: Millis) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.get()
    }
}
