//! Monotonic process clock.
//!
//! All timestamps in the core are [`Ticks`]: whole milliseconds since the
//! first clock query of the process. Millisecond ticks fit in an `AtomicU64`,
//! which is what lets the aggregator caches publish (value, timestamp) pairs
//! without holding a lock on the read side.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the process clock epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticks(pub u64);

impl Ticks {
    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn from_duration(d: Duration) -> Ticks {
        Ticks(d.as_millis() as u64)
    }

    /// Elapsed ticks since `earlier`, or None when `earlier` is in the
    /// future (tolerates clock skew between sampling sites).
    pub fn since(self, earlier: Ticks) -> Option<Ticks> {
        self.0.checked_sub(earlier.0).map(Ticks)
    }

    pub fn saturating_add(self, other: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(other.0))
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

/// Current monotonic time.
pub fn now() -> Ticks {
    let epoch = EPOCH.get_or_init(Instant::now);
    Ticks(epoch.elapsed().as_millis() as u64)
}
