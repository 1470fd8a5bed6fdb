//! Time sources for protocol timestamps.
//!
//! Every timestamp on the wire is a `u32` count of milliseconds on the
//! sender's own clock. Peers never compare clocks with each other: round-trip
//! time is always `now - echoed_timestamp` on the host that sent the ping, and
//! liveness is always measured against the local clock. Comparisons use
//! wrapping arithmetic so a clock that runs past `u32::MAX` keeps working.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of millisecond timestamps handed to the protocol layer.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// Shared handle to a time source.
pub type SharedClock = Arc<dyn TimeSource>;

/// Monotonic clock counting milliseconds since it was created.
#[derive(Debug, Clone)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for Clock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// Clock that only moves when told to, for deterministic heartbeat and RTT tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        // fetch_add wraps on overflow, matching the wire semantics
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Milliseconds elapsed from `earlier` to `now`, tolerating wraparound.
pub fn elapsed_ms(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

/// Whether timestamp `a` is strictly newer than `b` under wraparound.
pub fn is_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < u32::MAX / 2
}
