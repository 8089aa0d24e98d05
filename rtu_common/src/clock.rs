//! Time sources.
//!
//! Every timing decision in the control plane (dwell, watchdog, link
//! supervision) reads monotonic milliseconds from a [`Clock`]. Journal and
//! occurrence timestamps use wall-clock milliseconds from the same trait so
//! they survive restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic and wall-clock millisecond source.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;
}

/// Production clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose monotonic origin is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-driven clock for deterministic tests and replay.
///
/// Wall time is `wall_origin_ms + now_ms`.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    wall_origin_ms: u64,
}

impl ManualClock {
    /// Clock starting at monotonic 0 and wall time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock starting at monotonic 0 with the given wall-clock origin.
    pub fn with_wall_origin(wall_origin_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            wall_origin_ms,
        }
    }

    /// Jump to an absolute monotonic time. Earlier values are ignored.
    pub fn set(&self, now_ms: u64) {
        self.now.fetch_max(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> u64 {
        self.wall_origin_ms + self.now_ms()
    }
}

/// Absolute monotonic deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    /// Deadline at an absolute monotonic time.
    #[inline]
    pub const fn at(at_ms: u64) -> Self {
        Self { at_ms }
    }

    /// Deadline `after_ms` from `now_ms`.
    #[inline]
    pub const fn after(now_ms: u64, after_ms: u64) -> Self {
        Self {
            at_ms: now_ms.saturating_add(after_ms),
        }
    }

    /// Absolute expiry time.
    #[inline]
    pub const fn at_ms(&self) -> u64 {
        self.at_ms
    }

    /// Whether the deadline has passed at `now_ms` (inclusive).
    #[inline]
    pub const fn expired(&self, now_ms: u64) -> bool {
        now_ms >= self.at_ms
    }

    /// Time left until expiry, zero once expired.
    #[inline]
    pub const fn remaining(&self, now_ms: u64) -> u64 {
        self.at_ms.saturating_sub(now_ms)
    }
}
