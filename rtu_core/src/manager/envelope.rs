//! Safety envelope timing.
//!
//! Pure calculations for the min-on dwell, the max-on watchdog and on-time
//! accounting. The manager applies them under the per-actuator lock.

use rtu_common::actuator::{ActuatorConfig, Level};
use rtu_common::clock::Deadline;

/// When a transition `from → to` may take effect, if it must wait.
///
/// `on→off` waits until `min_on_time_ms` after the last transition for
/// every kind. `off→on` waits the same amount only for kinds with a
/// symmetric dwell (anti-short-cycle). No recorded transition means no
/// dwell.
pub fn dwell_deadline(
    config: &ActuatorConfig,
    from: Level,
    to: Level,
    last_transition_ms: Option<u64>,
    now_ms: u64,
) -> Option<Deadline> {
    if from == to || config.min_on_time_ms == 0 {
        return None;
    }
    let last = last_transition_ms?;
    let applies = match (from, to) {
        (Level::On, Level::Off) => true,
        (Level::Off, Level::On) => config.kind.symmetric_dwell(),
        _ => false,
    };
    if !applies {
        return None;
    }
    let deadline = Deadline::after(last, config.min_on_time_ms);
    (!deadline.expired(now_ms)).then_some(deadline)
}

/// Whether continuous on-time since `on_since_ms` has reached the limit.
/// `max_on_time_ms == 0` disables the watchdog.
pub fn watchdog_expired(max_on_time_ms: u64, on_since_ms: Option<u64>, now_ms: u64) -> bool {
    match on_since_ms {
        Some(since) if max_on_time_ms > 0 => now_ms.saturating_sub(since) >= max_on_time_ms,
        _ => false,
    }
}

/// On-time accumulator advanced by monotonic time spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OnTimeMeter {
    pub total_ms: u64,
    accounted_until_ms: u64,
}

impl OnTimeMeter {
    pub fn new(total_ms: u64, now_ms: u64) -> Self {
        Self {
            total_ms,
            accounted_until_ms: now_ms,
        }
    }

    /// Credit time since the last update if the output was on.
    pub fn advance(&mut self, level: Level, now_ms: u64) {
        if level.is_on() {
            self.total_ms += now_ms.saturating_sub(self.accounted_until_ms);
        }
        self.accounted_until_ms = self.accounted_until_ms.max(now_ms);
    }
}
