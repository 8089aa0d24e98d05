//! Authority arbitration per actuator.
//!
//! Priority on conflict: interlock > manual > bus. Emergency stop acts as
//! an interlock on every slot. Interlocks latch until their owner releases
//! them or the emergency stop is reset; a manual override lasts until the
//! bus asks for something new or the override times out.

use rtu_common::actuator::{Authority, Level};
use rtu_common::alarm::RuleId;

/// Level and duty pair as requested by a command sink.
pub type Intent = (Level, u8);

/// Higher-priority holds on one slot at the time of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Holds {
    pub estop: bool,
    pub interlock: Option<RuleId>,
    pub manual: bool,
}

impl Holds {
    /// Authority currently driving the output.
    pub fn authority(&self) -> Authority {
        if self.estop || self.interlock.is_some() {
            Authority::Interlock
        } else if self.manual {
            Authority::Manual
        } else {
            Authority::Bus
        }
    }
}

/// Outcome of arbitration for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The requester may drive the output.
    Proceed,
    /// A higher authority holds the slot; the bus intent is only recorded.
    Overridden(Authority),
    /// Emergency stop is latched.
    EmergencyStop,
    /// Another rule's interlock holds the slot.
    InterlockHeld(RuleId),
}

/// Decide whether `requester` may drive a slot under `holds`.
///
/// `rule_id` identifies the caller for interlock requests; the latch owner
/// may re-command its own slot.
pub fn arbitrate(holds: &Holds, requester: Authority, rule_id: Option<RuleId>) -> Decision {
    match requester {
        Authority::Bus => {
            if holds.estop || holds.interlock.is_some() {
                Decision::Overridden(Authority::Interlock)
            } else if holds.manual {
                Decision::Overridden(Authority::Manual)
            } else {
                Decision::Proceed
            }
        }
        Authority::Manual => {
            if holds.estop {
                Decision::EmergencyStop
            } else if let Some(held) = holds.interlock {
                Decision::InterlockHeld(held)
            } else {
                Decision::Proceed
            }
        }
        Authority::Interlock => {
            if holds.estop {
                Decision::EmergencyStop
            } else {
                match holds.interlock {
                    Some(held) if Some(held) != rule_id => Decision::InterlockHeld(held),
                    _ => Decision::Proceed,
                }
            }
        }
    }
}

/// Operator override taken through the manual sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualOverride {
    /// Bus intent recorded when the override was taken.
    pub bus_intent_at_take: Option<Intent>,
    /// Monotonic time the override was taken [ms].
    pub taken_at_ms: u64,
}

impl ManualOverride {
    pub fn take(bus_intent: Option<Intent>, now_ms: u64) -> Self {
        Self {
            bus_intent_at_take: bus_intent,
            taken_at_ms: now_ms,
        }
    }

    /// Whether the override has run out (`timeout_ms == 0` never expires).
    pub fn expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
        timeout_ms > 0 && now_ms.saturating_sub(self.taken_at_ms) >= timeout_ms
    }

    /// Whether a bus request takes the slot back: the override expired, or
    /// the bus asks for something other than what it wanted at take time.
    /// Repeated identical cyclic frames never end an override.
    pub fn yields_to_bus(&self, bus_request: Intent, now_ms: u64, timeout_ms: u64) -> bool {
        self.expired(now_ms, timeout_ms) || self.bus_intent_at_take != Some(bus_request)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
