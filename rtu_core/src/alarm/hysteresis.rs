//! Threshold evaluation with hysteresis.
//!
//! With `H = |high - low| * hysteresis_percent / 100`:
//!
//! | Condition | Raise | Clear |
//! |-----------|-------|-------|
//! | `above` | `v > high` | `v < high - H` |
//! | `below` | `v < low` | `v > low + H` |
//! | `out_of_range` | `v > high` or `v < low` | `high - H > v > low + H` |
//!
//! Values between the raise and clear edges keep the current state.

use rtu_common::alarm::{AlarmCondition, AlarmRule};

/// Result of evaluating one sample against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Idle rule crossed its raise edge.
    Raise,
    /// Firing rule crossed its clear edge.
    Clear,
    /// No change.
    Hold,
}

/// Whether `value` is past the raise edge.
pub fn raises(rule: &AlarmRule, value: f32) -> bool {
    match rule.condition {
        AlarmCondition::Above => value > rule.threshold_high,
        AlarmCondition::Below => value < rule.threshold_low,
        AlarmCondition::OutOfRange => value > rule.threshold_high || value < rule.threshold_low,
    }
}

/// Whether `value` is past the clear edge.
pub fn clears(rule: &AlarmRule, value: f32) -> bool {
    let h = rule.hysteresis_band();
    match rule.condition {
        AlarmCondition::Above => value < rule.threshold_high - h,
        AlarmCondition::Below => value > rule.threshold_low + h,
        AlarmCondition::OutOfRange => {
            value < rule.threshold_high - h && value > rule.threshold_low + h
        }
    }
}

/// Evaluate `value` for a rule that is currently `firing` or idle.
pub fn evaluate(rule: &AlarmRule, firing: bool, value: f32) -> Verdict {
    if value.is_nan() {
        return Verdict::Hold;
    }
    match firing {
        false if raises(rule, value) => Verdict::Raise,
        true if clears(rule, value) => Verdict::Clear,
        _ => Verdict::Hold,
    }
}
