//! Alarm rules and occurrences.
//!
//! A rule watches one sensor and may own one interlock on one actuator slot.
//! Occurrences are the persisted history of rule firings.

use serde::{Deserialize, Serialize};

use crate::actuator::{Level, Slot};
use crate::consts::MAX_DUTY;
use crate::error::RtuError;
use crate::journal::Severity;
use crate::sensor::SensorId;

/// Alarm rule primary key.
pub type RuleId = u32;

/// Alarm occurrence primary key.
pub type OccurrenceId = u64;

/// Threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmCondition {
    /// Raise above `threshold_high`.
    Above,
    /// Raise below `threshold_low`.
    Below,
    /// Raise outside `[threshold_low, threshold_high]`.
    OutOfRange,
}

/// Output forced by an interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterlockAction {
    #[default]
    Off,
    On,
    /// On at `pwm_duty`; target must be pwm-capable.
    Pwm,
}

impl InterlockAction {
    /// Level and duty sent to the manager for this action.
    pub fn command(&self, pwm_duty: u8) -> (Level, u8) {
        match self {
            Self::Off => (Level::Off, 0),
            Self::On => (Level::On, MAX_DUTY),
            Self::Pwm => Level::for_duty(pwm_duty),
        }
    }
}

/// Interlock attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterlockSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_slot: Slot,
    #[serde(default)]
    pub action: InterlockAction,
    #[serde(default)]
    pub pwm_duty: u8,
    /// Drop the latch when the rule clears.
    #[serde(default)]
    pub release_on_clear: bool,
}

fn default_true() -> bool {
    true
}

fn default_severity() -> Severity {
    Severity::Warning
}

/// Row of the `alarm_rule` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: RuleId,
    pub sensor_id: SensorId,
    pub condition: AlarmCondition,
    #[serde(default)]
    pub threshold_high: f32,
    #[serde(default)]
    pub threshold_low: f32,
    /// Clear band as a percentage of `|high - low|`.
    #[serde(default)]
    pub hysteresis_percent: f32,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub auto_clear: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interlock: InterlockSpec,
}

impl AlarmRule {
    /// Enabled auto-clearing rule without interlock.
    pub fn new(id: RuleId, sensor_id: SensorId, condition: AlarmCondition, low: f32, high: f32) -> Self {
        Self {
            id,
            sensor_id,
            condition,
            threshold_high: high,
            threshold_low: low,
            hysteresis_percent: 0.0,
            severity: default_severity(),
            auto_clear: true,
            enabled: true,
            interlock: InterlockSpec::default(),
        }
    }

    /// Absolute hysteresis band `H = |high - low| * percent / 100`.
    #[inline]
    pub fn hysteresis_band(&self) -> f32 {
        (self.threshold_high - self.threshold_low).abs() * self.hysteresis_percent / 100.0
    }

    /// Slot this rule may interlock, if any.
    #[inline]
    pub fn interlock_slot(&self) -> Option<Slot> {
        self.interlock.enabled.then_some(self.interlock.target_slot)
    }

    /// Check the rule in isolation. Target pwm capability is checked by the
    /// alarm engine against the admitted actuator.
    pub fn validate(&self) -> Result<(), RtuError> {
        let slot = self.interlock.target_slot;
        if !(0.0..=100.0).contains(&self.hysteresis_percent) {
            return Err(RtuError::config_invalid(
                slot,
                format!("rule {}: hysteresis_percent must be within 0..=100", self.id),
            ));
        }
        if self.condition == AlarmCondition::OutOfRange && self.threshold_low >= self.threshold_high {
            return Err(RtuError::config_invalid(
                slot,
                format!("rule {}: threshold_low must be below threshold_high", self.id),
            ));
        }
        if self.interlock.enabled {
            if slot == 0 {
                return Err(RtuError::config_invalid(
                    slot,
                    format!("rule {}: interlock needs a target slot", self.id),
                ));
            }
            if self.interlock.action == InterlockAction::Pwm && self.interlock.pwm_duty > MAX_DUTY {
                return Err(RtuError::config_invalid(
                    slot,
                    format!("rule {}: interlock pwm_duty above {MAX_DUTY}", self.id),
                ));
            }
        }
        Ok(())
    }
}

// ─── Occurrences ────────────────────────────────────────────────────

/// Lifecycle of an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceState {
    Active,
    Acknowledged,
    Cleared,
}

/// Row of the `alarm_occurrence` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmOccurrence {
    pub id: OccurrenceId,
    pub rule_id: RuleId,
    pub sensor_id: SensorId,
    pub trigger_value: f32,
    /// Wall-clock [ms since epoch].
    pub raised_at: u64,
    pub cleared_at: Option<u64>,
    pub acknowledged_by: Option<String>,
    pub state: OccurrenceState,
}

impl AlarmOccurrence {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state != OccurrenceState::Cleared
    }
}
