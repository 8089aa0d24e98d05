//! Actuator configuration, kinds and persisted runtime state.
//!
//! `ActuatorConfig` mirrors the `actuator` table; `ActuatorStateRecord`
//! mirrors `actuator_state`. Runtime-only bookkeeping (pending deferrals,
//! latches) lives in the actuator manager.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_DUTY, MAX_SLOT};
use crate::error::RtuError;

/// Actuator primary key.
pub type ActuatorId = u32;

/// PROFINET output slot.
pub type Slot = u16;

/// PROFINET subslot.
pub type Subslot = u16;

// ─── ActuatorKind ───────────────────────────────────────────────────

/// Physical output family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Relay,
    Pwm,
    Latching,
    Momentary,
    Pump,
    Valve,
}

impl ActuatorKind {
    /// Whether the duty-cycle field reaches the driver.
    #[inline]
    pub const fn honors_duty(&self) -> bool {
        matches!(self, Self::Pwm | Self::Pump)
    }

    /// Whether an interlock may drive this output with a `pwm` action.
    #[inline]
    pub const fn is_pwm_capable(&self) -> bool {
        self.honors_duty()
    }

    /// Whether the output needs a PWM channel rather than a GPIO line.
    #[inline]
    pub const fn uses_pwm_channel(&self) -> bool {
        matches!(self, Self::Pwm)
    }

    /// Whether `min_on_time_ms` also holds the output off after an on→off
    /// transition (anti-short-cycle). Other kinds only hold on.
    #[inline]
    pub const fn symmetric_dwell(&self) -> bool {
        matches!(self, Self::Pump)
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Relay => "relay",
            Self::Pwm => "pwm",
            Self::Latching => "latching",
            Self::Momentary => "momentary",
            Self::Pump => "pump",
            Self::Valve => "valve",
        };
        f.write_str(s)
    }
}

impl FromStr for ActuatorKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relay" => Ok(Self::Relay),
            "pwm" => Ok(Self::Pwm),
            "latching" => Ok(Self::Latching),
            "momentary" => Ok(Self::Momentary),
            "pump" => Ok(Self::Pump),
            "valve" => Ok(Self::Valve),
            _ => Err(format!("unknown actuator kind: {s:?}")),
        }
    }
}

// ─── SafeState ──────────────────────────────────────────────────────

/// Behaviour on controller loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeState {
    /// Drive the output off.
    #[default]
    Off,
    /// Drive the output on.
    On,
    /// Keep the last commanded state.
    Hold,
}

impl fmt::Display for SafeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Hold => "hold",
        })
    }
}

impl FromStr for SafeState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "on" => Ok(Self::On),
            "hold" => Ok(Self::Hold),
            _ => Err(format!("unknown safe state: {s:?}")),
        }
    }
}

// ─── Levels and states ──────────────────────────────────────────────

/// Requested or physical output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Off,
    On,
}

impl Level {
    #[inline]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    #[inline]
    pub const fn from_bool(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }

    #[inline]
    pub const fn toggled(&self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }

    /// Level and duty for a duty request. Duty 0 is off; anything else is
    /// on at that duty, clamped to `MAX_DUTY`.
    #[inline]
    pub fn for_duty(duty: u8) -> (Self, u8) {
        if duty == 0 {
            (Self::Off, 0)
        } else {
            (Self::On, duty.min(MAX_DUTY))
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_on() { "on" } else { "off" })
    }
}

/// Manager-level actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Off,
    On,
    /// Refusing commands until cleared (see `FaultReason`).
    Fault,
}

impl From<Level> for DesiredState {
    fn from(level: Level) -> Self {
        match level {
            Level::Off => Self::Off,
            Level::On => Self::On,
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Fault => "fault",
        })
    }
}

/// Who currently drives the output. Ordered by priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    /// PROFINET cyclic output.
    #[default]
    Bus,
    /// Operator override.
    Manual,
    /// Alarm interlock or emergency stop.
    Interlock,
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bus => "bus",
            Self::Manual => "manual",
            Self::Interlock => "interlock",
        })
    }
}

/// Why an actuator is in `DesiredState::Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultReason {
    /// Max-on time exceeded. Cleared by any successful re-command.
    Watchdog,
    /// Driver reported a hard fault or exhausted its retries.
    DriverHard,
    /// Driver `apply` exceeded the configured timeout.
    DriverTimeout,
}

impl FaultReason {
    /// Whether any command sink may clear the fault, rather than only an
    /// operator reset.
    #[inline]
    pub const fn cleared_by_recommand(&self) -> bool {
        matches!(self, Self::Watchdog)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Watchdog => "watchdog",
            Self::DriverHard => "driver fault",
            Self::DriverTimeout => "driver timeout",
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ActuatorConfig ─────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_pwm_frequency_hz() -> u32 {
    1000
}

/// Row of the `actuator` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Primary key.
    pub id: ActuatorId,
    /// Output slot; unique across actuators.
    pub slot: Slot,
    #[serde(default = "default_subslot")]
    pub subslot: Subslot,
    pub name: String,
    pub kind: ActuatorKind,
    pub gpio_pin: u32,
    #[serde(default)]
    pub gpio_chip: u32,
    #[serde(default)]
    pub active_low: bool,
    #[serde(default)]
    pub safe_state: SafeState,
    /// Minimum dwell [ms] before a transition is honored.
    #[serde(default)]
    pub min_on_time_ms: u64,
    /// Continuous on-time limit [ms]. 0 disables the watchdog.
    #[serde(default)]
    pub max_on_time_ms: u64,
    #[serde(default = "default_pwm_frequency_hz")]
    pub pwm_frequency_hz: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_subslot() -> Subslot {
    1
}

impl ActuatorConfig {
    /// Minimal enabled actuator with defaults for everything else.
    pub fn new(id: ActuatorId, slot: Slot, kind: ActuatorKind, gpio_pin: u32) -> Self {
        Self {
            id,
            slot,
            subslot: default_subslot(),
            name: format!("actuator-{id}"),
            kind,
            gpio_pin,
            gpio_chip: 0,
            active_low: false,
            safe_state: SafeState::Off,
            min_on_time_ms: 0,
            max_on_time_ms: 0,
            pwm_frequency_hz: default_pwm_frequency_hz(),
            enabled: true,
        }
    }

    /// Check the row in isolation (cross-row rules are enforced at admission).
    pub fn validate(&self) -> Result<(), RtuError> {
        if self.slot == 0 || self.slot > MAX_SLOT {
            return Err(RtuError::config_invalid(
                self.slot,
                format!("slot must be in 1..={MAX_SLOT}"),
            ));
        }
        if self.name.is_empty() {
            return Err(RtuError::config_invalid(self.slot, "name cannot be empty"));
        }
        if self.kind.uses_pwm_channel() && self.pwm_frequency_hz == 0 {
            return Err(RtuError::config_invalid(
                self.slot,
                "pwm_frequency_hz must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Duty actually sent to the driver for a requested level and duty.
    ///
    /// Kinds that do not honor duty run at 100 when on; off is always 0.
    #[inline]
    pub fn effective_duty(&self, level: Level, duty: u8) -> u8 {
        match level {
            Level::Off => 0,
            Level::On if self.kind.honors_duty() => duty.min(MAX_DUTY),
            Level::On => MAX_DUTY,
        }
    }
}

// ─── ActuatorStateRecord ────────────────────────────────────────────

/// Row of the `actuator_state` table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActuatorStateRecord {
    pub actuator_id: ActuatorId,
    /// 0 = off, 1 = on.
    pub state: u8,
    pub pwm_duty: u8,
    /// Wall-clock time of the last effective transition [ms since epoch].
    pub last_state_change: u64,
    pub total_on_time_ms: u64,
    /// Effective off→on transitions.
    pub cycle_count: u64,
    /// Accepted on-requests, whether or not they produced a transition.
    #[serde(default)]
    pub commanded_on_count: u64,
    #[serde(default)]
    pub fault_reason: Option<FaultReason>,
}

impl ActuatorStateRecord {
    #[inline]
    pub const fn level(&self) -> Level {
        Level::from_bool(self.state != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_capabilities() {
        assert!(ActuatorKind::Pwm.honors_duty());
        assert!(ActuatorKind::Pump.honors_duty());
        assert!(!ActuatorKind::Relay.honors_duty());
        assert!(!ActuatorKind::Valve.is_pwm_capable());
        assert!(ActuatorKind::Pump.symmetric_dwell());
        assert!(!ActuatorKind::Relay.symmetric_dwell());
        assert!(ActuatorKind::Pwm.uses_pwm_channel());
        assert!(!ActuatorKind::Pump.uses_pwm_channel());
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            ActuatorKind::Relay,
            ActuatorKind::Pwm,
            ActuatorKind::Latching,
            ActuatorKind::Momentary,
            ActuatorKind::Pump,
            ActuatorKind::Valve,
        ] {
            assert_eq!(kind.to_string().parse::<ActuatorKind>().unwrap(), kind);
        }
        assert!("heater".parse::<ActuatorKind>().is_err());
    }

    #[test]
    fn authority_priority_order() {
        assert!(Authority::Interlock > Authority::Manual);
        assert!(Authority::Manual > Authority::Bus);
    }

    #[test]
    fn effective_duty_normalizes_binary_kinds() {
        let relay = ActuatorConfig::new(1, 3, ActuatorKind::Relay, 17);
        assert_eq!(relay.effective_duty(Level::On, 30), 100);
        assert_eq!(relay.effective_duty(Level::Off, 30), 0);

        let pump = ActuatorConfig::new(2, 4, ActuatorKind::Pump, 18);
        assert_eq!(pump.effective_duty(Level::On, 30), 30);
        assert_eq!(pump.effective_duty(Level::On, 130), 100);
        assert_eq!(pump.effective_duty(Level::Off, 30), 0);
    }

    #[test]
    fn validate_rejects_zero_slot_and_zero_pwm_frequency() {
        let mut cfg = ActuatorConfig::new(1, 0, ActuatorKind::Relay, 17);
        assert!(matches!(cfg.validate(), Err(RtuError::ConfigInvalid { .. })));

        cfg.slot = 5;
        assert!(cfg.validate().is_ok());

        let mut pwm = ActuatorConfig::new(2, 6, ActuatorKind::Pwm, 0);
        pwm.pwm_frequency_hz = 0;
        assert!(pwm.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: ActuatorConfig = toml::from_str(
            r#"
id = 7
slot = 9
name = "feed pump"
kind = "pump"
gpio_pin = 22
safe_state = "hold"
min_on_time_ms = 5000
"#,
        )
        .unwrap();
        assert_eq!(cfg.subslot, 1);
        assert_eq!(cfg.safe_state, SafeState::Hold);
        assert_eq!(cfg.min_on_time_ms, 5000);
        assert_eq!(cfg.max_on_time_ms, 0);
        assert!(cfg.enabled);
        assert!(!cfg.active_low);
    }

    #[test]
    fn watchdog_fault_is_the_only_recommand_clearable_fault() {
        assert!(FaultReason::Watchdog.cleared_by_recommand());
        assert!(!FaultReason::DriverHard.cleared_by_recommand());
        assert!(!FaultReason::DriverTimeout.cleared_by_recommand());
    }
}
