//! Error kinds surfaced by the control plane.
//!
//! Every actuator-related variant carries the slot and a short reason so
//! user-visible failures can be reported without further lookups.

use thiserror::Error;

use crate::actuator::Slot;

/// Errors returned by admission, command sinks and operator commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtuError {
    /// Rejected at admission or rule validation; nothing was applied.
    #[error("slot {slot}: invalid configuration: {reason}")]
    ConfigInvalid { slot: Slot, reason: String },

    /// Driver construction failed; the actuator was not admitted.
    #[error("slot {slot}: hardware unavailable: {reason}")]
    HardwareUnavailable { slot: Slot, reason: String },

    /// `apply` failed but a retry succeeded or is still possible.
    #[error("slot {slot}: transient driver fault: {reason}")]
    DriverTransient { slot: Slot, reason: String },

    /// Driver failed hard; the actuator is faulted until an operator reset.
    #[error("slot {slot}: driver fault: {reason}")]
    DriverHard { slot: Slot, reason: String },

    /// The slot is already held by another rule's interlock.
    #[error("slot {slot}: interlock already held by rule {held_by}")]
    InterlockConflict { slot: Slot, held_by: u32 },

    /// Bus command while the controller link is down.
    #[error("slot {slot}: controller link down, bus command skipped")]
    DegradedSkip { slot: Slot },

    /// Durable write failed; the in-memory transition stands.
    #[error("persistence failure: {reason}")]
    PersistenceFailure { reason: String },

    /// No actuator is admitted on this slot.
    #[error("slot {slot}: no actuator admitted")]
    UnknownSlot { slot: Slot },

    /// The actuator is faulted and refuses this command.
    #[error("slot {slot}: faulted ({reason}), operator reset required")]
    Faulted { slot: Slot, reason: String },

    /// Emergency stop is latched; only `reset_estop` re-opens the slot.
    #[error("slot {slot}: emergency stop active")]
    EmergencyStopActive { slot: Slot },

    /// A higher-priority authority holds the slot.
    #[error("slot {slot}: held by interlock (rule {rule_id})")]
    InterlockHeld { slot: Slot, rule_id: u32 },

    /// No alarm occurrence with this id.
    #[error("alarm occurrence {id} not found")]
    UnknownOccurrence { id: u64 },
}

impl RtuError {
    pub fn config_invalid(slot: Slot, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            slot,
            reason: reason.into(),
        }
    }

    /// Slot concerned by the error, if any.
    pub fn slot(&self) -> Option<Slot> {
        match self {
            Self::ConfigInvalid { slot, .. }
            | Self::HardwareUnavailable { slot, .. }
            | Self::DriverTransient { slot, .. }
            | Self::DriverHard { slot, .. }
            | Self::InterlockConflict { slot, .. }
            | Self::DegradedSkip { slot }
            | Self::UnknownSlot { slot }
            | Self::Faulted { slot, .. }
            | Self::EmergencyStopActive { slot }
            | Self::InterlockHeld { slot, .. } => Some(*slot),
            Self::PersistenceFailure { .. } | Self::UnknownOccurrence { .. } => None,
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config_invalid",
            Self::HardwareUnavailable { .. } => "hardware_unavailable",
            Self::DriverTransient { .. } => "driver_transient",
            Self::DriverHard { .. } => "driver_hard",
            Self::InterlockConflict { .. } => "interlock_conflict",
            Self::DegradedSkip { .. } => "degraded_skip",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::UnknownSlot { .. } => "unknown_slot",
            Self::Faulted { .. } => "faulted",
            Self::EmergencyStopActive { .. } => "estop_active",
            Self::InterlockHeld { .. } => "interlock_held",
            Self::UnknownOccurrence { .. } => "unknown_occurrence",
        }
    }
}
