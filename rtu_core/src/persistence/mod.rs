//! Persistence gateway.
//!
//! Typed access to actuator configuration, actuator runtime state, the
//! sensor registry, alarm rules, alarm occurrences and the event journal.
//! The store behind the gateway is hidden; [`JsonStore`] is the bundled
//! implementation.
//!
//! Implementations serialize their own writes. Callers may invoke the
//! gateway from any thread.

mod json_store;

pub use json_store::JsonStore;

use rtu_common::actuator::{ActuatorConfig, ActuatorId, ActuatorStateRecord};
use rtu_common::alarm::{AlarmOccurrence, AlarmRule, OccurrenceId, RuleId};
use rtu_common::error::RtuError;
use rtu_common::journal::JournalEntry;
use rtu_common::sensor::{SensorDescriptor, SensorId};
use thiserror::Error;

/// Store-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("store I/O failed: {0}")]
    Io(String),

    /// The store content could not be encoded or decoded.
    #[error("store encoding failed: {0}")]
    Serialize(String),

    /// Referenced row does not exist.
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u64 },

    /// A uniqueness or reference rule was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl From<PersistenceError> for RtuError {
    fn from(e: PersistenceError) -> Self {
        RtuError::PersistenceFailure {
            reason: e.to_string(),
        }
    }
}

/// Typed operations the control plane needs from the store.
pub trait PersistenceGateway: Send + Sync {
    // ─── Actuators ──────────────────────────────────────────────────

    /// All configured actuators, ordered by id.
    fn list_actuators(&self) -> Result<Vec<ActuatorConfig>, PersistenceError>;

    /// Insert or replace by id. Fails with `Constraint` if another actuator
    /// already uses the slot.
    fn upsert_actuator(&self, config: &ActuatorConfig) -> Result<(), PersistenceError>;

    /// Delete an actuator and its runtime state.
    fn delete_actuator(&self, id: ActuatorId) -> Result<(), PersistenceError>;

    /// Last persisted runtime state of an actuator.
    fn load_actuator_state(
        &self,
        id: ActuatorId,
    ) -> Result<Option<ActuatorStateRecord>, PersistenceError>;

    /// Upsert runtime state (state, duty, counters).
    fn save_actuator_state(&self, record: &ActuatorStateRecord) -> Result<(), PersistenceError>;

    // ─── Sensors ────────────────────────────────────────────────────

    /// Registered sensors, ordered by id.
    fn list_sensors(&self) -> Result<Vec<SensorDescriptor>, PersistenceError>;

    /// Insert or replace by id.
    fn upsert_sensor(&self, sensor: &SensorDescriptor) -> Result<(), PersistenceError>;

    // ─── Alarm rules ────────────────────────────────────────────────

    /// All alarm rules, ordered by id.
    fn list_alarm_rules(&self) -> Result<Vec<AlarmRule>, PersistenceError>;

    /// Insert or replace by id.
    fn upsert_alarm_rule(&self, rule: &AlarmRule) -> Result<(), PersistenceError>;

    /// Delete a rule. Its occurrences are kept.
    fn delete_alarm_rule(&self, id: RuleId) -> Result<(), PersistenceError>;

    // ─── Occurrences ────────────────────────────────────────────────

    /// Store a new occurrence; the store assigns and returns its id.
    fn insert_occurrence(&self, occurrence: &AlarmOccurrence)
    -> Result<OccurrenceId, PersistenceError>;

    /// Overwrite an existing occurrence.
    fn update_occurrence(&self, occurrence: &AlarmOccurrence) -> Result<(), PersistenceError>;

    /// Fetch one occurrence.
    fn get_occurrence(&self, id: OccurrenceId)
    -> Result<Option<AlarmOccurrence>, PersistenceError>;

    // ─── Journal ────────────────────────────────────────────────────

    /// Append one entry; the store assigns and returns its id.
    fn append_event(&self, entry: &JournalEntry) -> Result<u64, PersistenceError>;

    /// Most recent `limit` entries, oldest first.
    fn recent_events(&self, limit: usize) -> Result<Vec<JournalEntry>, PersistenceError>;

    /// Remove entries with `ts < cutoff_ms`. Returns how many were removed.
    fn cleanup_events(&self, cutoff_ms: u64) -> Result<usize, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_maps_to_failure_kind() {
        let err: RtuError = PersistenceError::Io("disk full".into()).into();
        match err {
            RtuError::PersistenceFailure { reason } => assert!(reason.contains("disk full")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
