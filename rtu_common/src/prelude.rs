//! Prelude module for common re-exports.
//!
//! ```rust
//! use rtu_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, RtuConfig, SharedConfig};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::clock::{Clock, Deadline, ManualClock, MonotonicClock};

// ─── Domain ─────────────────────────────────────────────────────────
pub use crate::actuator::{
    ActuatorConfig, ActuatorId, ActuatorKind, ActuatorStateRecord, Authority, DesiredState,
    FaultReason, Level, SafeState, Slot, Subslot,
};
pub use crate::alarm::{
    AlarmCondition, AlarmOccurrence, AlarmRule, InterlockAction, InterlockSpec, OccurrenceId,
    OccurrenceState, RuleId,
};
pub use crate::journal::{EventSource, JournalEntry, Severity};
pub use crate::link::{LinkState, LinkTransition};
pub use crate::sensor::{GpioBinding, Quality, SensorDescriptor, SensorId, SensorSample};

// ─── Drivers & errors ───────────────────────────────────────────────
pub use crate::driver::{ActuatorDriver, DriverError, DriverFactory, DriverFault};
pub use crate::error::RtuError;
