//! Actuator driver trait and error types.
//!
//! This module defines:
//! - `ActuatorDriver` trait - Capability boundary to one physical output
//! - `DriverFault` enum - Outcome classes of a failed `apply`
//! - `DriverError` enum - Driver construction failures
//! - `DriverFactory` type alias - Factory closure type

use std::sync::Arc;
use thiserror::Error;

use crate::actuator::{ActuatorConfig, Level};

/// Failure of a single `apply` or `release`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverFault {
    /// The output may accept a retry (busy line, interrupted write).
    #[error("transient: {0}")]
    Transient(String),

    /// The output is unusable until serviced.
    #[error("hard: {0}")]
    Hard(String),
}

impl DriverFault {
    #[inline]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Underlying message without the class prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Hard(r) => r,
        }
    }
}

/// Error types for driver construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The line or channel could not be opened.
    #[error("output unavailable: {0}")]
    Unavailable(String),

    /// No backend with this name is registered.
    #[error("driver backend not found: {0}")]
    NotFound(String),
}

/// Factory creating a driver bound to one actuator.
pub type DriverFactory =
    Arc<dyn Fn(&ActuatorConfig) -> Result<Box<dyn ActuatorDriver>, DriverError> + Send + Sync>;

/// Capability boundary to one physical output (GPIO line or PWM channel).
///
/// The actuator manager owns each driver exclusively and serializes calls
/// per actuator.
///
/// # Contracts
///
/// | Operation | Contract |
/// |-----------|----------|
/// | `apply()` | Idempotent. May block for hardware settling (tens of ms). |
/// | `read_back()` | Last level/duty the hardware was driven to. |
/// | `release()` | Drives the output to the actuator's safe electrical state and frees it. |
pub trait ActuatorDriver: Send {
    /// Backend identifier (e.g., "simulation", "sysfs-gpio").
    fn name(&self) -> &'static str;

    /// Drive the output to `level` at `duty` percent.
    ///
    /// Binary outputs ignore `duty`. Applying the current level again must
    /// be harmless.
    fn apply(&mut self, level: Level, duty: u8) -> Result<(), DriverFault>;

    /// Level and duty the output was last driven to.
    fn read_back(&self) -> (Level, u8);

    /// Drive the output to its configured safe electrical state and give up
    /// the line. No further `apply` calls follow.
    fn release(&mut self) -> Result<(), DriverFault>;
}
