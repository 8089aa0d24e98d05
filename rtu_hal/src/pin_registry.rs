//! Exclusive ownership of hardware pins.
//!
//! Every `(chip, pin)` pair has at most one owner, either an actuator or a
//! GPIO-input sensor. The registry is consulted only at admission and
//! teardown, so a single lock is enough.

use core::fmt;
use parking_lot::Mutex;
use rtu_common::actuator::ActuatorId;
use rtu_common::sensor::SensorId;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Holder of a pin reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinOwner {
    /// Output line of an admitted actuator.
    Actuator(ActuatorId),
    /// Input line of a GPIO sensor.
    Sensor(SensorId),
}

impl fmt::Display for PinOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actuator(id) => write!(f, "actuator {id}"),
            Self::Sensor(id) => write!(f, "sensor {id}"),
        }
    }
}

/// `reserve` refused because the pair is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pin ({chip}, {pin}) already owned by {owner}")]
pub struct PinConflict {
    /// GPIO chip index.
    pub chip: u32,
    /// Line offset on the chip.
    pub pin: u32,
    /// Current holder.
    pub owner: PinOwner,
}

/// `(chip, pin)` to owner map.
#[derive(Debug, Default)]
pub struct PinRegistry {
    pins: Mutex<HashMap<(u32, u32), PinOwner>>,
}

impl PinRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `(chip, pin)` for `owner`.
    ///
    /// Reserving a pair already held by the same owner succeeds.
    pub fn reserve(&self, chip: u32, pin: u32, owner: PinOwner) -> Result<(), PinConflict> {
        let mut pins = self.pins.lock();
        match pins.get(&(chip, pin)) {
            Some(&current) if current != owner => Err(PinConflict {
                chip,
                pin,
                owner: current,
            }),
            _ => {
                pins.insert((chip, pin), owner);
                debug!(chip, pin, %owner, "pin reserved");
                Ok(())
            }
        }
    }

    /// Drop every reservation held by `owner`. Returns how many were held.
    pub fn release(&self, owner: PinOwner) -> usize {
        let mut pins = self.pins.lock();
        let before = pins.len();
        pins.retain(|_, held| *held != owner);
        let released = before - pins.len();
        if released > 0 {
            debug!(%owner, released, "pins released");
        }
        released
    }

    /// Current holder of `(chip, pin)`.
    pub fn owner_of(&self, chip: u32, pin: u32) -> Option<PinOwner> {
        self.pins.lock().get(&(chip, pin)).copied()
    }

    /// Number of reserved pairs.
    pub fn len(&self) -> usize {
        self.pins.lock().len()
    }

    /// Whether no pin is reserved.
    pub fn is_empty(&self) -> bool {
        self.pins.lock().is_empty()
    }
}
