//! Actuator admission, removal and shutdown.
//!
//! Admission validates a configuration, claims its output line, opens a
//! driver and drives the startup state:
//!
//! | `safe_state` | Startup output |
//! |--------------|----------------|
//! | `off` | off |
//! | `on` | on at full duty |
//! | `hold` | last persisted state, off when none |
//!
//! The startup drive bypasses the dwell. A driver that fails it leaves the
//! actuator admitted but faulted.

use parking_lot::Mutex;
use rtu_common::actuator::{ActuatorConfig, DesiredState, Level, SafeState, Slot};
use rtu_common::consts::{MAX_ACTUATORS, MAX_DUTY};
use rtu_common::error::RtuError;
use rtu_common::journal::EventSource;
use rtu_hal::PinOwner;
use std::sync::Arc;
use tracing::{info, warn};

use super::envelope::OnTimeMeter;
use super::{ActuatorCell, ActuatorManager, Origin};
use crate::persistence::PersistenceError;

impl ActuatorManager {
    /// Admit one actuator.
    ///
    /// # Errors
    ///
    /// - `ConfigInvalid`: invalid or disabled config, table full, duplicate
    ///   slot or id, output line already owned.
    /// - `HardwareUnavailable`: the backend could not open the output.
    pub fn admit(&self, config: ActuatorConfig) -> Result<(), RtuError> {
        config.validate()?;
        let slot = config.slot;
        if !config.enabled {
            return Err(RtuError::config_invalid(slot, "actuator is disabled"));
        }
        {
            let table = self.table.lock();
            if table.cells.len() >= MAX_ACTUATORS {
                return Err(RtuError::config_invalid(
                    slot,
                    format!("actuator table full ({MAX_ACTUATORS})"),
                ));
            }
            if table.cells.contains_key(&slot) {
                return Err(RtuError::config_invalid(slot, "slot already admitted"));
            }
            if table.cells.values().any(|c| c.lock().config.id == config.id) {
                return Err(RtuError::config_invalid(
                    slot,
                    format!("actuator id {} already admitted", config.id),
                ));
            }
        }

        let owner = PinOwner::Actuator(config.id);
        self.pins
            .reserve(config.gpio_chip, config.gpio_pin, owner)
            .map_err(|e| RtuError::config_invalid(slot, e.to_string()))?;

        let mut driver = match self.registry.create_driver(&self.settings.backend, &config) {
            Ok(driver) => driver,
            Err(e) => {
                self.pins.release(owner);
                self.journal.error(
                    EventSource::Actuator,
                    format!("slot {slot} ({}): driver unavailable: {e}", config.name),
                );
                return Err(RtuError::HardwareUnavailable {
                    slot,
                    reason: e.to_string(),
                });
            }
        };

        // Written only once the output is open, so a refused admission
        // leaves no row behind.
        match self.store.upsert_actuator(&config) {
            Ok(()) => {}
            Err(PersistenceError::Constraint(reason)) => {
                if let Err(fault) = driver.release() {
                    warn!(slot, error = %fault, "driver release after refused admission failed");
                }
                self.pins.release(owner);
                return Err(RtuError::config_invalid(slot, reason));
            }
            Err(e) => self.journal.error(
                EventSource::Persistence,
                format!("slot {slot}: actuator config not stored: {e}"),
            ),
        }

        let record = self.store.load_actuator_state(config.id).unwrap_or_else(|e| {
            warn!(slot, error = %e, "persisted state unreadable, starting fresh");
            None
        });
        let now = self.clock.now_ms();
        let (restored_level, restored_duty) =
            record.as_ref().map_or((Level::Off, 0), |r| (r.level(), r.pwm_duty));
        let (level, duty) = match config.safe_state {
            SafeState::Off => (Level::Off, 0),
            SafeState::On => (Level::On, config.effective_duty(Level::On, MAX_DUTY)),
            SafeState::Hold => (restored_level, restored_duty),
        };

        let (link, estop) = {
            let table = self.table.lock();
            (table.link, table.estop)
        };
        let mut cell = ActuatorCell {
            driver,
            level: restored_level,
            duty: restored_duty,
            desired: DesiredState::from(restored_level),
            fault: None,
            last_transition_ms: None,
            last_command_ms: None,
            last_state_change_wall: record.as_ref().map_or(0, |r| r.last_state_change),
            on_since_ms: restored_level.is_on().then_some(now),
            meter: OnTimeMeter::new(record.as_ref().map_or(0, |r| r.total_on_time_ms), now),
            cycle_count: record.as_ref().map_or(0, |r| r.cycle_count),
            commanded_on_count: record.as_ref().map_or(0, |r| r.commanded_on_count),
            pending: None,
            bus_intent: None,
            manual: None,
            interlock: None,
            estop,
            degraded: !link.accepts_bus(),
            config,
        };

        let (level, duty) = if estop { (Level::Off, 0) } else { (level, duty) };
        if let Err(e) = self.drive(&mut cell, level, duty, Origin::Restore, now) {
            warn!(slot, error = %e, "startup state not applied");
        }

        info!(
            slot,
            id = cell.config.id,
            kind = %cell.config.kind,
            level = %cell.level,
            "actuator admitted"
        );
        self.journal.info(
            EventSource::Actuator,
            format!(
                "{}: admitted as {} on {}:{}, safe state {}",
                cell.label(),
                cell.config.kind,
                cell.config.gpio_chip,
                cell.config.gpio_pin,
                cell.config.safe_state
            ),
        );

        let mut table = self.table.lock();
        if table.cells.contains_key(&slot) {
            // Lost a race with a concurrent admission of the same slot.
            drop(table);
            self.retire(cell);
            return Err(RtuError::config_invalid(slot, "slot already admitted"));
        }
        table.cells.insert(slot, Arc::new(Mutex::new(cell)));
        table.order.push(slot);
        Ok(())
    }

    /// Admit every enabled config. Failures are journaled and returned;
    /// the remaining actuators are still admitted.
    pub fn admit_all(&self, configs: impl IntoIterator<Item = ActuatorConfig>) -> Vec<RtuError> {
        let mut failures = Vec::new();
        for config in configs {
            if !config.enabled {
                info!(slot = config.slot, "actuator disabled, skipped");
                continue;
            }
            let slot = config.slot;
            if let Err(e) = self.admit(config) {
                self.journal.error(
                    EventSource::Actuator,
                    format!("slot {slot}: admission refused: {e}"),
                );
                failures.push(e);
            }
        }
        failures
    }

    /// Release one actuator's driver and output line.
    pub fn remove(&self, slot: Slot) -> Result<(), RtuError> {
        let cell = {
            let mut table = self.table.lock();
            let cell = table
                .cells
                .remove(&slot)
                .ok_or(RtuError::UnknownSlot { slot })?;
            table.order.retain(|s| *s != slot);
            cell
        };
        let cell = Self::into_cell(cell);
        self.retire(cell);
        Ok(())
    }

    /// Release every actuator in reverse admission order, persisting the
    /// final state of each.
    pub fn shutdown(&self) {
        let cells: Vec<_> = {
            let mut table = self.table.lock();
            let order = std::mem::take(&mut table.order);
            order
                .into_iter()
                .rev()
                .filter_map(|slot| table.cells.remove(&slot))
                .collect()
        };
        let count = cells.len();
        for cell in cells {
            self.retire(Self::into_cell(cell));
        }
        self.journal.info(
            EventSource::System,
            format!("{count} actuator(s) released"),
        );
    }

    fn into_cell(cell: Arc<Mutex<ActuatorCell>>) -> ActuatorCell {
        match Arc::try_unwrap(cell) {
            Ok(m) => m.into_inner(),
            // A command still holds a reference; wait for its lock and
            // take the state over.
            Err(shared) => {
                let mut guard = shared.lock();
                let placeholder = guard.detached_copy();
                std::mem::replace(&mut *guard, placeholder)
            }
        }
    }

    fn retire(&self, mut cell: ActuatorCell) {
        let now = self.clock.now_ms();
        cell.meter.advance(cell.level, now);
        let label = cell.label();
        if let Err(fault) = cell.driver.release() {
            self.journal.error(
                EventSource::Actuator,
                format!("{label}: driver release failed: {}", fault.reason()),
            );
        }
        // Release may drive the safe state.
        let (level, duty) = cell.driver.read_back();
        if level != cell.level {
            cell.last_state_change_wall = self.clock.wall_ms();
        }
        cell.level = level;
        cell.duty = duty;
        let released = self.pins.release(PinOwner::Actuator(cell.config.id));
        let _ = self.persist(&cell);
        info!(slot = cell.config.slot, pins = released, "actuator released");
        self.journal
            .info(EventSource::Actuator, format!("{label}: released"));
    }
}

impl ActuatorCell {
    /// State-only copy with an inert driver.
    fn detached_copy(&self) -> ActuatorCell {
        ActuatorCell {
            config: self.config.clone(),
            driver: Box::new(Detached),
            level: self.level,
            duty: self.duty,
            desired: self.desired,
            fault: self.fault,
            last_transition_ms: self.last_transition_ms,
            last_command_ms: self.last_command_ms,
            last_state_change_wall: self.last_state_change_wall,
            on_since_ms: self.on_since_ms,
            meter: self.meter,
            cycle_count: self.cycle_count,
            commanded_on_count: self.commanded_on_count,
            pending: None,
            bus_intent: self.bus_intent,
            manual: None,
            interlock: None,
            estop: self.estop,
            degraded: self.degraded,
        }
    }
}

/// Driver left behind in a retired cell.
struct Detached;

impl rtu_common::driver::ActuatorDriver for Detached {
    fn name(&self) -> &'static str {
        "detached"
    }

    fn apply(&mut self, _level: Level, _duty: u8) -> Result<(), rtu_common::driver::DriverFault> {
        Err(rtu_common::driver::DriverFault::Hard(
            "actuator removed".to_string(),
        ))
    }

    fn read_back(&self) -> (Level, u8) {
        (Level::Off, 0)
    }

    fn release(&mut self) -> Result<(), rtu_common::driver::DriverFault> {
        Ok(())
    }
}
