//! Top-level context.
//!
//! Owns every control-plane component and is passed by reference to the
//! runtime tasks and the operator surface. Construction order follows the
//! ownership rules: the pin registry exists before any actuator is
//! admitted, sensors reserve their pins before actuators, and the liveness
//! monitor is wired to the manager's degraded-mode sink.
//!
//! # Operator commands
//!
//! | Command | Effect |
//! |---------|--------|
//! | [`toggle`](RtuContext::toggle) | manual on/off flip |
//! | [`set_duty`](RtuContext::set_duty) | manual duty, duty-capable kinds only |
//! | [`emergency_stop`](RtuContext::emergency_stop) | all off, latched |
//! | [`reset_estop`](RtuContext::reset_estop) | clear latch and interlocks |
//! | [`acknowledge_alarm`](RtuContext::acknowledge_alarm) | acknowledge an occurrence |

use rtu_common::actuator::{Level, Slot};
use rtu_common::alarm::{OccurrenceId, OccurrenceState};
use rtu_common::clock::Clock;
use rtu_common::config::RtuConfig;
use rtu_common::consts::MAX_DUTY;
use rtu_common::error::RtuError;
use rtu_common::journal::EventSource;
use rtu_common::link::LinkState;
use rtu_common::sensor::SensorSample;
use rtu_hal::{DriverRegistry, PinOwner, PinRegistry};
use std::sync::Arc;
use tracing::{info, warn};

use crate::alarm::AlarmEngine;
use crate::bridge::{OutputBridge, OutputFrame};
use crate::journal::Journal;
use crate::liveness::{LinkObserver, LivenessMonitor};
use crate::manager::{ActuatorManager, ActuatorStatus, CommandOutcome, ManagerSettings};
use crate::persistence::PersistenceGateway;
use crate::sample_bus::SampleBus;

/// The assembled control plane.
pub struct RtuContext {
    config: RtuConfig,
    store: Arc<dyn PersistenceGateway>,
    journal: Arc<Journal>,
    pins: Arc<PinRegistry>,
    samples: Arc<SampleBus>,
    manager: Arc<ActuatorManager>,
    liveness: Arc<LivenessMonitor>,
    bridge: OutputBridge,
    alarms: AlarmEngine,
    sensor_owners: Vec<PinOwner>,
}

impl RtuContext {
    /// Build the control plane from the store contents.
    ///
    /// Actuators that fail admission and rules that fail validation are
    /// journaled and left out; the rest of the system still starts.
    pub fn bootstrap(
        config: RtuConfig,
        registry: DriverRegistry,
        store: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RtuError> {
        config
            .validate()
            .map_err(|e| RtuError::config_invalid(0, e.to_string()))?;

        let journal = Arc::new(Journal::new(store.clone(), clock.clone()));
        journal.info(
            EventSource::System,
            format!("{} starting", config.shared.service_name),
        );

        let pins = Arc::new(PinRegistry::new());
        let sensors = store.list_sensors()?;
        let mut sensor_owners = Vec::new();
        for sensor in sensors.iter().filter(|s| s.enabled) {
            let Some(gpio) = sensor.gpio else {
                continue;
            };
            let owner = PinOwner::Sensor(sensor.id);
            match pins.reserve(gpio.chip, gpio.pin, owner) {
                Ok(()) => sensor_owners.push(owner),
                Err(e) => journal.error(
                    EventSource::System,
                    format!("sensor {} ({}): {e}", sensor.id, sensor.name),
                ),
            }
        }

        let manager = Arc::new(ActuatorManager::new(
            ManagerSettings::from_config(&config),
            registry,
            pins.clone(),
            store.clone(),
            journal.clone(),
            clock.clone(),
        ));
        let mut actuators = store.list_actuators()?;
        actuators.sort_by_key(|a| a.slot);
        let refused = manager.admit_all(actuators);

        let observer: Arc<dyn LinkObserver> = manager.clone();
        let liveness = Arc::new(LivenessMonitor::new(
            config.controller.up_timeout_ms,
            clock.clone(),
            journal.clone(),
            observer,
        ));
        let bridge = OutputBridge::new(manager.clone(), liveness.clone(), journal.clone());

        let samples = Arc::new(SampleBus::new());
        let alarms = AlarmEngine::new(
            samples.clone(),
            manager.clone(),
            store.clone(),
            journal.clone(),
            clock,
            config.alarms.stale_read_threshold,
        );
        alarms.set_sensors(&sensors);
        let rejected = alarms.load_rules(store.list_alarm_rules()?);

        info!(
            actuators = manager.slots().len(),
            refused = refused.len(),
            sensors = sensors.len(),
            rejected_rules = rejected.len(),
            backend = %config.hal.backend,
            "control plane ready"
        );

        Ok(Self {
            config,
            store,
            journal,
            pins,
            samples,
            manager,
            liveness,
            bridge,
            alarms,
            sensor_owners,
        })
    }

    // ─── Inputs ─────────────────────────────────────────────────────

    /// One decoded output frame from the controller.
    pub fn on_output_frame(&self, frame: &OutputFrame) -> Result<CommandOutcome, RtuError> {
        self.bridge.handle_frame(frame)
    }

    /// All slot payloads of one controller cycle.
    pub fn on_output_cycle(
        &self,
        frames: &[OutputFrame],
    ) -> Vec<(Slot, Result<CommandOutcome, RtuError>)> {
        self.bridge.handle_cycle(frames)
    }

    /// Sensor sample from an acquisition driver.
    pub fn publish_sample(&self, sample: SensorSample) {
        self.samples.publish(sample);
    }

    // ─── Periodic work ──────────────────────────────────────────────

    /// Watchdog period: link timeout, then actuator timers.
    pub fn watchdog_tick(&self) {
        self.liveness.poll();
        self.manager.tick();
    }

    /// Alarm period.
    pub fn alarm_tick(&self) {
        self.alarms.tick();
    }

    /// Drop journal entries past the configured retention.
    pub fn journal_cleanup(&self) -> Result<usize, RtuError> {
        Ok(self
            .journal
            .cleanup(self.config.storage.journal_retention_days)?)
    }

    // ─── Operator commands ──────────────────────────────────────────

    /// Flip the output manually. On an actuator with a driver fault the
    /// toggle is always off, which resets the fault.
    pub fn toggle(&self, slot: Slot) -> Result<CommandOutcome, RtuError> {
        let status = self.manager.status(slot)?;
        let target = match (status.fault_reason, status.pending) {
            (Some(reason), _) if !reason.cleared_by_recommand() => Level::Off,
            (_, Some((level, _, _))) => level.toggled(),
            (_, None) => status.level.toggled(),
        };
        self.journal.info(
            EventSource::Operator,
            format!("slot {slot}: toggle to {target}"),
        );
        self.manager.manual_set(slot, target, MAX_DUTY)
    }

    /// Set a manual duty; 0 turns the output off.
    pub fn set_duty(&self, slot: Slot, duty: u8) -> Result<CommandOutcome, RtuError> {
        let config = self
            .manager
            .config_of(slot)
            .ok_or(RtuError::UnknownSlot { slot })?;
        if !config.kind.honors_duty() {
            return Err(RtuError::config_invalid(
                slot,
                format!("{} does not take a duty cycle", config.kind),
            ));
        }
        if duty > MAX_DUTY {
            return Err(RtuError::config_invalid(
                slot,
                format!("duty {duty} above {MAX_DUTY}"),
            ));
        }
        self.journal.info(
            EventSource::Operator,
            format!("slot {slot}: duty set to {duty}"),
        );
        let (level, duty) = Level::for_duty(duty);
        self.manager.manual_set(slot, level, duty)
    }

    pub fn emergency_stop(&self) -> Result<(), RtuError> {
        self.manager.emergency_stop()
    }

    /// Returns the number of interlock latches dropped.
    pub fn reset_estop(&self) -> usize {
        self.manager.reset_estop()
    }

    pub fn acknowledge_alarm(
        &self,
        id: OccurrenceId,
        user: &str,
    ) -> Result<OccurrenceState, RtuError> {
        self.alarms.acknowledge(id, user)
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn actuator_status(&self, slot: Slot) -> Result<ActuatorStatus, RtuError> {
        self.manager.status(slot)
    }

    pub fn actuator_statuses(&self) -> Vec<ActuatorStatus> {
        self.manager.statuses()
    }

    pub fn link_state(&self) -> LinkState {
        self.liveness.state()
    }

    pub fn config(&self) -> &RtuConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ActuatorManager> {
        &self.manager
    }

    pub fn alarms(&self) -> &AlarmEngine {
        &self.alarms
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn samples(&self) -> &Arc<SampleBus> {
        &self.samples
    }

    pub fn pins(&self) -> &Arc<PinRegistry> {
        &self.pins
    }

    pub fn store(&self) -> &Arc<dyn PersistenceGateway> {
        &self.store
    }

    // ─── Teardown ───────────────────────────────────────────────────

    /// Release actuators (reverse admission order), then sensor pins.
    pub fn shutdown(&self) {
        self.manager.shutdown();
        for owner in &self.sensor_owners {
            self.pins.release(*owner);
        }
        if !self.pins.is_empty() {
            warn!(remaining = self.pins.len(), "pins still reserved after shutdown");
        }
        self.journal.info(
            EventSource::System,
            format!("{} stopped", self.config.shared.service_name),
        );
    }
}
