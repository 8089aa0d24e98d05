//! Shared rig: a control plane on the simulation backend with a
//! hand-driven clock.

#![allow(dead_code)]

use rtu_common::actuator::{ActuatorConfig, ActuatorKind, Level, SafeState, Slot};
use rtu_common::clock::{Clock, ManualClock};
use rtu_common::config::RtuConfig;
use rtu_common::error::RtuError;
use rtu_common::journal::{EventSource, JournalEntry, Severity};
use rtu_common::link::LinkState;
use rtu_common::sensor::{SensorDescriptor, SensorSample};
use rtu_core::RtuContext;
use rtu_core::bridge::{OutputFrame, OutputPayload};
use rtu_core::manager::CommandOutcome;
use rtu_core::persistence::{JsonStore, PersistenceGateway};
use rtu_core::provision::Provisioning;
use rtu_hal::DriverRegistry;
use rtu_hal::drivers::{SimulationBank, register_all_drivers, simulation};
use std::sync::Arc;

pub const WALL_ORIGIN_MS: u64 = 1_700_000_000_000;

/// Config used by every rig: simulation backend, no retry backoff.
pub fn test_config() -> RtuConfig {
    let mut config = RtuConfig::default();
    config.hal.backend = simulation::BACKEND_NAME.to_string();
    config.actuators.retry_backoff_ms = 0;
    config
}

/// Actuator on chip 0 with a readable name.
pub fn actuator(id: u32, slot: Slot, kind: ActuatorKind, pin: u32) -> ActuatorConfig {
    let mut a = ActuatorConfig::new(id, slot, kind, pin);
    a.name = format!("{kind} {slot}");
    a
}

pub fn with_safe_state(mut a: ActuatorConfig, safe_state: SafeState) -> ActuatorConfig {
    a.safe_state = safe_state;
    a
}

pub fn sensor(id: u32, name: &str) -> SensorDescriptor {
    SensorDescriptor {
        id,
        name: name.to_string(),
        kind: "adc".to_string(),
        unit: String::new(),
        gpio: None,
        max_age_ms: 0,
        enabled: true,
    }
}

pub struct Rig {
    pub ctx: RtuContext,
    pub clock: Arc<ManualClock>,
    pub bank: SimulationBank,
    pub store: Arc<dyn PersistenceGateway>,
}

impl Rig {
    /// Provision an in-memory store and boot on it.
    pub fn boot(provisioning: Provisioning) -> Self {
        let store: Arc<dyn PersistenceGateway> = Arc::new(JsonStore::in_memory());
        provisioning.apply(store.as_ref()).unwrap();
        Self::boot_on(
            store,
            SimulationBank::new(),
            Arc::new(ManualClock::with_wall_origin(WALL_ORIGIN_MS)),
        )
    }

    /// Boot on an existing store and bank, e.g. to simulate a restart.
    pub fn boot_on(
        store: Arc<dyn PersistenceGateway>,
        bank: SimulationBank,
        clock: Arc<ManualClock>,
    ) -> Self {
        let config = test_config();
        let mut registry = DriverRegistry::new();
        register_all_drivers(&mut registry, bank.clone());
        let ctx = RtuContext::bootstrap(config, registry, store.clone(), clock.clone()).unwrap();
        Self {
            ctx,
            clock,
            bank,
            store,
        }
    }

    pub fn at(&self, t_ms: u64) {
        self.clock.set(t_ms);
    }

    /// Two empty cycles confirm the controller link.
    pub fn link_up(&self) {
        self.ctx.on_output_cycle(&[]);
        self.ctx.on_output_cycle(&[]);
        assert_eq!(self.ctx.link_state(), LinkState::Up);
    }

    /// Advance in watchdog periods up to `t_ms`, keeping the link alive with
    /// empty cycles and running the watchdog after each one.
    pub fn step_to(&self, t_ms: u64) {
        let period = self.ctx.config().actuators.watchdog_period_ms;
        let mut t = self.clock.now_ms();
        while t < t_ms {
            t = (t + period).min(t_ms);
            self.clock.set(t);
            self.ctx.on_output_cycle(&[]);
            self.ctx.watchdog_tick();
        }
    }

    /// One bus frame for `slot` on subslot 1.
    pub fn bus(&self, slot: Slot, payload: OutputPayload) -> Result<CommandOutcome, RtuError> {
        let frame = OutputFrame::new(slot, 1, &payload.to_bytes()).unwrap();
        self.ctx.on_output_frame(&frame)
    }

    pub fn sample(&self, sensor_id: u32, value: f32) {
        self.ctx
            .publish_sample(SensorSample::ok(sensor_id, value, self.clock.now_ms()));
    }

    /// Physical level of the simulated line on chip 0.
    pub fn line(&self, pin: u32) -> Level {
        self.bank.level(0, pin).map_or(Level::Off, |(level, _)| level)
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.ctx.journal().recent(500).unwrap()
    }

    pub fn journaled(&self, source: EventSource, severity: Severity, needle: &str) -> bool {
        self.journal()
            .iter()
            .any(|e| e.source == source && e.severity == severity && e.message.contains(needle))
    }
}
