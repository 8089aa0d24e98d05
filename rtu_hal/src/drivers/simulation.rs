//! Simulation output driver.
//!
//! Simulated lines live in a shared [`SimulationBank`] keyed by
//! `(chip, pin)`. The bank outlives individual drivers, so a line keeps its
//! level across a driver release and re-open the way real hardware does.
//! Tests use the bank to read the physical level, inspect the transition
//! history, inject faults and slow down `apply`.

use parking_lot::Mutex;
use rtu_common::actuator::{ActuatorConfig, Level, SafeState};
use rtu_common::consts::MAX_DUTY;
use rtu_common::driver::{ActuatorDriver, DriverError, DriverFactory, DriverFault};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "simulation";

type LineKey = (u32, u32);

#[derive(Debug, Default)]
struct SimulatedLine {
    level: Level,
    duty: u8,
    /// Physical changes in order.
    history: Vec<(Level, u8)>,
    apply_count: u64,
    faults: VecDeque<DriverFault>,
    latency: Duration,
    released: bool,
}

#[derive(Debug, Default)]
struct BankInner {
    lines: HashMap<LineKey, SimulatedLine>,
    unavailable: HashSet<LineKey>,
}

/// Shared store of simulated output lines.
#[derive(Debug, Clone, Default)]
pub struct SimulationBank {
    inner: Arc<Mutex<BankInner>>,
}

impl SimulationBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical level and duty of a line, if it was ever opened.
    pub fn level(&self, chip: u32, pin: u32) -> Option<(Level, u8)> {
        self.inner
            .lock()
            .lines
            .get(&(chip, pin))
            .map(|l| (l.level, l.duty))
    }

    /// Whether the line is currently driven on.
    pub fn is_on(&self, chip: u32, pin: u32) -> bool {
        self.level(chip, pin).is_some_and(|(level, _)| level.is_on())
    }

    /// Physical changes applied to a line, oldest first.
    pub fn history(&self, chip: u32, pin: u32) -> Vec<(Level, u8)> {
        self.inner
            .lock()
            .lines
            .get(&(chip, pin))
            .map(|l| l.history.clone())
            .unwrap_or_default()
    }

    /// Number of successful `apply` calls, changes or not.
    pub fn apply_count(&self, chip: u32, pin: u32) -> u64 {
        self.inner
            .lock()
            .lines
            .get(&(chip, pin))
            .map_or(0, |l| l.apply_count)
    }

    /// Whether the last driver on this line released it.
    pub fn is_released(&self, chip: u32, pin: u32) -> bool {
        self.inner
            .lock()
            .lines
            .get(&(chip, pin))
            .is_some_and(|l| l.released)
    }

    /// Queue a fault returned by the next `apply` on the line.
    pub fn inject_fault(&self, chip: u32, pin: u32, fault: DriverFault) {
        self.inner
            .lock()
            .lines
            .entry((chip, pin))
            .or_default()
            .faults
            .push_back(fault);
    }

    /// Make every `apply` on the line block for `latency`.
    pub fn set_latency(&self, chip: u32, pin: u32, latency: Duration) {
        self.inner
            .lock()
            .lines
            .entry((chip, pin))
            .or_default()
            .latency = latency;
    }

    /// Make opening the line fail, as if another process held it.
    pub fn mark_unavailable(&self, chip: u32, pin: u32) {
        self.inner.lock().unavailable.insert((chip, pin));
    }

    /// Force a line to a level without going through a driver.
    pub fn preset(&self, chip: u32, pin: u32, level: Level, duty: u8) {
        let mut inner = self.inner.lock();
        let line = inner.lines.entry((chip, pin)).or_default();
        line.level = level;
        line.duty = duty;
    }

    fn open(&self, key: LineKey) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        if inner.unavailable.contains(&key) {
            return Err(DriverError::Unavailable(format!(
                "simulated line ({}, {}) is busy",
                key.0, key.1
            )));
        }
        inner.lines.entry(key).or_default().released = false;
        Ok(())
    }

    fn drive(&self, key: LineKey, level: Level, duty: u8) {
        let mut inner = self.inner.lock();
        let line = inner.lines.entry(key).or_default();
        line.apply_count += 1;
        if (line.level, line.duty) != (level, duty) {
            line.level = level;
            line.duty = duty;
            line.history.push((level, duty));
        }
    }
}

/// Driver bound to one simulated line.
pub struct SimulationDriver {
    key: LineKey,
    safe_state: SafeState,
    bank: SimulationBank,
}

impl SimulationDriver {
    /// Open the line of `config` in `bank`.
    pub fn open(config: &ActuatorConfig, bank: SimulationBank) -> Result<Self, DriverError> {
        let key = (config.gpio_chip, config.gpio_pin);
        bank.open(key)?;
        debug!(slot = config.slot, chip = key.0, pin = key.1, "simulated output opened");
        Ok(Self {
            key,
            safe_state: config.safe_state,
            bank,
        })
    }
}

impl ActuatorDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn apply(&mut self, level: Level, duty: u8) -> Result<(), DriverFault> {
        let (fault, latency) = {
            let mut inner = self.bank.inner.lock();
            let line = inner.lines.entry(self.key).or_default();
            (line.faults.pop_front(), line.latency)
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        if let Some(fault) = fault {
            trace!(chip = self.key.0, pin = self.key.1, %fault, "injected fault");
            return Err(fault);
        }
        self.bank.drive(self.key, level, duty);
        Ok(())
    }

    fn read_back(&self) -> (Level, u8) {
        self.bank
            .level(self.key.0, self.key.1)
            .unwrap_or((Level::Off, 0))
    }

    fn release(&mut self) -> Result<(), DriverFault> {
        match self.safe_state {
            SafeState::Off => self.bank.drive(self.key, Level::Off, 0),
            SafeState::On => self.bank.drive(self.key, Level::On, MAX_DUTY),
            SafeState::Hold => {}
        }
        if let Some(line) = self.bank.inner.lock().lines.get_mut(&self.key) {
            line.released = true;
        }
        Ok(())
    }
}

/// Factory producing drivers bound to `bank`.
pub fn factory(bank: SimulationBank) -> DriverFactory {
    Arc::new(move |config: &ActuatorConfig| {
        SimulationDriver::open(config, bank.clone())
            .map(|d| Box::new(d) as Box<dyn ActuatorDriver>)
    })
}
