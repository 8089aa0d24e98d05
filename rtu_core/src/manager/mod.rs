//! Actuator manager.
//!
//! Single arbitrator of every actuator. Four command sinks feed it:
//!
//! | Sink | Caller | Authority |
//! |------|--------|-----------|
//! | [`ActuatorManager::bus_set`] | Output bridge | bus |
//! | [`ActuatorManager::manual_set`] | Operator | manual |
//! | [`ActuatorManager::interlock_set`] | Alarm engine | interlock |
//! | [`ActuatorManager::emergency_stop`] | Operator / fault path | interlock, all slots off |
//!
//! Every physical transition passes the safety envelope (min-on dwell,
//! max-on watchdog, degraded mode) and is persisted and journaled before
//! the sink returns.
//!
//! # Locking
//!
//! The actuator table lock is held only to look up cells. Each actuator
//! has its own cell lock, taken for the whole of a command including the
//! driver call, so commands on one slot take effect in arrival order while
//! other slots proceed. The persistence lock is a leaf: nothing else is
//! acquired while holding it.

mod admission;
pub mod arbitration;
pub mod envelope;

use core::fmt;
use parking_lot::Mutex;
use rtu_common::actuator::{
    ActuatorConfig, ActuatorId, ActuatorKind, ActuatorStateRecord, Authority, DesiredState,
    FaultReason, Level, SafeState, Slot, Subslot,
};
use rtu_common::alarm::RuleId;
use rtu_common::clock::{Clock, Deadline};
use rtu_common::config::RtuConfig;
use rtu_common::consts::MAX_DUTY;
use rtu_common::driver::{ActuatorDriver, DriverFault};
use rtu_common::error::RtuError;
use rtu_common::journal::EventSource;
use rtu_common::link::{LinkState, LinkTransition};
use rtu_hal::{DriverRegistry, PinRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::journal::Journal;
use crate::liveness::LinkObserver;
use crate::persistence::PersistenceGateway;

pub use arbitration::{Decision, Holds, Intent, ManualOverride, arbitrate};
use envelope::OnTimeMeter;

// ─── Settings ───────────────────────────────────────────────────────

/// Manager tuning, usually taken from `RtuConfig`.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Driver backend name in the registry.
    pub backend: String,
    /// Retries after a transient driver fault.
    pub retry_limit: u32,
    /// Sleep between retries.
    pub retry_backoff: Duration,
    /// An `apply` slower than this is a hard fault.
    pub apply_timeout: Duration,
    /// Manual override expiry [ms], 0 = none.
    pub manual_override_timeout_ms: u64,
}

impl ManagerSettings {
    pub fn from_config(config: &RtuConfig) -> Self {
        Self {
            backend: config.hal.backend.clone(),
            retry_limit: config.actuators.retry_limit,
            retry_backoff: Duration::from_millis(config.actuators.retry_backoff_ms),
            apply_timeout: Duration::from_millis(config.actuators.apply_timeout_ms),
            manual_override_timeout_ms: config.actuators.manual_override_timeout_ms,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&RtuConfig::default())
    }
}

// ─── Public result types ────────────────────────────────────────────

/// What caused a transition; used in journal messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Bus,
    Manual,
    Interlock(RuleId),
    SafeState,
    Watchdog,
    EmergencyStop,
    Restore,
    Reset,
}

impl Origin {
    /// Whether the origin is one of the command sinks.
    const fn is_command(&self) -> bool {
        matches!(self, Self::Bus | Self::Manual | Self::Interlock(_))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => f.write_str("bus"),
            Self::Manual => f.write_str("manual"),
            Self::Interlock(rule) => write!(f, "interlock (rule {rule})"),
            Self::SafeState => f.write_str("safe state"),
            Self::Watchdog => f.write_str("watchdog"),
            Self::EmergencyStop => f.write_str("emergency stop"),
            Self::Restore => f.write_str("restore"),
            Self::Reset => f.write_str("operator reset"),
        }
    }
}

/// Successful result of a command sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The driver was driven to the requested state.
    Applied,
    /// Already in the requested state; nothing was driven.
    Unchanged,
    /// Held back by the min-on dwell; fires at `due_ms` unless replaced.
    Deferred { due_ms: u64 },
    /// A higher authority holds the slot; the bus intent was recorded.
    Overridden(Authority),
}

/// Point-in-time view of one actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorStatus {
    pub id: ActuatorId,
    pub slot: Slot,
    pub subslot: Subslot,
    pub name: String,
    pub kind: ActuatorKind,
    /// Physical level last driven.
    pub level: Level,
    pub duty: u8,
    pub desired: DesiredState,
    pub authority: Authority,
    pub fault_reason: Option<FaultReason>,
    /// Deferred command: level, duty, due time [ms].
    pub pending: Option<(Level, u8, u64)>,
    /// Latest bus request, applied or not.
    pub bus_intent: Option<Intent>,
    pub interlock_rule: Option<RuleId>,
    pub manual_override: bool,
    pub estop: bool,
    pub degraded: bool,
    pub cycle_count: u64,
    pub commanded_on_count: u64,
    pub total_on_ms: u64,
    pub last_transition_ms: Option<u64>,
    pub last_command_ms: Option<u64>,
}

// ─── Per-actuator state ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    level: Level,
    duty: u8,
    origin: Origin,
    due: Deadline,
}

struct ActuatorCell {
    config: ActuatorConfig,
    driver: Box<dyn ActuatorDriver>,
    level: Level,
    duty: u8,
    desired: DesiredState,
    fault: Option<FaultReason>,
    last_transition_ms: Option<u64>,
    last_command_ms: Option<u64>,
    last_state_change_wall: u64,
    on_since_ms: Option<u64>,
    meter: OnTimeMeter,
    cycle_count: u64,
    commanded_on_count: u64,
    pending: Option<Pending>,
    bus_intent: Option<Intent>,
    manual: Option<ManualOverride>,
    interlock: Option<RuleId>,
    estop: bool,
    degraded: bool,
}

impl ActuatorCell {
    fn holds(&self) -> Holds {
        Holds {
            estop: self.estop,
            interlock: self.interlock,
            manual: self.manual.is_some(),
        }
    }

    /// Fault that only an operator reset clears.
    fn hard_fault(&self) -> Option<FaultReason> {
        self.fault.filter(|f| !f.cleared_by_recommand())
    }

    fn record(&self) -> ActuatorStateRecord {
        ActuatorStateRecord {
            actuator_id: self.config.id,
            state: u8::from(self.level.is_on()),
            pwm_duty: self.duty,
            last_state_change: self.last_state_change_wall,
            total_on_time_ms: self.meter.total_ms,
            cycle_count: self.cycle_count,
            commanded_on_count: self.commanded_on_count,
            fault_reason: self.fault,
        }
    }

    fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            id: self.config.id,
            slot: self.config.slot,
            subslot: self.config.subslot,
            name: self.config.name.clone(),
            kind: self.config.kind,
            level: self.level,
            duty: self.duty,
            desired: self.desired,
            authority: self.holds().authority(),
            fault_reason: self.fault,
            pending: self.pending.map(|p| (p.level, p.duty, p.due.at_ms())),
            bus_intent: self.bus_intent,
            interlock_rule: self.interlock,
            manual_override: self.manual.is_some(),
            estop: self.estop,
            degraded: self.degraded,
            cycle_count: self.cycle_count,
            commanded_on_count: self.commanded_on_count,
            total_on_ms: self.meter.total_ms,
            last_transition_ms: self.last_transition_ms,
            last_command_ms: self.last_command_ms,
        }
    }

    fn label(&self) -> String {
        format!("slot {} ({})", self.config.slot, self.config.name)
    }
}

type CellRef = Arc<Mutex<ActuatorCell>>;

#[derive(Default)]
struct Table {
    cells: BTreeMap<Slot, CellRef>,
    /// Slots in admission order.
    order: Vec<Slot>,
    link: LinkState,
    estop: bool,
}

impl Table {
    fn ordered(&self) -> Vec<CellRef> {
        self.order
            .iter()
            .filter_map(|s| self.cells.get(s).cloned())
            .collect()
    }
}

// ─── Manager ────────────────────────────────────────────────────────

/// Owner of all actuator runtime state.
pub struct ActuatorManager {
    settings: ManagerSettings,
    registry: DriverRegistry,
    pins: Arc<PinRegistry>,
    store: Arc<dyn PersistenceGateway>,
    journal: Arc<Journal>,
    clock: Arc<dyn Clock>,
    table: Mutex<Table>,
    /// State records whose write failed, retried on later writes.
    dirty: Mutex<BTreeMap<ActuatorId, ActuatorStateRecord>>,
}

impl ActuatorManager {
    /// Create an empty manager. The link starts down, so the manager starts
    /// in degraded mode.
    pub fn new(
        settings: ManagerSettings,
        registry: DriverRegistry,
        pins: Arc<PinRegistry>,
        store: Arc<dyn PersistenceGateway>,
        journal: Arc<Journal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            registry,
            pins,
            store,
            journal,
            clock,
            table: Mutex::new(Table::default()),
            dirty: Mutex::new(BTreeMap::new()),
        }
    }

    fn cell(&self, slot: Slot) -> Result<CellRef, RtuError> {
        self.table
            .lock()
            .cells
            .get(&slot)
            .cloned()
            .ok_or(RtuError::UnknownSlot { slot })
    }

    // ─── Command sinks ──────────────────────────────────────────────

    /// Bus command from the output bridge.
    ///
    /// Returns `DegradedSkip` while the controller link is not up. While a
    /// higher authority holds the slot the request is recorded as the bus
    /// intent and has no physical effect.
    pub fn bus_set(&self, slot: Slot, level: Level, duty: u8) -> Result<CommandOutcome, RtuError> {
        let cell = self.cell(slot)?;
        let mut cell = cell.lock();
        let now = self.clock.now_ms();
        if cell.degraded {
            return Err(RtuError::DegradedSkip { slot });
        }

        let intent = (level, cell.config.effective_duty(level, duty));
        cell.bus_intent = Some(intent);

        if let Some(ov) = cell.manual {
            if ov.yields_to_bus(intent, now, self.settings.manual_override_timeout_ms) {
                cell.manual = None;
                self.journal.info(
                    EventSource::Actuator,
                    format!("{}: manual override ended, bus resumes", cell.label()),
                );
            }
        }

        match arbitrate(&cell.holds(), Authority::Bus, None) {
            Decision::Proceed => {}
            Decision::Overridden(by) => return Ok(CommandOutcome::Overridden(by)),
            Decision::EmergencyStop | Decision::InterlockHeld(_) => {
                return Ok(CommandOutcome::Overridden(Authority::Interlock));
            }
        }
        if let Some(reason) = cell.hard_fault() {
            return Err(RtuError::Faulted {
                slot,
                reason: reason.to_string(),
            });
        }
        cell.last_command_ms = Some(now);
        self.request(&mut cell, level, duty, Origin::Bus, now)
    }

    /// Operator command. Takes a manual override on the slot.
    ///
    /// `manual_set(slot, Off, _)` is also the reset path out of a driver
    /// fault; it bypasses the dwell.
    pub fn manual_set(
        &self,
        slot: Slot,
        level: Level,
        duty: u8,
    ) -> Result<CommandOutcome, RtuError> {
        let cell = self.cell(slot)?;
        let mut cell = cell.lock();
        let now = self.clock.now_ms();

        match arbitrate(&cell.holds(), Authority::Manual, None) {
            Decision::Proceed => {}
            Decision::EmergencyStop | Decision::Overridden(_) => {
                return Err(RtuError::EmergencyStopActive { slot });
            }
            Decision::InterlockHeld(rule_id) => {
                return Err(RtuError::InterlockHeld { slot, rule_id });
            }
        }

        cell.manual = Some(ManualOverride::take(cell.bus_intent, now));
        cell.last_command_ms = Some(now);

        if let Some(reason) = cell.hard_fault() {
            if level.is_on() {
                return Err(RtuError::Faulted {
                    slot,
                    reason: reason.to_string(),
                });
            }
            self.journal.warning(
                EventSource::Operator,
                format!("{}: {reason} fault reset by operator", cell.label()),
            );
            self.drive(&mut cell, Level::Off, 0, Origin::Reset, now)?;
            return Ok(CommandOutcome::Applied);
        }
        self.request(&mut cell, level, duty, Origin::Manual, now)
    }

    /// Interlock command from the alarm engine. Latches the slot for
    /// `rule_id` until [`interlock_release`](Self::interlock_release) or
    /// [`reset_estop`](Self::reset_estop).
    ///
    /// Interlocks honor the min-on dwell.
    pub fn interlock_set(
        &self,
        slot: Slot,
        level: Level,
        duty: u8,
        rule_id: RuleId,
    ) -> Result<CommandOutcome, RtuError> {
        let cell = self.cell(slot)?;
        let mut cell = cell.lock();
        let now = self.clock.now_ms();

        match arbitrate(&cell.holds(), Authority::Interlock, Some(rule_id)) {
            Decision::Proceed => {}
            Decision::EmergencyStop | Decision::Overridden(_) => {
                return Err(RtuError::EmergencyStopActive { slot });
            }
            Decision::InterlockHeld(held_by) => {
                return Err(RtuError::InterlockConflict { slot, held_by });
            }
        }
        if let Some(reason) = cell.hard_fault() {
            return Err(RtuError::Faulted {
                slot,
                reason: reason.to_string(),
            });
        }

        if cell.interlock.replace(rule_id).is_none() {
            self.journal.warning(
                EventSource::Alarm,
                format!("{}: interlock engaged by rule {rule_id}", cell.label()),
            );
        }
        cell.last_command_ms = Some(now);
        self.request(&mut cell, level, duty, Origin::Interlock(rule_id), now)
    }

    /// Release the interlock latch held by `rule_id`: the output is driven
    /// off through the dwell and the latch is dropped. The recorded bus
    /// intent is not re-applied; the bus regains the slot with its next
    /// frame.
    ///
    /// Returns whether a latch was released.
    pub fn interlock_release(&self, slot: Slot, rule_id: RuleId) -> Result<bool, RtuError> {
        let cell = self.cell(slot)?;
        let mut cell = cell.lock();
        if cell.interlock != Some(rule_id) {
            return Ok(false);
        }
        cell.interlock = None;
        self.journal.info(
            EventSource::Alarm,
            format!("{}: interlock released by rule {rule_id}", cell.label()),
        );
        if !cell.estop && cell.hard_fault().is_none() {
            let now = self.clock.now_ms();
            self.request(&mut cell, Level::Off, 0, Origin::Interlock(rule_id), now)?;
        }
        Ok(true)
    }

    /// Force every actuator off immediately, ignoring the dwell, and latch
    /// all slots until [`reset_estop`](Self::reset_estop).
    ///
    /// Deferred commands are discarded. Actuators are not faulted. Returns
    /// the first driver failure after attempting every actuator.
    pub fn emergency_stop(&self) -> Result<(), RtuError> {
        let cells = {
            let mut table = self.table.lock();
            table.estop = true;
            table.ordered()
        };
        self.journal
            .critical(EventSource::Operator, "emergency stop engaged");

        let now = self.clock.now_ms();
        let mut first_err = None;
        for cell in cells {
            let mut cell = cell.lock();
            cell.estop = true;
            cell.pending = None;
            cell.manual = None;
            if let Err(e) = self.stop_output(&mut cell, now) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Clear the emergency stop and re-open every interlock latch.
    ///
    /// Nothing is re-applied; actuators stay off until commanded. Returns
    /// the number of interlock latches dropped.
    pub fn reset_estop(&self) -> usize {
        let cells = {
            let mut table = self.table.lock();
            table.estop = false;
            table.ordered()
        };
        let mut released = 0;
        for cell in cells {
            let mut cell = cell.lock();
            cell.estop = false;
            if cell.interlock.take().is_some() {
                released += 1;
            }
        }
        self.journal.warning(
            EventSource::Operator,
            format!("emergency stop reset, {released} interlock(s) re-opened"),
        );
        released
    }

    // ─── Degraded mode ──────────────────────────────────────────────

    /// Degraded-mode sink. Any state other than `Up` is degraded.
    pub fn set_link(&self, state: LinkState) {
        let degraded = !state.accepts_bus();
        let (cells, was_degraded) = {
            let mut table = self.table.lock();
            let was = !table.link.accepts_bus();
            table.link = state;
            (table.ordered(), was)
        };
        if degraded != was_degraded {
            if degraded {
                self.journal.warning(
                    EventSource::Actuator,
                    "controller lost, entering degraded mode",
                );
            } else {
                self.journal.info(
                    EventSource::Actuator,
                    "controller link up, leaving degraded mode",
                );
            }
        }

        let now = self.clock.now_ms();
        for cell in cells {
            let mut cell = cell.lock();
            if degraded && !cell.degraded {
                cell.degraded = true;
                self.enter_safe_state(&mut cell, now);
            } else if !degraded {
                cell.degraded = false;
            }
        }
    }

    /// Current controller link state as last reported.
    pub fn link_state(&self) -> LinkState {
        self.table.lock().link
    }

    fn enter_safe_state(&self, cell: &mut ActuatorCell, now: u64) {
        if matches!(cell.pending, Some(p) if p.origin == Origin::Bus) {
            cell.pending = None;
        }
        cell.manual = None;
        if cell.estop || cell.interlock.is_some() || cell.hard_fault().is_some() {
            return;
        }
        let target = match cell.config.safe_state {
            SafeState::Off => Some((Level::Off, 0)),
            SafeState::On => Some((Level::On, MAX_DUTY)),
            SafeState::Hold => None,
        };
        if let Some((level, duty)) = target {
            if let Err(e) = self.request(cell, level, duty, Origin::SafeState, now) {
                warn!(slot = cell.config.slot, error = %e, "safe state not reached");
            }
        }
    }

    // ─── Periodic service ───────────────────────────────────────────

    /// Watchdog tick: advance on-time, trip max-on watchdogs, expire manual
    /// overrides, fire deferred commands whose dwell expired, retry failed
    /// state writes.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        self.reconcile();
        let cells = self.table.lock().ordered();
        for cell in cells {
            let mut cell = cell.lock();
            self.service(&mut cell, now);
        }
    }

    fn service(&self, cell: &mut ActuatorCell, now: u64) {
        cell.meter.advance(cell.level, now);

        if cell.estop {
            if cell.level.is_on() {
                let _ = self.stop_output(cell, now);
            }
            return;
        }

        if cell.hard_fault().is_none()
            && envelope::watchdog_expired(cell.config.max_on_time_ms, cell.on_since_ms, now)
        {
            self.trip_watchdog(cell, now);
            return;
        }

        if let Some(ov) = cell.manual {
            if ov.expired(now, self.settings.manual_override_timeout_ms) {
                cell.manual = None;
                self.journal.info(
                    EventSource::Actuator,
                    format!("{}: manual override expired", cell.label()),
                );
            }
        }

        if let Some(p) = cell.pending {
            if p.due.expired(now) {
                cell.pending = None;
                debug!(slot = cell.config.slot, origin = %p.origin, "dwell expired, applying deferred command");
                if let Err(e) = self.drive(cell, p.level, p.duty, p.origin, now) {
                    warn!(slot = cell.config.slot, error = %e, "deferred command failed");
                }
            }
        }
    }

    fn trip_watchdog(&self, cell: &mut ActuatorCell, now: u64) {
        let on_for = cell.on_since_ms.map_or(0, |s| now.saturating_sub(s));
        cell.pending = None;
        if self
            .drive(cell, Level::Off, 0, Origin::Watchdog, now)
            .is_err()
            && cell.hard_fault().is_some()
        {
            return;
        }
        cell.desired = DesiredState::Fault;
        cell.fault = Some(FaultReason::Watchdog);
        self.journal.warning(
            EventSource::Watchdog,
            format!(
                "{}: on for {on_for} ms (max {} ms), forced off",
                cell.label(),
                cell.config.max_on_time_ms
            ),
        );
        let _ = self.persist(cell);
    }

    /// Drive an output off for the emergency stop. Faulted outputs are
    /// driven directly without clearing the fault.
    fn stop_output(&self, cell: &mut ActuatorCell, now: u64) -> Result<(), RtuError> {
        if cell.hard_fault().is_some() {
            let _ = cell.driver.apply(Level::Off, 0);
            let (level, duty) = cell.driver.read_back();
            cell.meter.advance(cell.level, now);
            cell.level = level;
            cell.duty = duty;
            if !level.is_on() {
                cell.on_since_ms = None;
            }
            return Ok(());
        }
        if !cell.level.is_on() && cell.fault.is_none() {
            return Ok(());
        }
        self.drive(cell, Level::Off, 0, Origin::EmergencyStop, now)
    }

    // ─── Envelope and driver ────────────────────────────────────────

    /// Route a request through the min-on dwell.
    fn request(
        &self,
        cell: &mut ActuatorCell,
        level: Level,
        duty: u8,
        origin: Origin,
        now: u64,
    ) -> Result<CommandOutcome, RtuError> {
        let duty = cell.config.effective_duty(level, duty);
        if origin.is_command() && level.is_on() {
            cell.commanded_on_count += 1;
        }

        if cell.fault.is_none() && (cell.level, cell.duty) == (level, duty) {
            cell.pending = None;
            return Ok(CommandOutcome::Unchanged);
        }

        if let Some(due) =
            envelope::dwell_deadline(&cell.config, cell.level, level, cell.last_transition_ms, now)
        {
            debug!(
                slot = cell.config.slot,
                %origin,
                due_ms = due.at_ms(),
                "transition deferred by dwell"
            );
            cell.pending = Some(Pending {
                level,
                duty,
                origin,
                due,
            });
            return Ok(CommandOutcome::Deferred {
                due_ms: due.at_ms(),
            });
        }

        self.drive(cell, level, duty, origin, now)?;
        Ok(CommandOutcome::Applied)
    }

    /// Drive the output now, ignoring the dwell. Updates accounting,
    /// persists, then journals.
    fn drive(
        &self,
        cell: &mut ActuatorCell,
        level: Level,
        duty: u8,
        origin: Origin,
        now: u64,
    ) -> Result<(), RtuError> {
        match self.apply_with_retry(cell, level, duty) {
            Ok(0) => {}
            Ok(retries) => self.journal.warning(
                EventSource::Actuator,
                format!("{}: driver recovered after {retries} retries", cell.label()),
            ),
            Err((reason, detail)) => return Err(self.enter_fault(cell, reason, detail, now)),
        }

        let from = (cell.level, cell.duty);
        cell.meter.advance(cell.level, now);
        if from.0 != level {
            cell.last_transition_ms = Some(now);
            cell.last_state_change_wall = self.clock.wall_ms();
            if level.is_on() {
                cell.on_since_ms = Some(now);
                cell.cycle_count += 1;
            } else {
                cell.on_since_ms = None;
            }
        }
        let cleared = cell.fault.take();
        cell.level = level;
        cell.duty = duty;
        cell.desired = DesiredState::from(level);
        cell.pending = None;

        let persisted = self.persist(cell);

        let message = if from.0 != level {
            format!("{}: {} -> {} (duty {duty}) by {origin}", cell.label(), from.0, level)
        } else if from.1 != duty {
            format!("{}: duty {} -> {duty} by {origin}", cell.label(), from.1)
        } else {
            format!("{}: {level} re-asserted by {origin}", cell.label())
        };
        self.journal.info(EventSource::Actuator, message);
        if let Some(fault) = cleared {
            self.journal.info(
                EventSource::Actuator,
                format!("{}: {fault} fault cleared by {origin}", cell.label()),
            );
        }
        persisted
    }

    /// Call the driver, retrying transient faults. Returns the number of
    /// retries used, or the fault class and detail.
    fn apply_with_retry(
        &self,
        cell: &mut ActuatorCell,
        level: Level,
        duty: u8,
    ) -> Result<u32, (FaultReason, String)> {
        let mut retries = 0;
        loop {
            let started = Instant::now();
            let result = cell.driver.apply(level, duty);
            let elapsed = started.elapsed();
            if elapsed > self.settings.apply_timeout {
                return Err((
                    FaultReason::DriverTimeout,
                    format!(
                        "apply took {} ms (limit {} ms)",
                        elapsed.as_millis(),
                        self.settings.apply_timeout.as_millis()
                    ),
                ));
            }
            match result {
                Ok(()) => return Ok(retries),
                Err(DriverFault::Transient(reason)) if retries < self.settings.retry_limit => {
                    retries += 1;
                    debug!(slot = cell.config.slot, retries, %reason, "transient driver fault, retrying");
                    if !self.settings.retry_backoff.is_zero() {
                        std::thread::sleep(self.settings.retry_backoff);
                    }
                }
                Err(DriverFault::Transient(reason)) => {
                    return Err((
                        FaultReason::DriverHard,
                        format!("{reason} (retries exhausted after {retries})"),
                    ));
                }
                Err(DriverFault::Hard(reason)) => return Err((FaultReason::DriverHard, reason)),
            }
        }
    }

    fn enter_fault(
        &self,
        cell: &mut ActuatorCell,
        reason: FaultReason,
        detail: String,
        now: u64,
    ) -> RtuError {
        cell.meter.advance(cell.level, now);
        let (level, duty) = cell.driver.read_back();
        cell.level = level;
        cell.duty = duty;
        cell.desired = DesiredState::Fault;
        cell.fault = Some(reason);
        cell.pending = None;
        self.journal.error(
            EventSource::Actuator,
            format!("{}: {reason}: {detail}, actuator faulted", cell.label()),
        );
        let _ = self.persist(cell);
        RtuError::DriverHard {
            slot: cell.config.slot,
            reason: format!("{reason}: {detail}"),
        }
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Write the cell's state record. A failure leaves the record in the
    /// dirty set; earlier dirty records are retried first.
    fn persist(&self, cell: &ActuatorCell) -> Result<(), RtuError> {
        let record = cell.record();
        let mut dirty = self.dirty.lock();
        self.retry_dirty(&mut dirty);
        match self.store.save_actuator_state(&record) {
            Ok(()) => {
                dirty.remove(&record.actuator_id);
                Ok(())
            }
            Err(e) => {
                dirty.insert(record.actuator_id, record);
                self.journal.error(
                    EventSource::Persistence,
                    format!("{}: state write failed: {e}", cell.label()),
                );
                Err(e.into())
            }
        }
    }

    fn retry_dirty(&self, dirty: &mut BTreeMap<ActuatorId, ActuatorStateRecord>) {
        if dirty.is_empty() {
            return;
        }
        let mut written = Vec::new();
        for (id, record) in dirty.iter() {
            if self.store.save_actuator_state(record).is_ok() {
                written.push(*id);
            }
        }
        for id in written {
            dirty.remove(&id);
            self.journal.info(
                EventSource::Persistence,
                format!("actuator {id}: state reconciled"),
            );
        }
    }

    /// Retry every failed state write.
    pub fn reconcile(&self) {
        let mut dirty = self.dirty.lock();
        self.retry_dirty(&mut dirty);
    }

    /// Ids whose latest state is not yet durable.
    pub fn unsynced(&self) -> Vec<ActuatorId> {
        self.dirty.lock().keys().copied().collect()
    }

    // ─── Queries ────────────────────────────────────────────────────

    /// Snapshot of one actuator.
    pub fn status(&self, slot: Slot) -> Result<ActuatorStatus, RtuError> {
        let cell = self.cell(slot)?;
        let status = cell.lock().status();
        Ok(status)
    }

    /// Snapshots of every actuator in admission order.
    pub fn statuses(&self) -> Vec<ActuatorStatus> {
        let cells = self.table.lock().ordered();
        cells.iter().map(|c| c.lock().status()).collect()
    }

    /// Admitted slots in admission order.
    pub fn slots(&self) -> Vec<Slot> {
        self.table.lock().order.clone()
    }

    /// Configuration of the actuator on `slot`.
    pub fn config_of(&self, slot: Slot) -> Option<ActuatorConfig> {
        let cell = self.cell(slot).ok()?;
        let config = cell.lock().config.clone();
        Some(config)
    }

    /// Subslot configured for `slot`.
    pub fn subslot_of(&self, slot: Slot) -> Option<Subslot> {
        let cell = self.cell(slot).ok()?;
        let subslot = cell.lock().config.subslot;
        Some(subslot)
    }

    /// Rule currently latching `slot`.
    pub fn interlock_holder(&self, slot: Slot) -> Option<RuleId> {
        let cell = self.cell(slot).ok()?;
        let holder = cell.lock().interlock;
        holder
    }

    pub fn estop_active(&self) -> bool {
        self.table.lock().estop
    }
}

impl LinkObserver for ActuatorManager {
    fn link_changed(&self, transition: LinkTransition) {
        self.set_link(transition.to);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
