//! Alarm engine.
//!
//! Evaluates every enabled rule once per alarm tick against the latest
//! sample of its sensor. A raise opens an occurrence and, when the rule
//! carries an interlock, latches the target slot through the manager's
//! interlock sink. A clear closes the occurrence and optionally releases
//! the latch.
//!
//! # Rule lifecycle
//!
//! ```text
//!            raise                      clear (auto_clear or acknowledged)
//!   idle ───────────► firing ─────────────────────────────────────────► idle
//!                      │  ▲
//!    clear, no ack yet │  │ raise again
//!                      ▼  │
//!                  awaiting ack ──── acknowledge ─────────────────────► idle
//! ```
//!
//! Samples whose quality is not `ok` (after ageing by the sensor's
//! `max_age_ms`) are skipped; a rule never raises on missing data.

pub mod hysteresis;

use parking_lot::Mutex;
use rtu_common::alarm::{
    AlarmOccurrence, AlarmRule, InterlockAction, OccurrenceId, OccurrenceState, RuleId,
};
use rtu_common::actuator::FaultReason;
use rtu_common::clock::Clock;
use rtu_common::error::RtuError;
use rtu_common::journal::EventSource;
use rtu_common::sensor::{Quality, SensorDescriptor, SensorId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::journal::Journal;
use crate::manager::ActuatorManager;
use crate::persistence::PersistenceGateway;
use crate::sample_bus::SampleBus;
use hysteresis::{Verdict, evaluate};

/// Externally visible phase of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePhase {
    Idle,
    Firing,
    /// Value cleared but the occurrence waits for an acknowledge.
    AwaitingAck,
}

/// Rule phase with its open occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleStatus {
    pub phase: RulePhase,
    pub occurrence: Option<AlarmOccurrence>,
}

struct RuleRuntime {
    rule: AlarmRule,
    phase: RulePhase,
    occurrence: Option<AlarmOccurrence>,
    stale_reads: u32,
    stale_reported: bool,
    /// Target fault state when the manager last refused this rule's
    /// interlock. Set while the refusal stands.
    refused_at_fault: Option<Option<FaultReason>>,
}

impl RuleRuntime {
    fn new(rule: AlarmRule) -> Self {
        Self {
            rule,
            phase: RulePhase::Idle,
            occurrence: None,
            stale_reads: 0,
            stale_reported: false,
            refused_at_fault: None,
        }
    }
}

/// Rule evaluator and interlock driver.
pub struct AlarmEngine {
    rules: Mutex<BTreeMap<RuleId, RuleRuntime>>,
    sensor_max_age: Mutex<HashMap<SensorId, u64>>,
    stale_threshold: Option<u32>,
    samples: Arc<SampleBus>,
    manager: Arc<ActuatorManager>,
    store: Arc<dyn PersistenceGateway>,
    journal: Arc<Journal>,
    clock: Arc<dyn Clock>,
}

impl AlarmEngine {
    pub fn new(
        samples: Arc<SampleBus>,
        manager: Arc<ActuatorManager>,
        store: Arc<dyn PersistenceGateway>,
        journal: Arc<Journal>,
        clock: Arc<dyn Clock>,
        stale_threshold: Option<u32>,
    ) -> Self {
        Self {
            rules: Mutex::new(BTreeMap::new()),
            sensor_max_age: Mutex::new(HashMap::new()),
            stale_threshold,
            samples,
            manager,
            store,
            journal,
            clock,
        }
    }

    // ─── Rule set ───────────────────────────────────────────────────

    /// Register sensor ageing limits.
    pub fn set_sensors(&self, sensors: &[SensorDescriptor]) {
        let mut ages = self.sensor_max_age.lock();
        ages.clear();
        ages.extend(sensors.iter().map(|s| (s.id, s.max_age_ms)));
    }

    /// Check a rule against the admitted actuators.
    fn check(&self, rule: &AlarmRule) -> Result<(), RtuError> {
        rule.validate()?;
        let Some(slot) = rule.interlock_slot() else {
            return Ok(());
        };
        let Some(target) = self.manager.config_of(slot) else {
            return Err(RtuError::config_invalid(
                slot,
                format!("rule {}: interlock target not admitted", rule.id),
            ));
        };
        if rule.interlock.action == InterlockAction::Pwm && !target.kind.is_pwm_capable() {
            return Err(RtuError::config_invalid(
                slot,
                format!(
                    "rule {}: pwm interlock needs a pwm-capable actuator, slot is {}",
                    rule.id, target.kind
                ),
            ));
        }
        Ok(())
    }

    fn install(&self, rule: AlarmRule) {
        let mut rules = self.rules.lock();
        match rules.get_mut(&rule.id) {
            Some(rt) => rt.rule = rule,
            None => {
                rules.insert(rule.id, RuleRuntime::new(rule));
            }
        }
    }

    /// Install rules read from the store. Invalid rules are journaled,
    /// skipped and returned.
    pub fn load_rules(&self, rules: impl IntoIterator<Item = AlarmRule>) -> Vec<RtuError> {
        let mut failures = Vec::new();
        for rule in rules {
            let id = rule.id;
            match self.check(&rule) {
                Ok(()) => self.install(rule),
                Err(e) => {
                    self.journal
                        .error(EventSource::Alarm, format!("rule {id} rejected: {e}"));
                    failures.push(e);
                }
            }
        }
        info!(rules = self.rules.lock().len(), "alarm rules loaded");
        failures
    }

    /// Validate, store and install a rule. Replacing a rule keeps its
    /// phase and open occurrence.
    pub fn add_rule(&self, rule: AlarmRule) -> Result<(), RtuError> {
        self.check(&rule)?;
        self.store.upsert_alarm_rule(&rule)?;
        self.journal.info(
            EventSource::Alarm,
            format!("rule {} on sensor {} installed", rule.id, rule.sensor_id),
        );
        self.install(rule);
        Ok(())
    }

    /// Delete a rule. Its open occurrence is closed and any latch it holds
    /// is released.
    pub fn remove_rule(&self, id: RuleId) -> Result<bool, RtuError> {
        let Some(mut rt) = self.rules.lock().remove(&id) else {
            return Ok(false);
        };
        if let Err(e) = self.store.delete_alarm_rule(id) {
            self.journal.error(
                EventSource::Persistence,
                format!("rule {id}: delete not stored: {e}"),
            );
        }
        self.close(&mut rt);
        if let Some(slot) = rt.rule.interlock_slot() {
            if self.manager.interlock_holder(slot) == Some(id) {
                self.manager.interlock_release(slot, id)?;
            }
        }
        self.journal
            .info(EventSource::Alarm, format!("rule {id} removed"));
        Ok(true)
    }

    /// Phase and open occurrence of a rule.
    pub fn rule_status(&self, id: RuleId) -> Option<RuleStatus> {
        self.rules.lock().get(&id).map(|rt| RuleStatus {
            phase: rt.phase,
            occurrence: rt.occurrence.clone(),
        })
    }

    /// Occurrences not yet cleared.
    pub fn open_occurrences(&self) -> Vec<AlarmOccurrence> {
        self.rules
            .lock()
            .values()
            .filter_map(|rt| rt.occurrence.clone())
            .collect()
    }

    // ─── Evaluation ─────────────────────────────────────────────────

    /// Evaluate every enabled rule once.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        let mut rules = self.rules.lock();
        for rt in rules.values_mut().filter(|rt| rt.rule.enabled) {
            let max_age = self
                .sensor_max_age
                .lock()
                .get(&rt.rule.sensor_id)
                .copied()
                .unwrap_or(0);
            let value = match self.samples.read(rt.rule.sensor_id) {
                Some(s) if s.effective_quality(now, max_age) == Quality::Ok => s.value,
                _ => {
                    self.note_unusable(rt);
                    continue;
                }
            };
            rt.stale_reads = 0;
            rt.stale_reported = false;

            let firing = rt.phase == RulePhase::Firing;
            match evaluate(&rt.rule, firing, value) {
                Verdict::Raise => self.raise(rt, value),
                Verdict::Clear => self.clear(rt, value),
                Verdict::Hold => {}
            }
            if rt.phase == RulePhase::Firing {
                self.reassert(rt);
            }
        }
    }

    fn note_unusable(&self, rt: &mut RuleRuntime) {
        rt.stale_reads = rt.stale_reads.saturating_add(1);
        debug!(rule = rt.rule.id, reads = rt.stale_reads, "sensor sample unusable, rule skipped");
        if let Some(threshold) = self.stale_threshold {
            if rt.stale_reads >= threshold && !rt.stale_reported {
                rt.stale_reported = true;
                self.journal.warning(
                    EventSource::Alarm,
                    format!(
                        "rule {}: sensor {} had no usable sample for {} evaluations",
                        rt.rule.id, rt.rule.sensor_id, rt.stale_reads
                    ),
                );
            }
        }
    }

    fn raise(&self, rt: &mut RuleRuntime, value: f32) {
        rt.phase = RulePhase::Firing;
        let rule = &rt.rule;

        // A re-raise while awaiting acknowledge reuses the open occurrence.
        if let Some(occ) = &rt.occurrence {
            self.journal.record(
                EventSource::Alarm,
                rule.severity,
                format!(
                    "rule {} raised again (sensor {} = {value}), occurrence {} still open",
                    rule.id, rule.sensor_id, occ.id
                ),
            );
        } else {
            let mut occ = AlarmOccurrence {
                id: 0,
                rule_id: rule.id,
                sensor_id: rule.sensor_id,
                trigger_value: value,
                raised_at: self.clock.wall_ms(),
                cleared_at: None,
                acknowledged_by: None,
                state: OccurrenceState::Active,
            };
            match self.store.insert_occurrence(&occ) {
                Ok(id) => occ.id = id,
                Err(e) => self.journal.error(
                    EventSource::Persistence,
                    format!("rule {}: occurrence not stored: {e}", rule.id),
                ),
            }
            self.journal.record(
                EventSource::Alarm,
                rule.severity,
                format!(
                    "rule {} raised: sensor {} = {value} (occurrence {})",
                    rule.id, rule.sensor_id, occ.id
                ),
            );
            rt.occurrence = Some(occ);
        }
        rt.refused_at_fault = None;
        self.engage(rt, false);
    }

    fn clear(&self, rt: &mut RuleRuntime, value: f32) {
        let acknowledged = rt
            .occurrence
            .as_ref()
            .is_some_and(|o| o.state == OccurrenceState::Acknowledged);
        if rt.rule.auto_clear || acknowledged {
            self.journal.info(
                EventSource::Alarm,
                format!("rule {} cleared: sensor {} = {value}", rt.rule.id, rt.rule.sensor_id),
            );
            self.finish(rt);
        } else {
            rt.phase = RulePhase::AwaitingAck;
            self.journal.info(
                EventSource::Alarm,
                format!(
                    "rule {}: sensor {} = {value} back in range, awaiting acknowledge",
                    rt.rule.id, rt.rule.sensor_id
                ),
            );
        }
    }

    /// Close the occurrence, go idle and release the latch if configured.
    fn finish(&self, rt: &mut RuleRuntime) {
        self.close(rt);
        rt.phase = RulePhase::Idle;
        rt.refused_at_fault = None;
        if !rt.rule.interlock.release_on_clear {
            return;
        }
        let Some(slot) = rt.rule.interlock_slot() else {
            return;
        };
        if let Err(e) = self.manager.interlock_release(slot, rt.rule.id) {
            self.journal.error(
                EventSource::Alarm,
                format!("rule {}: interlock release failed: {e}", rt.rule.id),
            );
        }
    }

    fn close(&self, rt: &mut RuleRuntime) {
        let Some(mut occ) = rt.occurrence.take() else {
            return;
        };
        occ.state = OccurrenceState::Cleared;
        occ.cleared_at = Some(self.clock.wall_ms());
        if occ.id != 0 {
            if let Err(e) = self.store.update_occurrence(&occ) {
                self.journal.error(
                    EventSource::Persistence,
                    format!("occurrence {}: close not stored: {e}", occ.id),
                );
            }
        }
    }

    fn target_fault(&self, slot: u16) -> Option<FaultReason> {
        self.manager.status(slot).ok().and_then(|s| s.fault_reason)
    }

    /// Issue the rule's interlock, unless another rule holds the slot.
    ///
    /// A refused interlock is journaled once and retried only after the
    /// target's fault state changes.
    fn engage(&self, rt: &mut RuleRuntime, reassert: bool) {
        let Some(slot) = rt.rule.interlock_slot() else {
            return;
        };
        if self.manager.estop_active() {
            return;
        }
        if let Some(fault) = rt.refused_at_fault {
            if self.target_fault(slot) == fault {
                return;
            }
            rt.refused_at_fault = None;
        }
        let rule = &rt.rule;
        match self.manager.interlock_holder(slot) {
            Some(holder) if holder == rule.id && reassert => return,
            Some(holder) if holder != rule.id => {
                if !reassert {
                    self.conflict(rule.id, slot, holder);
                }
                return;
            }
            _ => {}
        }
        let (level, duty) = rule.interlock.action.command(rule.interlock.pwm_duty);
        match self.manager.interlock_set(slot, level, duty, rule.id) {
            Ok(_) if reassert => self.journal.warning(
                EventSource::Alarm,
                format!("rule {}: interlock on slot {slot} re-asserted", rule.id),
            ),
            Ok(_) => {}
            Err(RtuError::InterlockConflict { held_by, .. }) => {
                self.conflict(rule.id, slot, held_by);
            }
            Err(RtuError::EmergencyStopActive { .. }) => {}
            Err(e) => {
                self.journal.error(
                    EventSource::Alarm,
                    format!("rule {}: interlock on slot {slot} failed: {e}", rule.id),
                );
                rt.refused_at_fault = Some(self.target_fault(slot));
            }
        }
    }

    fn conflict(&self, rule_id: RuleId, slot: u16, holder: RuleId) {
        let e = RtuError::InterlockConflict {
            slot,
            held_by: holder,
        };
        self.journal.warning(
            EventSource::Alarm,
            format!("rule {rule_id}: {e}, occurrence recorded without interlock"),
        );
    }

    /// Re-latch a firing rule whose latch was dropped by an emergency stop
    /// reset.
    fn reassert(&self, rt: &mut RuleRuntime) {
        if let Some(slot) = rt.rule.interlock_slot() {
            if self.manager.interlock_holder(slot).is_none() {
                self.engage(rt, true);
            }
        }
    }

    // ─── Acknowledge ────────────────────────────────────────────────

    /// Operator acknowledge. A firing occurrence is marked acknowledged
    /// and closes when the value clears; one awaiting acknowledge closes
    /// now.
    pub fn acknowledge(&self, id: OccurrenceId, user: &str) -> Result<OccurrenceState, RtuError> {
        let mut rules = self.rules.lock();
        let owner = rules
            .values()
            .find(|rt| rt.occurrence.as_ref().is_some_and(|o| o.id == id))
            .map(|rt| rt.rule.id);
        let Some(rt) = owner.and_then(|rule_id| rules.get_mut(&rule_id)) else {
            drop(rules);
            return self.acknowledge_closed(id, user);
        };

        if let Some(occ) = rt.occurrence.as_mut() {
            occ.acknowledged_by = Some(user.to_string());
            occ.state = OccurrenceState::Acknowledged;
        }
        self.journal.info(
            EventSource::Operator,
            format!("occurrence {id} of rule {} acknowledged by {user}", rt.rule.id),
        );

        if rt.phase == RulePhase::AwaitingAck {
            self.finish(rt);
            return Ok(OccurrenceState::Cleared);
        }
        if let Some(occ) = &rt.occurrence {
            self.store.update_occurrence(occ)?;
        }
        Ok(OccurrenceState::Acknowledged)
    }

    /// Acknowledge of an occurrence that is no longer open: record the
    /// user if none was recorded.
    fn acknowledge_closed(&self, id: OccurrenceId, user: &str) -> Result<OccurrenceState, RtuError> {
        let Some(mut occ) = self.store.get_occurrence(id)? else {
            return Err(RtuError::UnknownOccurrence { id });
        };
        if occ.acknowledged_by.is_none() {
            occ.acknowledged_by = Some(user.to_string());
            self.store.update_occurrence(&occ)?;
        }
        Ok(occ.state)
    }
}
