//! Integration test: reference scenarios.
//!
//! Each test replays one literal scenario against a booted control plane:
//! anti-short-cycle, max-on watchdog, degraded hold, interlock priority,
//! emergency stop over a dwell and alarm hysteresis.

use rtu_common::actuator::{ActuatorKind, Authority, DesiredState, FaultReason, Level, SafeState};
use rtu_common::alarm::{AlarmCondition, AlarmRule, InterlockAction, InterlockSpec, OccurrenceState};
use rtu_common::error::RtuError;
use rtu_common::journal::{EventSource, Severity};
use rtu_common::link::LinkState;
use rtu_core::alarm::RulePhase;
use rtu_core::bridge::{OutputFrame, OutputPayload};
use rtu_core::manager::CommandOutcome;
use rtu_core::provision::Provisioning;

use super::common::{Rig, actuator, sensor, with_safe_state};

fn frame(slot: u16, payload: OutputPayload) -> OutputFrame {
    OutputFrame::new(slot, 1, &payload.to_bytes()).unwrap()
}

// ── 1. Anti-short-cycle ─────────────────────────────────────────────

#[test]
fn pump_off_is_held_until_min_on_expires() {
    let mut pump = actuator(1, 9, ActuatorKind::Pump, 17);
    pump.min_on_time_ms = 5000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![pump],
        ..Provisioning::default()
    });
    rig.link_up();

    assert_eq!(rig.bus(9, OutputPayload::pwm(50)).unwrap(), CommandOutcome::Applied);
    assert_eq!(rig.bank.level(0, 17), Some((Level::On, 50)));

    rig.at(1000);
    assert_eq!(
        rig.bus(9, OutputPayload::off()).unwrap(),
        CommandOutcome::Deferred { due_ms: 5000 }
    );

    // The controller keeps repeating "off" every cycle.
    for t in (1100..5000).step_by(100) {
        rig.at(t);
        rig.bus(9, OutputPayload::off()).unwrap();
        rig.ctx.watchdog_tick();
        assert_eq!(rig.line(17), Level::On, "switched off early at t={t}");
    }

    rig.at(5000);
    rig.bus(9, OutputPayload::off()).unwrap();
    rig.ctx.watchdog_tick();
    assert_eq!(rig.line(17), Level::Off);

    assert_eq!(rig.bank.history(0, 17), vec![(Level::On, 50), (Level::Off, 0)]);
    let status = rig.ctx.actuator_status(9).unwrap();
    assert_eq!(status.cycle_count, 1);
    assert_eq!(status.last_transition_ms, Some(5000));
    assert!(status.pending.is_none());
}

#[test]
fn deferred_off_fires_from_the_watchdog_without_new_frames() {
    let mut pump = actuator(1, 9, ActuatorKind::Pump, 17);
    pump.min_on_time_ms = 5000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![pump],
        ..Provisioning::default()
    });
    rig.link_up();
    rig.bus(9, OutputPayload::pwm(50)).unwrap();
    rig.at(1000);
    rig.bus(9, OutputPayload::off()).unwrap();

    rig.step_to(4900);
    assert_eq!(rig.line(17), Level::On);
    rig.step_to(5000);
    assert_eq!(rig.line(17), Level::Off);
    assert_eq!(rig.ctx.actuator_status(9).unwrap().cycle_count, 1);
}

// ── 2. Max-on watchdog ──────────────────────────────────────────────

#[test]
fn watchdog_forces_off_and_faults_after_max_on() {
    let mut relay = actuator(1, 10, ActuatorKind::Relay, 18);
    relay.max_on_time_ms = 2000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![relay],
        ..Provisioning::default()
    });

    assert_eq!(
        rig.ctx.manager().manual_set(10, Level::On, 100).unwrap(),
        CommandOutcome::Applied
    );
    assert_eq!(rig.line(18), Level::On);

    rig.step_to(1900);
    assert_eq!(rig.line(18), Level::On);

    rig.step_to(2000);
    assert_eq!(rig.line(18), Level::Off);
    let status = rig.ctx.actuator_status(10).unwrap();
    assert_eq!(status.desired, DesiredState::Fault);
    assert_eq!(status.fault_reason, Some(FaultReason::Watchdog));
    assert!(rig.journaled(EventSource::Watchdog, Severity::Warning, "forced off"));

    // The persisted row carries the fault.
    let record = rig.store.load_actuator_state(1).unwrap().unwrap();
    assert_eq!(record.state, 0);
    assert_eq!(record.fault_reason, Some(FaultReason::Watchdog));
}

#[test]
fn watchdog_fault_is_cleared_by_a_new_command() {
    let mut relay = actuator(1, 10, ActuatorKind::Relay, 18);
    relay.max_on_time_ms = 2000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![relay],
        ..Provisioning::default()
    });
    rig.ctx.manager().manual_set(10, Level::On, 100).unwrap();
    rig.step_to(2000);
    assert_eq!(
        rig.ctx.actuator_status(10).unwrap().fault_reason,
        Some(FaultReason::Watchdog)
    );

    rig.ctx.manager().manual_set(10, Level::On, 100).unwrap();
    let status = rig.ctx.actuator_status(10).unwrap();
    assert_eq!(status.fault_reason, None);
    assert_eq!(status.desired, DesiredState::On);
    assert_eq!(rig.line(18), Level::On);
}

// ── 3. Degraded hold ────────────────────────────────────────────────

#[test]
fn link_loss_applies_each_safe_state() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![
            with_safe_state(actuator(1, 9, ActuatorKind::Relay, 17), SafeState::Off),
            with_safe_state(actuator(2, 10, ActuatorKind::Relay, 18), SafeState::On),
            with_safe_state(actuator(3, 11, ActuatorKind::Relay, 19), SafeState::Hold),
        ],
        ..Provisioning::default()
    });
    rig.link_up();

    // Last controller cycle at t=0.
    let results = rig.ctx.on_output_cycle(&[
        frame(9, OutputPayload::on()),
        frame(10, OutputPayload::off()),
        frame(11, OutputPayload::on()),
    ]);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(
        (rig.line(17), rig.line(18), rig.line(19)),
        (Level::On, Level::Off, Level::On)
    );
    let hold_history = rig.bank.history(0, 19);

    rig.at(2900);
    rig.ctx.watchdog_tick();
    assert_eq!(rig.ctx.link_state(), LinkState::Up);
    assert_eq!(rig.line(17), Level::On);

    rig.at(3000);
    rig.ctx.watchdog_tick();
    assert_eq!(rig.ctx.link_state(), LinkState::Down);
    assert_eq!(rig.line(17), Level::Off);
    assert_eq!(rig.line(18), Level::On);
    assert_eq!(rig.line(19), Level::On);
    assert_eq!(rig.bank.history(0, 19), hold_history, "hold slot was driven");
    assert!(rig.ctx.actuator_status(11).unwrap().degraded);
    assert!(rig.journaled(EventSource::Actuator, Severity::Warning, "degraded"));
}

#[test]
fn bus_resumes_only_after_link_is_confirmed() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        ..Provisioning::default()
    });

    // First cycle only moves the link to connecting.
    let first = rig.ctx.on_output_cycle(&[frame(9, OutputPayload::on())]);
    assert_eq!(rig.ctx.link_state(), LinkState::Connecting);
    assert!(matches!(first[0].1, Err(RtuError::DegradedSkip { slot: 9 })));
    assert_eq!(rig.line(17), Level::Off);

    rig.at(100);
    let second = rig.ctx.on_output_cycle(&[frame(9, OutputPayload::on())]);
    assert_eq!(rig.ctx.link_state(), LinkState::Up);
    assert_eq!(second[0].1.as_ref().unwrap(), &CommandOutcome::Applied);
    assert_eq!(rig.line(17), Level::On);
}

// ── 4. Interlock priority ───────────────────────────────────────────

fn over_temperature_rule() -> AlarmRule {
    let mut rule = AlarmRule::new(1, 1, AlarmCondition::Above, 0.0, 100.0);
    rule.interlock = InterlockSpec {
        enabled: true,
        target_slot: 9,
        action: InterlockAction::Off,
        pwm_duty: 0,
        release_on_clear: true,
    };
    rule
}

#[test]
fn interlock_overrides_bus_and_releases_without_reapplying() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        sensors: vec![sensor(1, "boiler temperature")],
        alarm_rules: vec![over_temperature_rule()],
    });
    rig.link_up();

    rig.sample(1, 120.0);
    rig.ctx.alarm_tick();
    assert_eq!(rig.ctx.manager().interlock_holder(9), Some(1));

    assert_eq!(
        rig.bus(9, OutputPayload::pwm(50)).unwrap(),
        CommandOutcome::Overridden(Authority::Interlock)
    );
    assert_eq!(rig.line(17), Level::Off);
    let status = rig.ctx.actuator_status(9).unwrap();
    assert_eq!(status.authority, Authority::Interlock);
    assert_eq!(status.bus_intent, Some((Level::On, 100)));

    let open = rig.ctx.alarms().open_occurrences();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].state, OccurrenceState::Active);
    assert_eq!(open[0].trigger_value, 120.0);
    let occurrence_id = open[0].id;

    assert!(matches!(
        rig.ctx.toggle(9),
        Err(RtuError::InterlockHeld { slot: 9, rule_id: 1 })
    ));

    rig.sample(1, 80.0);
    rig.ctx.alarm_tick();
    assert!(rig.ctx.alarms().open_occurrences().is_empty());
    let stored = rig.store.get_occurrence(occurrence_id).unwrap().unwrap();
    assert_eq!(stored.state, OccurrenceState::Cleared);
    assert!(stored.cleared_at.is_some());
    assert_eq!(rig.ctx.manager().interlock_holder(9), None);
    assert_eq!(rig.line(17), Level::Off, "bus intent re-applied on release");
    assert_eq!(rig.ctx.actuator_status(9).unwrap().authority, Authority::Bus);

    // The next bus frame takes the slot back.
    assert_eq!(rig.bus(9, OutputPayload::pwm(50)).unwrap(), CommandOutcome::Applied);
    assert_eq!(rig.line(17), Level::On);
}

#[test]
fn interlock_turns_a_running_output_off() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        sensors: vec![sensor(1, "boiler temperature")],
        alarm_rules: vec![over_temperature_rule()],
    });
    rig.link_up();
    rig.bus(9, OutputPayload::on()).unwrap();
    assert_eq!(rig.line(17), Level::On);

    rig.sample(1, 101.0);
    rig.ctx.alarm_tick();
    assert_eq!(rig.line(17), Level::Off);
    assert_eq!(
        rig.ctx.alarms().rule_status(1).unwrap().phase,
        RulePhase::Firing
    );
}

// ── 5. Emergency stop preempts dwell ────────────────────────────────

#[test]
fn emergency_stop_ignores_dwell_and_does_not_fault() {
    let mut relay = actuator(1, 9, ActuatorKind::Relay, 17);
    relay.min_on_time_ms = 5000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![relay],
        ..Provisioning::default()
    });
    rig.link_up();
    rig.bus(9, OutputPayload::on()).unwrap();

    rig.at(500);
    assert!(matches!(
        rig.bus(9, OutputPayload::off()).unwrap(),
        CommandOutcome::Deferred { .. }
    ));

    rig.at(1000);
    rig.ctx.emergency_stop().unwrap();
    assert_eq!(rig.line(17), Level::Off);
    let status = rig.ctx.actuator_status(9).unwrap();
    assert_eq!(status.desired, DesiredState::Off);
    assert_eq!(status.fault_reason, None);
    assert!(status.estop);
    assert!(status.pending.is_none());
    assert!(rig.journaled(EventSource::Operator, Severity::Critical, "emergency stop"));

    // Bus and operator are refused until reset.
    assert_eq!(
        rig.bus(9, OutputPayload::on()).unwrap(),
        CommandOutcome::Overridden(Authority::Interlock)
    );
    assert!(matches!(
        rig.ctx.toggle(9),
        Err(RtuError::EmergencyStopActive { slot: 9 })
    ));
    assert_eq!(rig.line(17), Level::Off);

    rig.at(2000);
    rig.ctx.reset_estop();
    assert!(!rig.ctx.manager().estop_active());
    assert_eq!(rig.bus(9, OutputPayload::on()).unwrap(), CommandOutcome::Applied);
    assert_eq!(rig.line(17), Level::On);
}

// ── 6. Hysteresis ───────────────────────────────────────────────────

#[test]
fn out_of_range_rule_follows_hysteresis_band() {
    let mut rule = AlarmRule::new(1, 1, AlarmCondition::OutOfRange, 10.0, 20.0);
    rule.hysteresis_percent = 10.0;
    let rig = Rig::boot(Provisioning {
        sensors: vec![sensor(1, "supply pressure")],
        alarm_rules: vec![rule],
        ..Provisioning::default()
    });

    let expected = [
        (15.0, RulePhase::Idle),
        (21.0, RulePhase::Firing),
        (19.5, RulePhase::Firing),
        (18.9, RulePhase::Idle),
        (11.0, RulePhase::Idle),
        (9.5, RulePhase::Firing),
    ];
    for (i, (value, phase)) in expected.into_iter().enumerate() {
        rig.at(1000 * (i as u64 + 1));
        rig.sample(1, value);
        rig.ctx.alarm_tick();
        assert_eq!(
            rig.ctx.alarms().rule_status(1).unwrap().phase,
            phase,
            "after sample {value}"
        );
    }

    let open = rig.ctx.alarms().open_occurrences();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].trigger_value, 9.5);
    // The first occurrence was closed before the second was raised.
    let first = rig.store.get_occurrence(open[0].id - 1).unwrap().unwrap();
    assert_eq!(first.state, OccurrenceState::Cleared);
    assert_eq!(first.trigger_value, 21.0);
}
