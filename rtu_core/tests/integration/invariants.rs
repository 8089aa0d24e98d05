//! Integration test: control-plane invariants.
//!
//! Restart round-trip through a file store, interlock vs manual races,
//! bus isolation while degraded, estop over deferred commands, runtime
//! removal of actuators and rules, and the dwell/on-time envelope under
//! arbitrary bus traffic.

use proptest::prelude::*;
use rtu_common::actuator::{ActuatorKind, Level, SafeState};
use rtu_common::alarm::{AlarmCondition, AlarmRule, InterlockAction, InterlockSpec};
use rtu_common::clock::ManualClock;
use rtu_common::error::RtuError;
use rtu_core::bridge::OutputPayload;
use rtu_core::manager::CommandOutcome;
use rtu_core::persistence::{JsonStore, PersistenceGateway};
use rtu_core::provision::Provisioning;
use rtu_hal::drivers::SimulationBank;
use std::sync::Arc;
use std::thread;

use super::common::{Rig, WALL_ORIGIN_MS, actuator, sensor, with_safe_state};

// ── Restart round-trip ──────────────────────────────────────────────

#[test]
fn restart_restores_safe_state_or_last_commanded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtu.json");
    let bank = SimulationBank::new();

    {
        let store = JsonStore::open(&path).unwrap();
        Provisioning {
            actuators: vec![
                with_safe_state(actuator(1, 9, ActuatorKind::Relay, 17), SafeState::Off),
                with_safe_state(actuator(2, 10, ActuatorKind::Relay, 18), SafeState::Hold),
                with_safe_state(actuator(3, 11, ActuatorKind::Relay, 19), SafeState::On),
            ],
            ..Provisioning::default()
        }
        .apply(&store)
        .unwrap();

        let rig = Rig::boot_on(
            Arc::new(store),
            bank.clone(),
            Arc::new(ManualClock::with_wall_origin(WALL_ORIGIN_MS)),
        );
        rig.link_up();
        rig.bus(9, OutputPayload::on()).unwrap();
        rig.bus(10, OutputPayload::on()).unwrap();
        rig.bus(11, OutputPayload::off()).unwrap();
        assert_eq!(
            (rig.line(17), rig.line(18), rig.line(19)),
            (Level::On, Level::On, Level::Off)
        );
        rig.ctx.shutdown();
        assert!(rig.ctx.pins().is_empty());
    }

    let store: Arc<dyn PersistenceGateway> = Arc::new(JsonStore::open(&path).unwrap());
    let rig = Rig::boot_on(
        store,
        bank,
        Arc::new(ManualClock::with_wall_origin(WALL_ORIGIN_MS + 60_000)),
    );
    assert_eq!(rig.line(17), Level::Off);
    assert_eq!(rig.line(18), Level::On);
    assert_eq!(rig.line(19), Level::On);

    let hold = rig.ctx.actuator_status(10).unwrap();
    assert_eq!(hold.level, Level::On);
    assert_eq!(hold.cycle_count, 1);
    assert_eq!(rig.ctx.actuator_status(9).unwrap().cycle_count, 1);
}

#[test]
fn counters_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtu.json");
    let bank = SimulationBank::new();
    let clock = Arc::new(ManualClock::with_wall_origin(WALL_ORIGIN_MS));

    {
        let store = JsonStore::open(&path).unwrap();
        store
            .upsert_actuator(&actuator(1, 9, ActuatorKind::Relay, 17))
            .unwrap();
        let rig = Rig::boot_on(Arc::new(store), bank.clone(), clock.clone());
        rig.link_up();
        for t in [0, 1000, 2000, 3000] {
            rig.at(t);
            rig.ctx.on_output_cycle(&[]);
            let payload = if t % 2000 == 0 {
                OutputPayload::on()
            } else {
                OutputPayload::off()
            };
            rig.bus(9, payload).unwrap();
        }
        rig.at(3500);
        rig.ctx.shutdown();
    }

    let rig = Rig::boot_on(Arc::new(JsonStore::open(&path).unwrap()), bank, clock);
    let status = rig.ctx.actuator_status(9).unwrap();
    assert_eq!(status.cycle_count, 2);
    assert_eq!(status.commanded_on_count, 2);
    assert_eq!(status.total_on_ms, 2000);
}

// ── Authority ───────────────────────────────────────────────────────

#[test]
fn concurrent_interlock_and_manual_end_with_interlock_value() {
    for _ in 0..50 {
        let rig = Rig::boot(Provisioning {
            actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
            ..Provisioning::default()
        });
        let manager = rig.ctx.manager();

        thread::scope(|s| {
            s.spawn(|| manager.interlock_set(9, Level::Off, 0, 7));
            s.spawn(|| manager.manual_set(9, Level::On, 100));
        });

        assert_eq!(rig.line(17), Level::Off);
        assert_eq!(manager.interlock_holder(9), Some(7));
    }
}

#[test]
fn second_interlock_on_held_slot_conflicts() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Pwm, 17)],
        ..Provisioning::default()
    });
    let manager = rig.ctx.manager();
    manager.interlock_set(9, Level::Off, 0, 1).unwrap();
    assert!(matches!(
        manager.interlock_set(9, Level::On, 30, 2),
        Err(RtuError::InterlockConflict { slot: 9, held_by: 1 })
    ));
    // The holder itself may change the forced value.
    assert_eq!(
        manager.interlock_set(9, Level::On, 30, 1).unwrap(),
        CommandOutcome::Applied
    );
    assert_eq!(rig.bank.level(0, 17), Some((Level::On, 30)));
}

#[test]
fn bus_never_drives_while_link_is_down() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        ..Provisioning::default()
    });
    let applies = rig.bank.apply_count(0, 17);

    for t in (0..1000).step_by(100) {
        rig.at(t);
        assert!(matches!(
            rig.ctx.manager().bus_set(9, Level::On, 100),
            Err(RtuError::DegradedSkip { slot: 9 })
        ));
    }
    assert_eq!(rig.bank.apply_count(0, 17), applies);
    assert_eq!(rig.line(17), Level::Off);
}

#[test]
fn estop_blocks_deferred_commands_until_reset() {
    let mut pump = actuator(1, 9, ActuatorKind::Pump, 17);
    pump.min_on_time_ms = 5000;
    let rig = Rig::boot(Provisioning {
        actuators: vec![pump],
        ..Provisioning::default()
    });
    rig.link_up();
    rig.bus(9, OutputPayload::on()).unwrap();
    rig.step_to(5000);
    rig.bus(9, OutputPayload::off()).unwrap();
    assert_eq!(rig.line(17), Level::Off);

    // Anti-short-cycle holds the restart until t=10000.
    rig.step_to(6000);
    assert_eq!(
        rig.bus(9, OutputPayload::on()).unwrap(),
        CommandOutcome::Deferred { due_ms: 10_000 }
    );

    rig.step_to(7000);
    rig.ctx.emergency_stop().unwrap();
    rig.step_to(11_000);
    assert_eq!(rig.line(17), Level::Off);

    assert_eq!(rig.ctx.reset_estop(), 0);
    rig.step_to(12_000);
    assert_eq!(rig.line(17), Level::Off, "reset re-applied a command");
    assert_eq!(rig.bus(9, OutputPayload::on()).unwrap(), CommandOutcome::Applied);
    assert_eq!(rig.line(17), Level::On);
}

#[test]
fn estop_reaches_every_actuator_within_one_period() {
    let rig = Rig::boot(Provisioning {
        actuators: (0..8)
            .map(|i| actuator(i + 1, 9 + i as u16, ActuatorKind::Relay, 20 + i))
            .collect(),
        ..Provisioning::default()
    });
    rig.ctx.on_output_cycle(&[]);
    rig.ctx.on_output_cycle(&[]);
    for i in 0..8u16 {
        rig.bus(9 + i, OutputPayload::on()).unwrap();
    }
    rig.ctx.emergency_stop().unwrap();
    rig.step_to(100);
    for pin in 20..28 {
        assert_eq!(rig.line(pin), Level::Off, "pin {pin} still on");
    }
}

// ── Runtime reconfiguration ─────────────────────────────────────────

#[test]
fn removing_an_actuator_frees_its_pin_for_readmission() {
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        ..Provisioning::default()
    });
    let manager = rig.ctx.manager();
    manager.manual_set(9, Level::On, 100).unwrap();

    manager.remove(9).unwrap();
    assert!(rig.bank.is_released(0, 17));
    assert!(matches!(
        rig.ctx.actuator_status(9),
        Err(RtuError::UnknownSlot { slot: 9 })
    ));
    assert!(rig.ctx.pins().owner_of(0, 17).is_none());

    // Same pin, new slot and id.
    manager
        .admit(actuator(2, 12, ActuatorKind::Relay, 17))
        .unwrap();
    assert_eq!(manager.slots(), vec![12]);
}

#[test]
fn removing_a_firing_rule_releases_its_interlock() {
    let mut rule = AlarmRule::new(1, 1, AlarmCondition::Below, 5.0, 0.0);
    rule.interlock = InterlockSpec {
        enabled: true,
        target_slot: 9,
        action: InterlockAction::Off,
        pwm_duty: 0,
        release_on_clear: false,
    };
    let rig = Rig::boot(Provisioning {
        actuators: vec![actuator(1, 9, ActuatorKind::Relay, 17)],
        sensors: vec![sensor(1, "tank level")],
        alarm_rules: vec![rule],
    });
    rig.sample(1, 2.0);
    rig.ctx.alarm_tick();
    assert_eq!(rig.ctx.manager().interlock_holder(9), Some(1));

    assert!(rig.ctx.alarms().remove_rule(1).unwrap());
    assert_eq!(rig.ctx.manager().interlock_holder(9), None);
    assert!(rig.ctx.alarms().open_occurrences().is_empty());
    assert!(rig.store.list_alarm_rules().unwrap().is_empty());
    assert!(!rig.ctx.alarms().remove_rule(1).unwrap());
}

#[test]
fn refused_admission_leaves_no_row_and_no_claimed_line() {
    let rig = Rig::boot(Provisioning::default());
    let manager = rig.ctx.manager();

    rig.bank.mark_unavailable(0, 21);
    assert!(matches!(
        manager.admit(actuator(4, 13, ActuatorKind::Relay, 21)),
        Err(RtuError::HardwareUnavailable { slot: 13, .. })
    ));
    assert!(rig.store.list_actuators().unwrap().is_empty());
    assert!(rig.ctx.pins().owner_of(0, 21).is_none());

    // A stored row already owns slot 14: the opened line is handed back.
    rig.store
        .upsert_actuator(&actuator(5, 14, ActuatorKind::Relay, 30))
        .unwrap();
    assert!(matches!(
        manager.admit(actuator(6, 14, ActuatorKind::Relay, 22)),
        Err(RtuError::ConfigInvalid { slot: 14, .. })
    ));
    assert!(rig.bank.is_released(0, 22));
    assert!(rig.ctx.pins().owner_of(0, 22).is_none());
    assert_eq!(rig.store.list_actuators().unwrap().len(), 1);
    assert!(manager.slots().is_empty());
}

// ── Envelope under arbitrary bus traffic ────────────────────────────

const STEP_MS: u64 = 100;
const MIN_ON_MS: u64 = 500;
const MAX_ON_MS: u64 = 1500;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pump_respects_dwell_and_max_on(commands in prop::collection::vec(any::<bool>(), 1..80)) {
        let mut pump = actuator(1, 9, ActuatorKind::Pump, 17);
        pump.min_on_time_ms = MIN_ON_MS;
        pump.max_on_time_ms = MAX_ON_MS;
        let rig = Rig::boot(Provisioning {
            actuators: vec![pump],
            ..Provisioning::default()
        });
        rig.link_up();

        let mut level = Level::Off;
        let mut changed_at: Option<u64> = None;
        let mut on_since: Option<u64> = None;

        for (step, on) in commands.into_iter().enumerate() {
            let t = step as u64 * STEP_MS;
            rig.at(t);
            let payload = if on { OutputPayload::pwm(60) } else { OutputPayload::off() };
            let _ = rig.bus(9, payload);
            rig.ctx.watchdog_tick();

            let now = rig.line(17);
            if now != level {
                // Watchdog trips are exempt from the dwell.
                let watchdog = on_since.is_some_and(|s| t - s >= MAX_ON_MS);
                if let Some(last) = changed_at {
                    prop_assert!(
                        watchdog || t - last >= MIN_ON_MS,
                        "{level:?} -> {now:?} at {t} ms, previous change at {last} ms"
                    );
                }
                changed_at = Some(t);
                on_since = now.is_on().then_some(t);
                level = now;
            }
            if let Some(since) = on_since {
                prop_assert!(t - since <= MAX_ON_MS + STEP_MS, "on for {} ms", t - since);
            }
        }
    }
}
