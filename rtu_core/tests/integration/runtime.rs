//! Integration test: tokio runtime tasks.
//!
//! Runs the intake and periodic tasks on a real clock with short periods:
//! frames bring the link up and drive an output, silence drops the link
//! into degraded mode, shutdown stops every task.

use rtu_common::actuator::{ActuatorKind, Level};
use rtu_common::clock::MonotonicClock;
use rtu_common::link::LinkState;
use rtu_core::bridge::{OutputFrame, OutputPayload};
use rtu_core::persistence::{JsonStore, PersistenceGateway};
use rtu_core::{RtuContext, runtime};
use rtu_hal::DriverRegistry;
use rtu_hal::drivers::{SimulationBank, register_all_drivers};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use super::common::{actuator, test_config};

/// Poll `cond` every 5 ms until it holds or `within` elapses.
async fn eventually(within: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_follow_frames_and_link_loss() {
    let mut config = test_config();
    config.controller.up_timeout_ms = 200;
    config.actuators.watchdog_period_ms = 10;
    config.alarms.period_ms = 10;

    let store = JsonStore::in_memory();
    store
        .upsert_actuator(&actuator(1, 9, ActuatorKind::Relay, 17))
        .unwrap();
    let store: Arc<dyn PersistenceGateway> = Arc::new(store);
    let bank = SimulationBank::new();
    let mut registry = DriverRegistry::new();
    register_all_drivers(&mut registry, bank.clone());
    let ctx = Arc::new(
        RtuContext::bootstrap(config, registry, store, Arc::new(MonotonicClock::new())).unwrap(),
    );

    let handle = runtime::spawn(ctx.clone());
    let frames = handle.frame_sender();
    let on = OutputFrame::new(9, 1, &OutputPayload::on().to_bytes()).unwrap();
    for _ in 0..3 {
        frames.send(vec![on]).await.unwrap();
        sleep(Duration::from_millis(20)).await;
    }

    let line_on = || bank.level(0, 17).is_some_and(|(level, _)| level == Level::On);
    assert!(eventually(Duration::from_secs(2), line_on).await);
    assert_eq!(ctx.link_state(), LinkState::Up);

    // Silence: the watchdog task drops the link and the safe state applies.
    assert!(eventually(Duration::from_secs(2), || ctx.link_state() == LinkState::Down).await);
    assert!(eventually(Duration::from_secs(1), || !line_on()).await);
    assert!(ctx.actuator_status(9).unwrap().degraded);

    handle.shutdown().await;
    let ctx_for_shutdown = ctx.clone();
    tokio::task::spawn_blocking(move || ctx_for_shutdown.shutdown())
        .await
        .unwrap();
    assert!(ctx.pins().is_empty());
    assert!(bank.is_released(0, 17));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_without_traffic_is_clean() {
    let mut config = test_config();
    config.controller.up_timeout_ms = 200;
    config.actuators.watchdog_period_ms = 10;
    let mut registry = DriverRegistry::new();
    register_all_drivers(&mut registry, SimulationBank::new());
    let ctx = Arc::new(
        RtuContext::bootstrap(
            config,
            registry,
            Arc::new(JsonStore::in_memory()),
            Arc::new(MonotonicClock::new()),
        )
        .unwrap(),
    );

    let handle = runtime::spawn(ctx.clone());
    sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("runtime did not stop");
    assert_eq!(ctx.link_state(), LinkState::Down);
}
