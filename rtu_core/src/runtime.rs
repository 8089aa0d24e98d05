//! Runtime tasks.
//!
//! | Task | Wakes on | Work |
//! |------|----------|------|
//! | frame intake | decoded output cycle | bridge → manager bus sink |
//! | watchdog | `actuators.watchdog_period_ms` | link timeout, dwell, max-on, overrides |
//! | alarms | `alarms.period_ms` | rule evaluation |
//! | journal cleanup | `storage.cleanup_interval_s` | retention |
//!
//! Control-plane calls may block on a driver or the store, so every task
//! hands its work to the blocking pool and awaits it. Work within a task
//! stays sequential, which keeps per-slot arrival order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::bridge::OutputFrame;
use crate::context::RtuContext;

/// Output cycles buffered between the fieldbus side and the intake task.
pub const FRAME_QUEUE_DEPTH: usize = 64;

/// Handle to the spawned tasks.
pub struct RuntimeHandle {
    frames: mpsc::Sender<Vec<OutputFrame>>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Sender for decoded output cycles.
    pub fn frame_sender(&self) -> mpsc::Sender<Vec<OutputFrame>> {
        self.frames.clone()
    }

    /// Stop every task and wait for it to finish its current work.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "runtime task ended abnormally");
            }
        }
        info!("runtime stopped");
    }
}

/// Spawn all tasks on the current tokio runtime.
pub fn spawn(ctx: Arc<RtuContext>) -> RuntimeHandle {
    let (frames, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let (stop, stop_rx) = watch::channel(false);
    let config = ctx.config().clone();

    let tasks = vec![
        spawn_intake(ctx.clone(), frame_rx, stop_rx.clone()),
        spawn_periodic(
            "watchdog",
            Duration::from_millis(config.actuators.watchdog_period_ms),
            ctx.clone(),
            stop_rx.clone(),
            RtuContext::watchdog_tick,
        ),
        spawn_periodic(
            "alarms",
            Duration::from_millis(config.alarms.period_ms),
            ctx.clone(),
            stop_rx.clone(),
            RtuContext::alarm_tick,
        ),
        spawn_periodic(
            "journal-cleanup",
            Duration::from_secs(config.storage.cleanup_interval_s),
            ctx,
            stop_rx,
            |ctx| match ctx.journal_cleanup() {
                Ok(removed) => debug!(removed, "journal cleanup"),
                Err(e) => error!(error = %e, "journal cleanup failed"),
            },
        ),
    ];

    RuntimeHandle {
        frames,
        stop,
        tasks,
    }
}

fn spawn_intake(
    ctx: Arc<RtuContext>,
    mut frames: mpsc::Receiver<Vec<OutputFrame>>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(task = "frame-intake", "task started");
        loop {
            tokio::select! {
                cycle = frames.recv() => {
                    let Some(cycle) = cycle else { break };
                    let ctx = ctx.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || ctx.on_output_cycle(&cycle)).await {
                        error!(error = %e, "frame handling panicked");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        info!(task = "frame-intake", "task stopped");
    })
}

fn spawn_periodic(
    name: &'static str,
    period: Duration,
    ctx: Arc<RtuContext>,
    mut stop: watch::Receiver<bool>,
    work: fn(&RtuContext),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, period_ms = period.as_millis() as u64, "task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ctx = ctx.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || work(&ctx)).await {
                        error!(task = name, error = %e, "periodic work panicked");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        info!(task = name, "task stopped");
    })
}
