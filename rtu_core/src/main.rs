//! # RTU
//!
//! Field-bus remote terminal unit control plane.
//!
//! Loads `rtu.toml`, optionally seeds the store from a provisioning file,
//! admits the stored actuators and runs the control-plane tasks until
//! Ctrl+C, then releases every actuator to its safe electrical state.
//!
//! With `--stdin-frames`, decoded output frames are read from standard
//! input, one `<slot> <subslot> <hex payload>` per line (e.g. `9 1 01000000`).

use clap::Parser;
use rtu_common::config::{ConfigError, ConfigLoader, LogLevel, RtuConfig};
use rtu_common::clock::{Clock, MonotonicClock};
use rtu_common::consts::DEFAULT_CONFIG_PATH;
use rtu_core::bridge::OutputFrame;
use rtu_core::persistence::{JsonStore, PersistenceGateway};
use rtu_core::provision::Provisioning;
use rtu_core::{RtuContext, runtime};
use rtu_hal::DriverRegistry;
use rtu_hal::drivers::{SimulationBank, register_all_drivers};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// RTU control plane
#[derive(Parser, Debug)]
#[command(name = "rtu")]
#[command(version)]
#[command(about = "Field-bus RTU I/O control plane")]
struct Args {
    /// Path to the RTU configuration TOML.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Provisioning TOML upserted into the store before startup.
    #[arg(long, value_name = "FILE")]
    provision: Option<PathBuf>,

    /// Override the driver backend (`simulation`, `sysfs`).
    #[arg(long)]
    backend: Option<String>,

    /// Read decoded output frames from stdin.
    #[arg(long)]
    stdin_frames: bool,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let loaded = RtuConfig::load(&args.config);
    let log_level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |c| c.shared.log_level);
    setup_tracing(&args, log_level);

    info!("RTU v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, loaded).await {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("RTU shutdown complete");
}

async fn run(
    args: &Args,
    loaded: Result<RtuConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match loaded {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) => {
            warn!("{} not found, using defaults", args.config.display());
            RtuConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(backend) = &args.backend {
        config.hal.backend = backend.clone();
    }
    config.validate()?;
    info!(
        service = %config.shared.service_name,
        backend = %config.hal.backend,
        store = %config.storage.path.display(),
        "config OK"
    );

    let store = Arc::new(JsonStore::open(&config.storage.path)?);
    if let Some(path) = &args.provision {
        let provisioning = Provisioning::load(path)?;
        provisioning.apply(store.as_ref())?;
        info!("provisioned from {}", path.display());
    }

    let mut registry = DriverRegistry::new();
    register_all_drivers(&mut registry, SimulationBank::new());
    let store: Arc<dyn PersistenceGateway> = store;
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let ctx = Arc::new(RtuContext::bootstrap(config, registry, store, clock)?);

    let handle = runtime::spawn(ctx.clone());
    if args.stdin_frames {
        tokio::spawn(read_stdin_frames(handle.frame_sender()));
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Unable to listen for shutdown signal: {e}"),
    }

    handle.shutdown().await;
    tokio::task::spawn_blocking(move || ctx.shutdown()).await?;
    Ok(())
}

/// Forward stdin lines as single-frame cycles until EOF.
async fn read_stdin_frames(frames: mpsc::Sender<Vec<OutputFrame>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() || line.starts_with('#') => {}
            Ok(Some(line)) => match OutputFrame::parse_line(&line) {
                Ok(frame) => {
                    if frames.send(vec![frame]).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("stdin frame rejected: {e}"),
            },
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                error!("stdin read failed: {e}");
                break;
            }
        }
    }
}

/// Filter directive: `--verbose` wins over the configured level.
fn log_directive(verbose: bool, configured: LogLevel) -> &'static str {
    if verbose {
        LogLevel::Debug.as_directive()
    } else {
        configured.as_directive()
    }
}

/// Setup tracing subscriber. `RUST_LOG`, when set, replaces the level
/// from the CLI and config.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let directive = log_directive(args.verbose, configured);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
