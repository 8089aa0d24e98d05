//! System-wide constants for the RTU workspace.
//!
//! Single source of truth for numeric limits, default periods and default paths.
//! Imported by all crates; do not redefine these elsewhere.

/// Maximum number of admitted actuators.
pub const MAX_ACTUATORS: usize = 64;

/// Highest valid PROFINET output slot number.
pub const MAX_SLOT: u16 = 0x7FFF;

/// Period of the actuator watchdog task [ms].
pub const WATCHDOG_PERIOD_MS: u64 = 100;

/// Default controller liveness timeout [ms].
pub const DEFAULT_UP_TIMEOUT_MS: u64 = 3000;

/// Default alarm evaluation period [ms] (1 Hz).
pub const DEFAULT_ALARM_PERIOD_MS: u64 = 1000;

/// Retries after a transient driver fault before escalating to hard.
pub const DRIVER_RETRY_LIMIT: u32 = 3;

/// Backoff between driver retries [ms].
pub const DRIVER_RETRY_BACKOFF_MS: u64 = 50;

/// Default upper bound on a single driver `apply` [ms].
pub const DEFAULT_APPLY_TIMEOUT_MS: u64 = 250;

/// Maximum PWM duty [%].
pub const MAX_DUTY: u8 = 100;

/// Default journal retention [days].
pub const DEFAULT_JOURNAL_RETENTION_DAYS: u32 = 30;

/// Default interval between journal cleanups [s].
pub const DEFAULT_CLEANUP_INTERVAL_S: u64 = 3600;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rtu/rtu.toml";

/// Default store file path.
pub const DEFAULT_STORE_PATH: &str = "/var/lib/rtu/store.json";

/// Milliseconds per day, for journal retention arithmetic.
pub const MS_PER_DAY: u64 = 86_400_000;
