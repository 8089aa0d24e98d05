//! Journal entry types.
//!
//! The journal is append-only and age-bounded; nothing in the control plane
//! reads it back to make decisions.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Entry severity, also used as alarm rule severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {s:?}")),
        }
    }
}

/// Component that wrote an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Actuator,
    Watchdog,
    Alarm,
    Bridge,
    Liveness,
    Persistence,
    Operator,
    System,
}

impl EventSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Actuator => "actuator",
            Self::Watchdog => "watchdog",
            Self::Alarm => "alarm",
            Self::Bridge => "bridge",
            Self::Liveness => "liveness",
            Self::Persistence => "persistence",
            Self::Operator => "operator",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the `event` table. `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(default)]
    pub id: u64,
    /// Wall-clock [ms since epoch].
    pub ts: u64,
    pub source: EventSource,
    pub severity: Severity,
    pub message: String,
}
