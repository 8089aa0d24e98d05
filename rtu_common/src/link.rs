//! Controller link state.

use core::fmt;
use serde::{Deserialize, Serialize};

/// PROFINET controller liveness as seen from cyclic output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No recent frames; actuators follow their safe state.
    #[default]
    Down,
    /// One frame seen, waiting for a confirming second frame.
    Connecting,
    /// Frames arriving within the timeout.
    Up,
}

impl LinkState {
    /// Whether bus commands are accepted in this state.
    #[inline]
    pub const fn accepts_bus(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Down => "down",
            Self::Connecting => "connecting",
            Self::Up => "up",
        })
    }
}

/// A state change reported by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTransition {
    pub from: LinkState,
    pub to: LinkState,
    /// Monotonic time of the change [ms].
    pub at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_up_accepts_bus() {
        assert!(LinkState::Up.accepts_bus());
        assert!(!LinkState::Connecting.accepts_bus());
        assert!(!LinkState::Down.accepts_bus());
        assert_eq!(LinkState::default(), LinkState::Down);
    }
}
