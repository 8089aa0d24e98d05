//! Controller liveness monitor.
//!
//! Classifies the controller link from cyclic output frame arrivals:
//!
//! ```text
//!   down ── first frame ──► connecting ── second frame < timeout ──► up
//!    ▲                          │                                    │
//!    └──── no frame ≥ timeout ──┴──────── no frame ≥ timeout ────────┘
//! ```
//!
//! Requiring a second frame rejects solitary frames from network glitches.
//! Every transition is journaled and pushed to the registered
//! [`LinkObserver`] (the actuator manager's degraded-mode sink).

use parking_lot::Mutex;
use rtu_common::clock::Clock;
use rtu_common::journal::{EventSource, Severity};
use rtu_common::link::{LinkState, LinkTransition};
use std::sync::Arc;

use crate::journal::Journal;

/// Receiver of link transitions.
pub trait LinkObserver: Send + Sync {
    fn link_changed(&self, transition: LinkTransition);
}

#[derive(Debug, Default)]
struct LinkInner {
    state: LinkState,
    last_frame_ms: Option<u64>,
}

/// Link state machine fed by frame timestamps and periodic polls.
pub struct LivenessMonitor {
    inner: Mutex<LinkInner>,
    up_timeout_ms: u64,
    clock: Arc<dyn Clock>,
    journal: Arc<Journal>,
    observer: Arc<dyn LinkObserver>,
}

impl LivenessMonitor {
    pub fn new(
        up_timeout_ms: u64,
        clock: Arc<dyn Clock>,
        journal: Arc<Journal>,
        observer: Arc<dyn LinkObserver>,
    ) -> Self {
        Self {
            inner: Mutex::new(LinkInner::default()),
            up_timeout_ms,
            clock,
            journal,
            observer,
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Monotonic time of the last received frame.
    pub fn last_frame_ms(&self) -> Option<u64> {
        self.inner.lock().last_frame_ms
    }

    /// Record a cyclic output frame received now.
    pub fn frame_received(&self) -> Option<LinkTransition> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let previous = inner.last_frame_ms.replace(now);
        let next = match inner.state {
            LinkState::Down => LinkState::Connecting,
            LinkState::Connecting => match previous {
                Some(prev) if now.saturating_sub(prev) < self.up_timeout_ms => LinkState::Up,
                // The first frame is too old to confirm; this one starts over.
                _ => LinkState::Connecting,
            },
            LinkState::Up => LinkState::Up,
        };
        self.transition(&mut inner, next, now)
    }

    /// Check the frame timeout. Called periodically by the watchdog task.
    pub fn poll(&self) -> Option<LinkTransition> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.state == LinkState::Down {
            return None;
        }
        let silent_for = inner
            .last_frame_ms
            .map_or(u64::MAX, |last| now.saturating_sub(last));
        if silent_for >= self.up_timeout_ms {
            self.transition(&mut inner, LinkState::Down, now)
        } else {
            None
        }
    }

    /// Apply `next`, journal it and notify the observer while still holding
    /// the state lock so observers see transitions in order.
    fn transition(
        &self,
        inner: &mut LinkInner,
        next: LinkState,
        now: u64,
    ) -> Option<LinkTransition> {
        if inner.state == next {
            return None;
        }
        let transition = LinkTransition {
            from: inner.state,
            to: next,
            at_ms: now,
        };
        inner.state = next;

        let severity = match next {
            LinkState::Down => Severity::Warning,
            LinkState::Connecting => Severity::Info,
            LinkState::Up => Severity::Info,
        };
        self.journal.record(
            EventSource::Liveness,
            severity,
            format!("controller link {} -> {}", transition.from, transition.to),
        );
        self.observer.link_changed(transition);
        Some(transition)
    }
}
