//! Event journal.
//!
//! Append-only, human-readable record of every state-changing path. Each
//! entry is mirrored to `tracing` and then written through the persistence
//! gateway. Nothing in the control plane reads the journal to decide
//! anything.

use rtu_common::clock::Clock;
use rtu_common::consts::MS_PER_DAY;
use rtu_common::journal::{EventSource, JournalEntry, Severity};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::persistence::{PersistenceError, PersistenceGateway};

/// Journal writer shared by all components.
pub struct Journal {
    store: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
}

impl Journal {
    pub fn new(store: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an entry stamped with the current wall time.
    ///
    /// A store failure is logged and otherwise ignored; journaling never
    /// fails the operation being journaled.
    pub fn record(&self, source: EventSource, severity: Severity, message: impl Into<String>) {
        let entry = JournalEntry {
            id: 0,
            ts: self.clock.wall_ms(),
            source,
            severity,
            message: message.into(),
        };
        mirror(&entry);
        if let Err(e) = self.store.append_event(&entry) {
            error!(source = %entry.source, error = %e, "journal append failed");
        }
    }

    pub fn debug(&self, source: EventSource, message: impl Into<String>) {
        self.record(source, Severity::Debug, message);
    }

    pub fn info(&self, source: EventSource, message: impl Into<String>) {
        self.record(source, Severity::Info, message);
    }

    pub fn warning(&self, source: EventSource, message: impl Into<String>) {
        self.record(source, Severity::Warning, message);
    }

    pub fn error(&self, source: EventSource, message: impl Into<String>) {
        self.record(source, Severity::Error, message);
    }

    pub fn critical(&self, source: EventSource, message: impl Into<String>) {
        self.record(source, Severity::Critical, message);
    }

    /// Remove entries older than `retention_days`. Returns the count removed.
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, PersistenceError> {
        let cutoff = self
            .clock
            .wall_ms()
            .saturating_sub(u64::from(retention_days) * MS_PER_DAY);
        let removed = self.store.cleanup_events(cutoff)?;
        if removed > 0 {
            info!(removed, retention_days, "journal cleanup");
        }
        Ok(removed)
    }

    /// Most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, PersistenceError> {
        self.store.recent_events(limit)
    }
}

fn mirror(entry: &JournalEntry) {
    let source = entry.source.as_str();
    let severity = entry.severity.as_str();
    match entry.severity {
        Severity::Debug => debug!(source, severity, "{}", entry.message),
        Severity::Info => info!(source, severity, "{}", entry.message),
        Severity::Warning => warn!(source, severity, "{}", entry.message),
        Severity::Error | Severity::Critical => error!(source, severity, "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::JsonStore;
    use rtu_common::clock::ManualClock;

    #[test]
    fn record_stamps_wall_time() {
        let store = Arc::new(JsonStore::in_memory());
        let clock = Arc::new(ManualClock::with_wall_origin(1_000_000));
        clock.set(250);
        let journal = Journal::new(store, clock);

        journal.warning(EventSource::Watchdog, "slot 10: max-on exceeded");
        let entries = journal.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ts, 1_000_250);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert_eq!(entries[0].source, EventSource::Watchdog);
    }

    #[test]
    fn cleanup_uses_retention_days() {
        let store = Arc::new(JsonStore::in_memory());
        let clock = Arc::new(ManualClock::with_wall_origin(0));
        let journal = Journal::new(store, clock.clone());

        journal.info(EventSource::System, "day zero");
        clock.advance(2 * MS_PER_DAY);
        journal.info(EventSource::System, "day two");

        assert_eq!(journal.cleanup(1).unwrap(), 1);
        let left = journal.recent(10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "day two");
    }
}
