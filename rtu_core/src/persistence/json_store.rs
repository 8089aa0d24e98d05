//! JSON file store.
//!
//! Configuration, actuator state and alarm occurrences live in one JSON
//! document. Every write rewrites it through a temporary file that is
//! synced before an atomic rename, so a crash leaves either the old or the
//! new document on disk.
//!
//! Journal events go to a JSON-lines file next to it
//! (`store.json` → `store.events.jsonl`), one entry per appended line.
//! A torn final line from a crash is dropped on open. Without a path the
//! store lives in memory only.

use parking_lot::Mutex;
use rtu_common::actuator::{ActuatorConfig, ActuatorId, ActuatorStateRecord};
use rtu_common::alarm::{AlarmOccurrence, AlarmRule, OccurrenceId, RuleId};
use rtu_common::journal::JournalEntry;
use rtu_common::sensor::{SensorDescriptor, SensorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{PersistenceError, PersistenceGateway};

/// Serialized document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    actuators: BTreeMap<ActuatorId, ActuatorConfig>,
    #[serde(default)]
    actuator_state: BTreeMap<ActuatorId, ActuatorStateRecord>,
    #[serde(default)]
    sensors: BTreeMap<SensorId, SensorDescriptor>,
    #[serde(default)]
    alarm_rules: BTreeMap<RuleId, AlarmRule>,
    #[serde(default)]
    occurrences: BTreeMap<OccurrenceId, AlarmOccurrence>,
    #[serde(default)]
    next_occurrence_id: OccurrenceId,
}

impl StoreData {
    const CURRENT_VERSION: u32 = 2;
}

/// Retained journal entries and the append handle of their log.
#[derive(Debug, Default)]
struct EventLog {
    path: Option<PathBuf>,
    file: Option<File>,
    entries: Vec<JournalEntry>,
    next_id: u64,
}

fn io_err(path: &Path, e: std::io::Error) -> PersistenceError {
    PersistenceError::Io(format!("{}: {e}", path.display()))
}

/// Write `bytes` to `path` through a synced temporary file and a rename.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let mut file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    file.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
    file.sync_all().map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

impl EventLog {
    fn open(path: PathBuf) -> Result<Self, PersistenceError> {
        let mut entries = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(|e| io_err(&path, e))?);
            let lines: Vec<String> = reader
                .lines()
                .collect::<Result<_, _>>()
                .map_err(|e| io_err(&path, e))?;
            let last = lines.len().saturating_sub(1);
            for (n, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) if n == last => {
                        warn!(path = %path.display(), error = %e, "torn journal line dropped");
                    }
                    Err(e) => {
                        return Err(PersistenceError::Serialize(format!(
                            "{} line {}: {e}",
                            path.display(),
                            n + 1
                        )));
                    }
                }
            }
        }
        let next_id = entries.last().map_or(0, |e| e.id);
        let mut log = Self {
            path: Some(path),
            file: None,
            entries,
            next_id,
        };
        // Rewrite once so a dropped torn line does not precede new appends.
        log.rewrite()?;
        Ok(log)
    }

    fn encode(entry: &JournalEntry) -> Result<String, PersistenceError> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<u64, PersistenceError> {
        let id = self.next_id + 1;
        let mut row = entry.clone();
        row.id = id;
        if let (Some(path), Some(file)) = (&self.path, self.file.as_mut()) {
            file.write_all(Self::encode(&row)?.as_bytes())
                .map_err(|e| io_err(path, e))?;
        }
        self.next_id = id;
        self.entries.push(row);
        Ok(id)
    }

    /// Replace the log with the retained entries and reopen it for append.
    fn rewrite(&mut self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut encoded = String::new();
        for entry in &self.entries {
            encoded.push_str(&Self::encode(entry)?);
        }
        self.file = None;
        replace_file(path, encoded.as_bytes())?;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        self.file = Some(file);
        Ok(())
    }
}

/// [`PersistenceGateway`] over a JSON document and a JSON-lines journal.
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
    events: Mutex<EventLog>,
}

impl JsonStore {
    /// Store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData {
                version: StoreData::CURRENT_VERSION,
                ..StoreData::default()
            }),
            events: Mutex::new(EventLog::default()),
        }
    }

    /// Journal file belonging to the document at `path`.
    pub fn events_path(path: &Path) -> PathBuf {
        path.with_extension("events.jsonl")
    }

    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read(&path)
                .map_err(|e| PersistenceError::Io(format!("{}: {e}", path.display())))?;
            let data: StoreData = serde_json::from_slice(&raw)
                .map_err(|e| PersistenceError::Serialize(format!("{}: {e}", path.display())))?;
            info!(
                path = %path.display(),
                actuators = data.actuators.len(),
                rules = data.alarm_rules.len(),
                "store loaded"
            );
            data
        } else {
            debug!(path = %path.display(), "store file absent, starting empty");
            StoreData {
                version: StoreData::CURRENT_VERSION,
                ..StoreData::default()
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let events = EventLog::open(Self::events_path(&path))?;
        debug!(events = events.entries.len(), "journal loaded");
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
            events: Mutex::new(events),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn flush(&self, data: &StoreData) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let encoded = serde_json::to_vec_pretty(data)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        replace_file(path, &encoded)
    }

    /// Apply `f` to the document and write it out.
    ///
    /// A failed flush leaves the in-memory change in place; the next
    /// successful write carries it to disk.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<R, PersistenceError>,
    ) -> Result<R, PersistenceError> {
        let mut data = self.data.lock();
        let out = f(&mut data)?;
        self.flush(&data)?;
        Ok(out)
    }
}

impl PersistenceGateway for JsonStore {
    fn list_actuators(&self) -> Result<Vec<ActuatorConfig>, PersistenceError> {
        Ok(self.data.lock().actuators.values().cloned().collect())
    }

    fn upsert_actuator(&self, config: &ActuatorConfig) -> Result<(), PersistenceError> {
        self.write(|d| {
            if let Some(other) = d
                .actuators
                .values()
                .find(|a| a.slot == config.slot && a.id != config.id)
            {
                return Err(PersistenceError::Constraint(format!(
                    "slot {} already used by actuator {}",
                    config.slot, other.id
                )));
            }
            d.actuators.insert(config.id, config.clone());
            Ok(())
        })
    }

    fn delete_actuator(&self, id: ActuatorId) -> Result<(), PersistenceError> {
        self.write(|d| {
            if d.actuators.remove(&id).is_none() {
                return Err(PersistenceError::NotFound {
                    what: "actuator",
                    id: u64::from(id),
                });
            }
            d.actuator_state.remove(&id);
            Ok(())
        })
    }

    fn load_actuator_state(
        &self,
        id: ActuatorId,
    ) -> Result<Option<ActuatorStateRecord>, PersistenceError> {
        Ok(self.data.lock().actuator_state.get(&id).cloned())
    }

    fn save_actuator_state(&self, record: &ActuatorStateRecord) -> Result<(), PersistenceError> {
        self.write(|d| {
            if !d.actuators.contains_key(&record.actuator_id) {
                return Err(PersistenceError::Constraint(format!(
                    "state for unknown actuator {}",
                    record.actuator_id
                )));
            }
            d.actuator_state.insert(record.actuator_id, record.clone());
            Ok(())
        })
    }

    fn list_sensors(&self) -> Result<Vec<SensorDescriptor>, PersistenceError> {
        Ok(self.data.lock().sensors.values().cloned().collect())
    }

    fn upsert_sensor(&self, sensor: &SensorDescriptor) -> Result<(), PersistenceError> {
        self.write(|d| {
            d.sensors.insert(sensor.id, sensor.clone());
            Ok(())
        })
    }

    fn list_alarm_rules(&self) -> Result<Vec<AlarmRule>, PersistenceError> {
        Ok(self.data.lock().alarm_rules.values().cloned().collect())
    }

    fn upsert_alarm_rule(&self, rule: &AlarmRule) -> Result<(), PersistenceError> {
        self.write(|d| {
            d.alarm_rules.insert(rule.id, rule.clone());
            Ok(())
        })
    }

    fn delete_alarm_rule(&self, id: RuleId) -> Result<(), PersistenceError> {
        self.write(|d| {
            d.alarm_rules
                .remove(&id)
                .map(|_| ())
                .ok_or(PersistenceError::NotFound {
                    what: "alarm rule",
                    id: u64::from(id),
                })
        })
    }

    fn insert_occurrence(
        &self,
        occurrence: &AlarmOccurrence,
    ) -> Result<OccurrenceId, PersistenceError> {
        self.write(|d| {
            d.next_occurrence_id += 1;
            let id = d.next_occurrence_id;
            let mut row = occurrence.clone();
            row.id = id;
            d.occurrences.insert(id, row);
            Ok(id)
        })
    }

    fn update_occurrence(&self, occurrence: &AlarmOccurrence) -> Result<(), PersistenceError> {
        self.write(|d| match d.occurrences.get_mut(&occurrence.id) {
            Some(row) => {
                *row = occurrence.clone();
                Ok(())
            }
            None => Err(PersistenceError::NotFound {
                what: "alarm occurrence",
                id: occurrence.id,
            }),
        })
    }

    fn get_occurrence(
        &self,
        id: OccurrenceId,
    ) -> Result<Option<AlarmOccurrence>, PersistenceError> {
        Ok(self.data.lock().occurrences.get(&id).cloned())
    }

    fn append_event(&self, entry: &JournalEntry) -> Result<u64, PersistenceError> {
        self.events.lock().append(entry)
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<JournalEntry>, PersistenceError> {
        let log = self.events.lock();
        let skip = log.entries.len().saturating_sub(limit);
        Ok(log.entries[skip..].to_vec())
    }

    fn cleanup_events(&self, cutoff_ms: u64) -> Result<usize, PersistenceError> {
        let mut log = self.events.lock();
        let before = log.entries.len();
        log.entries.retain(|e| e.ts >= cutoff_ms);
        let removed = before - log.entries.len();
        if removed > 0 {
            log.rewrite()?;
        }
        Ok(removed)
    }
}
