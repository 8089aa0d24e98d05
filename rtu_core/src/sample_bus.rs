//! Latest-value store for sensor samples.
//!
//! One slot per sensor, overwritten in place. Each sensor is assumed to
//! have a single writer; the bus does not order concurrent writers of the
//! same sensor.

use parking_lot::RwLock;
use rtu_common::sensor::{SensorId, SensorSample};
use std::collections::HashMap;
use tracing::trace;

/// Shared latest-sample cache.
#[derive(Debug, Default)]
pub struct SampleBus {
    latest: RwLock<HashMap<SensorId, SensorSample>>,
}

impl SampleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the sample of `sample.sensor_id`.
    pub fn publish(&self, sample: SensorSample) {
        trace!(
            sensor = sample.sensor_id,
            value = sample.value,
            quality = ?sample.quality,
            "sample published"
        );
        self.latest.write().insert(sample.sensor_id, sample);
    }

    /// Latest sample of a sensor, if any was published.
    pub fn read(&self, sensor_id: SensorId) -> Option<SensorSample> {
        self.latest.read().get(&sensor_id).copied()
    }

    /// Copy of every latest sample.
    pub fn snapshot(&self) -> Vec<SensorSample> {
        let mut all: Vec<_> = self.latest.read().values().copied().collect();
        all.sort_by_key(|s| s.sensor_id);
        all
    }

    /// Number of sensors with a sample.
    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }
}
