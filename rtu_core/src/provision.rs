//! Provisioning file.
//!
//! Seeds the store with actuator, sensor and alarm rule rows at startup.
//!
//! ```toml
//! [[actuators]]
//! id = 1
//! slot = 9
//! name = "circulation pump"
//! kind = "pump"
//! gpio_pin = 17
//! min_on_time_ms = 5000
//!
//! [[sensors]]
//! id = 1
//! name = "tank temperature"
//! kind = "onewire"
//! unit = "C"
//!
//! [[alarm_rules]]
//! id = 1
//! sensor_id = 1
//! condition = "above"
//! threshold_high = 80.0
//! interlock = { enabled = true, target_slot = 9, action = "off", release_on_clear = true }
//! ```

use rtu_common::actuator::ActuatorConfig;
use rtu_common::alarm::AlarmRule;
use rtu_common::sensor::SensorDescriptor;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::persistence::{PersistenceError, PersistenceGateway};

/// Rows to upsert into the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provisioning {
    #[serde(default)]
    pub actuators: Vec<ActuatorConfig>,
    #[serde(default)]
    pub sensors: Vec<SensorDescriptor>,
    #[serde(default)]
    pub alarm_rules: Vec<AlarmRule>,
}

impl Provisioning {
    /// Upsert every row. Stops at the first store error.
    pub fn apply(&self, store: &dyn PersistenceGateway) -> Result<(), PersistenceError> {
        for actuator in &self.actuators {
            store.upsert_actuator(actuator)?;
        }
        for sensor in &self.sensors {
            store.upsert_sensor(sensor)?;
        }
        for rule in &self.alarm_rules {
            store.upsert_alarm_rule(rule)?;
        }
        info!(
            actuators = self.actuators.len(),
            sensors = self.sensors.len(),
            rules = self.alarm_rules.len(),
            "provisioning applied"
        );
        Ok(())
    }
}
