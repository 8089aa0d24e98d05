//! Sensor samples and descriptors.
//!
//! Sensor hardware drivers live outside this workspace; they only have to
//! produce a [`SensorSample`] with a [`Quality`] flag.

use serde::{Deserialize, Serialize};

/// Sensor primary key.
pub type SensorId = u32;

/// Trustworthiness of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Ok,
    /// Value is older than the sensor's refresh contract.
    Stale,
    /// Transport or conversion failure.
    Bad,
}

/// Latest reading of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub sensor_id: SensorId,
    pub value: f32,
    pub quality: Quality,
    /// Monotonic time of acquisition [ms].
    pub sampled_at_ms: u64,
}

impl SensorSample {
    pub const fn new(sensor_id: SensorId, value: f32, quality: Quality, sampled_at_ms: u64) -> Self {
        Self {
            sensor_id,
            value,
            quality,
            sampled_at_ms,
        }
    }

    /// Good sample taken at `sampled_at_ms`.
    pub const fn ok(sensor_id: SensorId, value: f32, sampled_at_ms: u64) -> Self {
        Self::new(sensor_id, value, Quality::Ok, sampled_at_ms)
    }

    /// Quality after ageing: an `Ok` sample older than `max_age_ms` reads as
    /// `Stale`. `max_age_ms == 0` disables ageing.
    pub fn effective_quality(&self, now_ms: u64, max_age_ms: u64) -> Quality {
        if self.quality == Quality::Ok
            && max_age_ms > 0
            && now_ms.saturating_sub(self.sampled_at_ms) > max_age_ms
        {
            Quality::Stale
        } else {
            self.quality
        }
    }
}

/// Physical pin used by a sensor, reserved in the pin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GpioBinding {
    pub chip: u32,
    pub pin: u32,
}

fn default_true() -> bool {
    true
}

/// Registered sensor as listed by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub id: SensorId,
    pub name: String,
    /// Transport family (`adc`, `onewire`, `i2c`, `gpio`); informational.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub unit: String,
    /// Only GPIO-input sensors hold a pin.
    #[serde(default)]
    pub gpio: Option<GpioBinding>,
    /// Samples older than this many ms are treated as stale. 0 = never.
    #[serde(default)]
    pub max_age_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ageing_turns_ok_into_stale() {
        let s = SensorSample::ok(1, 20.5, 1000);
        assert_eq!(s.effective_quality(1500, 1000), Quality::Ok);
        assert_eq!(s.effective_quality(2001, 1000), Quality::Stale);
        assert_eq!(s.effective_quality(99_999, 0), Quality::Ok);
    }

    #[test]
    fn ageing_never_upgrades_bad() {
        let s = SensorSample::new(1, 0.0, Quality::Bad, 1000);
        assert_eq!(s.effective_quality(1000, 1000), Quality::Bad);
    }

    #[test]
    fn descriptor_defaults() {
        let d: SensorDescriptor = toml::from_str("id = 4\nname = \"tank level\"").unwrap();
        assert!(d.enabled);
        assert!(d.gpio.is_none());
        assert_eq!(d.max_age_ms, 0);
    }
}
