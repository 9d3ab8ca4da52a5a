//! Sensor calibration records.

use serde::{Deserialize, Serialize};

/// Calibration record for one physical sensor.
///
/// Maps the voltage range a sensor produces to the physical range it measures.
/// Loaded once from the catalogue and shared as `Arc<Sensor>` for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    pub sensor_id: String,
    pub unit: String,
    #[serde(default)]
    pub dimension: String,
    pub phys_min: f64,
    pub phys_max: f64,
    pub volt_min: f64,
    pub volt_max: f64,
    /// Physical units per volt. Derived from the ranges when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_factor: Option<f64>,
    /// Physical value at `volt_min`. Defaults to `phys_min`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
}

impl Sensor {
    pub fn new(
        name: &str,
        sensor_type: Option<&str>,
        sensor_id: &str,
        unit: &str,
        dimension: &str,
        phys: (f64, f64),
        volt: (f64, f64),
    ) -> Self {
        Self {
            name: name.to_string(),
            sensor_type: sensor_type.map(str::to_string),
            sensor_id: sensor_id.to_string(),
            unit: unit.to_string(),
            dimension: dimension.to_string(),
            phys_min: phys.0,
            phys_max: phys.1,
            volt_min: volt.0,
            volt_max: volt.1,
            scaling_factor: None,
            offset: None,
        }
    }

    /// Effective physical units per volt.
    pub fn scale(&self) -> f64 {
        self.scaling_factor.unwrap_or_else(|| {
            let span = self.volt_max - self.volt_min;
            if span.abs() < f64::EPSILON {
                0.0
            } else {
                (self.phys_max - self.phys_min) / span
            }
        })
    }

    /// Effective physical value at `volt_min`.
    pub fn zero_offset(&self) -> f64 {
        self.offset.unwrap_or(self.phys_min)
    }

    /// Convert a voltage reading into physical units.
    ///
    /// `offset + (volts - volt_min) * (phys_max - phys_min) / (volt_max - volt_min)`
    #[inline]
    pub fn to_physical(&self, volts: f64) -> f64 {
        self.zero_offset() + (volts - self.volt_min) * self.scale()
    }

    /// Reject records that cannot produce a finite conversion.
    pub fn validate(&self) -> Result<(), String> {
        if self.sensor_id.trim().is_empty() {
            return Err(format!("sensor '{}': sensor_id must not be empty", self.name));
        }
        let values = [self.phys_min, self.phys_max, self.volt_min, self.volt_max];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(format!("sensor '{}': ranges must be finite", self.sensor_id));
        }
        if (self.volt_max - self.volt_min).abs() < f64::EPSILON && self.scaling_factor.is_none() {
            return Err(format!(
                "sensor '{}': volt_min and volt_max must differ",
                self.sensor_id
            ));
        }
        Ok(())
    }

    /// Synthetic "percentage" sensor used for channels with no defined sensor.
    pub fn raw_fallback() -> Self {
        Self::new("Raw", None, "raw_default_01", "-", "Raw", (-100.0, 100.0), (0.0, 3.3))
    }
}

/// The ten built-in sensors. Channel `n` (1..=10) defaults to entry `n - 1`.
pub fn default_sensors() -> Vec<Sensor> {
    vec![
        Sensor::new("Acceleration 100g", Some("ADXL1001"), "acc100g_01", "g", "Acceleration", (-100.0, 100.0), (0.33, 2.97)),
        Sensor::new("Acceleration 40g Y", Some("ADXL358C"), "acc40g_y", "g", "Acceleration", (-40.0, 40.0), (0.1, 1.7)),
        Sensor::new("Acceleration 40g Z", Some("ADXL358C"), "acc40g_z", "g", "Acceleration", (-40.0, 40.0), (0.1, 1.7)),
        Sensor::new("Acceleration 40g X", Some("ADXL358C"), "acc40g_x", "g", "Acceleration", (-40.0, 40.0), (0.1, 1.7)),
        Sensor::new("Temperature", Some("ADXL358C"), "temp_01", "°C", "Temperature", (-40.0, 125.0), (0.772, 1.267)),
        Sensor::new("Photodiode", None, "photo_01", "-", "Light", (0.0, 1.0), (0.0, 3.3)),
        Sensor::new("Backpack 1", None, "backpack_01", "/", "Backpack", (0.0, 1.0), (0.0, 3.3)),
        Sensor::new("Backpack 2", None, "backpack_02", "/", "Backpack", (0.0, 1.0), (0.0, 3.3)),
        Sensor::new("Backpack 3", None, "backpack_03", "/", "Backpack", (0.0, 1.0), (0.0, 3.3)),
        Sensor::new("Battery Voltage", None, "vbat_01", "V", "Voltage", (2.9, 4.2), (0.509, 0.737)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_physical_spans_range() {
        let s = Sensor::new("t", None, "t", "g", "Acceleration", (-100.0, 100.0), (0.33, 2.97));
        assert!((s.to_physical(0.33) - -100.0).abs() < 1e-9);
        assert!((s.to_physical(2.97) - 100.0).abs() < 1e-9);
        assert!((s.to_physical(1.65)).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_offset_and_scale_win() {
        let mut s = Sensor::new("t", None, "t", "V", "Voltage", (0.0, 1.0), (0.0, 1.0));
        s.scaling_factor = Some(2.0);
        s.offset = Some(10.0);
        assert!((s.to_physical(0.5) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_defaults_are_valid_and_unique() {
        let sensors = default_sensors();
        assert_eq!(sensors.len(), 10);
        for s in &sensors {
            assert!(s.validate().is_ok(), "{} should validate", s.sensor_id);
        }
        let mut ids: Vec<_> = sensors.iter().map(|s| s.sensor_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_degenerate_voltage_range_rejected() {
        let s = Sensor::new("flat", None, "flat", "-", "", (0.0, 1.0), (1.0, 1.0));
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_raw_fallback_shape() {
        let raw = Sensor::raw_fallback();
        assert_eq!(raw.sensor_id, "raw_default_01");
        assert_eq!(raw.phys_min, -100.0);
        assert_eq!(raw.phys_max, 100.0);
        assert_eq!(raw.dimension, "Raw");
    }
}
