//! Sensor catalogue file.
//!
//! The catalogue is a TOML file listing calibration records plus an optional
//! channel-number to sensor-id mapping:
//!
//! ```toml
//! [[sensors]]
//! name = "Acceleration 100g"
//! sensor_id = "acc100g_01"
//! unit = "g"
//! phys_min = -100.0
//! phys_max = 100.0
//! volt_min = 0.33
//! volt_max = 2.97
//!
//! [channels]
//! "1" = "acc100g_01"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{default_sensors, Sensor};

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("Catalogue I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Catalogue parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Catalogue serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid catalogue: {0}")]
    Invalid(String),
}

/// On-disk shape of the catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueFile {
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    /// Channel number (as string key) to sensor id.
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
}

impl CatalogueFile {
    /// The built-in catalogue: ten sensors, channel `n` -> sensor `n - 1`.
    pub fn defaults() -> Self {
        let sensors = default_sensors();
        let channels = sensors
            .iter()
            .enumerate()
            .map(|(i, s)| ((i + 1).to_string(), s.sensor_id.clone()))
            .collect();
        Self { sensors, channels }
    }
}

/// Indexed, immutable view of a catalogue.
#[derive(Debug, Clone)]
pub struct SensorCatalogue {
    sensors: Vec<Arc<Sensor>>,
    by_id: HashMap<String, Arc<Sensor>>,
    by_channel: HashMap<u8, Arc<Sensor>>,
    builtin: Vec<Arc<Sensor>>,
}

impl SensorCatalogue {
    pub fn builtin() -> Self {
        // Defaults are known-good, so indexing cannot fail.
        Self::index(CatalogueFile::defaults()).unwrap_or_else(|_| Self {
            sensors: Vec::new(),
            by_id: HashMap::new(),
            by_channel: HashMap::new(),
            builtin: default_sensors().into_iter().map(Arc::new).collect(),
        })
    }

    /// Validate and index a parsed catalogue file.
    pub fn index(file: CatalogueFile) -> Result<Self, CatalogueError> {
        let mut by_id = HashMap::with_capacity(file.sensors.len());
        let mut sensors = Vec::with_capacity(file.sensors.len());
        for sensor in file.sensors {
            sensor.validate().map_err(CatalogueError::Invalid)?;
            let sensor = Arc::new(sensor);
            if by_id
                .insert(sensor.sensor_id.clone(), Arc::clone(&sensor))
                .is_some()
            {
                return Err(CatalogueError::Invalid(format!(
                    "duplicate sensor_id '{}'",
                    sensor.sensor_id
                )));
            }
            sensors.push(sensor);
        }

        let mut by_channel = HashMap::with_capacity(file.channels.len());
        for (key, sensor_id) in file.channels {
            let channel: u8 = key.trim().parse().map_err(|_| {
                CatalogueError::Invalid(format!("channel key '{key}' is not a channel number"))
            })?;
            let sensor = by_id.get(&sensor_id).ok_or_else(|| {
                CatalogueError::Invalid(format!(
                    "channel {channel} references unknown sensor_id '{sensor_id}'"
                ))
            })?;
            by_channel.insert(channel, Arc::clone(sensor));
        }

        Ok(Self {
            sensors,
            by_id,
            by_channel,
            builtin: default_sensors().into_iter().map(Arc::new).collect(),
        })
    }

    /// Load the catalogue at `path`, writing the defaults first if it is absent.
    pub async fn load_or_init(path: &Path) -> Result<Self, CatalogueError> {
        if tokio::fs::metadata(path).await.is_err() {
            Self::write_defaults(path).await?;
            info!(path = %path.display(), "Created sensor catalogue with built-in defaults");
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogueError::Io(path.to_path_buf(), e))?;
        let file: CatalogueFile = toml::from_str(&contents)
            .map_err(|e| CatalogueError::Parse(path.to_path_buf(), e))?;
        let catalogue = Self::index(file)?;
        info!(
            path = %path.display(),
            sensors = catalogue.sensors.len(),
            "Loaded sensor catalogue"
        );
        Ok(catalogue)
    }

    /// Overwrite `path` with the built-in catalogue.
    pub async fn write_defaults(path: &Path) -> Result<(), CatalogueError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CatalogueError::Io(parent.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&CatalogueFile::defaults())?;
        tokio::fs::write(path, text)
            .await
            .map_err(|e| CatalogueError::Io(path.to_path_buf(), e))
    }

    pub fn get(&self, sensor_id: &str) -> Option<Arc<Sensor>> {
        self.by_id.get(sensor_id).cloned()
    }

    /// Default sensor for a channel number, if one is defined.
    ///
    /// The catalogue mapping wins; channels 1..=10 fall back to the built-in list.
    pub fn for_channel(&self, channel: u8) -> Option<Arc<Sensor>> {
        if let Some(sensor) = self.by_channel.get(&channel) {
            return Some(Arc::clone(sensor));
        }
        if (1..=10).contains(&channel) {
            if !self.by_channel.is_empty() {
                warn!(channel, "Channel missing from catalogue mapping, using built-in default");
            }
            return self.builtin.get(usize::from(channel) - 1).cloned();
        }
        None
    }

    pub fn sensors(&self) -> &[Arc<Sensor>] {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_maps_channels_in_order() {
        let cat = SensorCatalogue::builtin();
        assert_eq!(cat.sensors().len(), 10);
        assert_eq!(cat.for_channel(1).unwrap().sensor_id, "acc100g_01");
        assert_eq!(cat.for_channel(5).unwrap().sensor_id, "temp_01");
        assert_eq!(cat.for_channel(10).unwrap().sensor_id, "vbat_01");
        assert!(cat.for_channel(0).is_none());
        assert!(cat.for_channel(11).is_none());
    }

    #[test]
    fn test_index_rejects_dangling_channel() {
        let mut file = CatalogueFile::defaults();
        file.channels.insert("3".to_string(), "missing".to_string());
        assert!(matches!(
            SensorCatalogue::index(file),
            Err(CatalogueError::Invalid(_))
        ));
    }

    #[test]
    fn test_index_rejects_duplicate_ids() {
        let mut file = CatalogueFile::defaults();
        let dup = file.sensors[0].clone();
        file.sensors.push(dup);
        assert!(SensorCatalogue::index(file).is_err());
    }

    #[tokio::test]
    async fn test_load_or_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("sensors.toml");

        let first = SensorCatalogue::load_or_init(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(first.sensors().len(), 10);

        // A user edit survives the next load.
        let mut file: CatalogueFile =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        file.sensors[0].name = "Custom 100g".to_string();
        std::fs::write(&path, toml::to_string_pretty(&file).unwrap()).unwrap();

        let second = SensorCatalogue::load_or_init(&path).await.unwrap();
        assert_eq!(second.get("acc100g_01").unwrap().name, "Custom 100g");
    }
}
