//! Channel sensor resolution.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::catalogue::{CatalogueError, SensorCatalogue};
use crate::types::{ChannelInstruction, Sensor};

/// Maps channel instructions to calibration records.
///
/// The catalogue is loaded lazily on first use and cached until
/// [`reset_to_defaults`](Self::reset_to_defaults) or [`reload`](Self::reload).
/// Every session reloads before resolving, so file edits apply from the next
/// session on. A resolver without a path serves the built-in catalogue only.
pub struct SensorResolver {
    path: Option<PathBuf>,
    cache: RwLock<Option<Arc<SensorCatalogue>>>,
}

impl SensorResolver {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            cache: RwLock::new(None),
        }
    }

    /// Resolver backed by the built-in catalogue, no file I/O.
    pub fn builtin() -> Self {
        Self {
            path: None,
            cache: RwLock::new(Some(Arc::new(SensorCatalogue::builtin()))),
        }
    }

    /// Current catalogue, loading (and if needed creating) the file on first call.
    pub async fn catalogue(&self) -> Arc<SensorCatalogue> {
        if let Some(cat) = self.cache.read().await.as_ref() {
            return Arc::clone(cat);
        }

        let mut guard = self.cache.write().await;
        if let Some(cat) = guard.as_ref() {
            return Arc::clone(cat);
        }
        let loaded = match &self.path {
            Some(path) => match SensorCatalogue::load_or_init(path).await {
                Ok(cat) => cat,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Sensor catalogue unusable, using built-in sensors");
                    SensorCatalogue::builtin()
                }
            },
            None => SensorCatalogue::builtin(),
        };
        let loaded = Arc::new(loaded);
        *guard = Some(Arc::clone(&loaded));
        loaded
    }

    /// Resolve one channel instruction. `None` means the channel is disabled.
    pub async fn resolve(&self, instruction: &ChannelInstruction) -> Option<Arc<Sensor>> {
        let catalogue = self.catalogue().await;
        resolve_in(&catalogue, instruction)
    }

    /// Resolve all three logical channel slots.
    pub async fn resolve_all(
        &self,
        instructions: [&ChannelInstruction; 3],
    ) -> [Option<Arc<Sensor>>; 3] {
        let catalogue = self.catalogue().await;
        instructions.map(|i| resolve_in(&catalogue, i))
    }

    pub async fn sensors(&self) -> Vec<Sensor> {
        self.catalogue()
            .await
            .sensors()
            .iter()
            .map(|s| Sensor::clone(s))
            .collect()
    }

    /// Drop the cached catalogue so the next lookup re-reads the file.
    pub async fn reload(&self) {
        if self.path.is_some() {
            *self.cache.write().await = None;
        }
    }

    /// Overwrite the catalogue file with the built-in defaults.
    pub async fn reset_to_defaults(&self) -> Result<(), CatalogueError> {
        let mut guard = self.cache.write().await;
        if let Some(path) = &self.path {
            SensorCatalogue::write_defaults(path).await?;
            info!(path = %path.display(), "Sensor catalogue reset to defaults");
            *guard = None;
        }
        Ok(())
    }
}

/// Resolution rules against a loaded catalogue.
///
/// 1. channel 0: disabled, `None`
/// 2. known `sensor_id`: that sensor
/// 3. unknown `sensor_id`: warn, fall through
/// 4. channel with a default: the default
/// 5. anything else: error, synthetic Raw sensor
pub fn resolve_in(
    catalogue: &SensorCatalogue,
    instruction: &ChannelInstruction,
) -> Option<Arc<Sensor>> {
    let channel = instruction.channel_number;
    if channel == 0 {
        debug!("Disabled channel, no sensor");
        return None;
    }

    if let Some(id) = instruction.sensor_id.as_deref() {
        if let Some(sensor) = catalogue.get(id) {
            debug!(channel, sensor = %sensor.sensor_id, "Resolved sensor by id");
            return Some(sensor);
        }
        warn!(channel, sensor_id = %id, "Unknown sensor id, using channel default");
    }

    if let Some(sensor) = catalogue.for_channel(channel) {
        debug!(channel, sensor = %sensor.sensor_id, "Resolved default sensor for channel");
        return Some(sensor);
    }

    error!(channel, "Could not get sensor for channel, interpreting as percentage");
    Some(Arc::new(Sensor::raw_fallback()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_channel_resolves_to_none() {
        let resolver = SensorResolver::builtin();
        assert!(resolver.resolve(&ChannelInstruction::disabled()).await.is_none());
        // A sensor id does not revive a disabled channel.
        let with_id = ChannelInstruction::new(0, Some("acc100g_01"));
        assert!(resolver.resolve(&with_id).await.is_none());
    }

    #[tokio::test]
    async fn test_sensor_id_overrides_channel_default() {
        let resolver = SensorResolver::builtin();
        let s = resolver
            .resolve(&ChannelInstruction::new(1, Some("temp_01")))
            .await
            .unwrap();
        assert_eq!(s.sensor_id, "temp_01");
    }

    #[tokio::test]
    async fn test_unknown_sensor_id_falls_back_to_channel() {
        let resolver = SensorResolver::builtin();
        let s = resolver
            .resolve(&ChannelInstruction::new(2, Some("nope")))
            .await
            .unwrap();
        assert_eq!(s.sensor_id, "acc40g_y");
    }

    #[tokio::test]
    async fn test_out_of_range_channel_gets_raw_sensor() {
        let resolver = SensorResolver::builtin();
        let s = resolver
            .resolve(&ChannelInstruction::new(11, None))
            .await
            .unwrap();
        assert_eq!(s.name, "Raw");
        assert_eq!(s.phys_min, -100.0);
        assert_eq!(s.phys_max, 100.0);
    }

    #[tokio::test]
    async fn test_resolved_sensors_share_catalogue_records() {
        let resolver = SensorResolver::builtin();
        let a = resolver.resolve(&ChannelInstruction::new(1, None)).await.unwrap();
        let b = resolver.resolve(&ChannelInstruction::new(1, None)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_file_backed_resolver_creates_and_resets_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("sensors.toml");
        let resolver = SensorResolver::new(path.clone());

        assert!(!path.exists());
        let s = resolver.resolve(&ChannelInstruction::new(3, None)).await.unwrap();
        assert_eq!(s.sensor_id, "acc40g_z");
        assert!(path.exists());

        std::fs::write(&path, "not = [valid").unwrap();
        resolver.reload().await;
        // Broken file degrades to built-ins rather than failing the session.
        assert_eq!(resolver.sensors().await.len(), 10);

        resolver.reset_to_defaults().await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("acc100g_01"));
    }
}
