//! Service configuration as operator-tunable TOML values.
//!
//! Every section implements `Default` with the values from
//! [`defaults`](super::defaults), so a missing or empty file behaves exactly
//! like the built-in configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "ICODAQ_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "icodaq.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one acquisition service instance.
///
/// Load with `DaqConfig::load()` which searches:
/// 1. `$ICODAQ_CONFIG` env var
/// 2. `./icodaq.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaqConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session file and catalogue location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session pipeline tuning
    #[serde(default)]
    pub measurement: MeasurementConfig,

    /// Holder connection and simulation settings
    #[serde(default)]
    pub holder: HolderConfig,
}

impl DaqConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate cross-field constraints. Collects every problem before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.addr.trim().is_empty() {
            errors.push("server.addr: must not be empty".to_string());
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            errors.push("storage.data_dir: must not be empty".to_string());
        }
        if self.storage.chunk_rows == 0 {
            errors.push("storage.chunk_rows: must be > 0".to_string());
        }
        if self.measurement.update_rate_hz == 0 {
            errors.push("measurement.update_rate_hz: must be > 0".to_string());
        }
        if self.measurement.post_meta_poll_ms == 0 {
            errors.push("measurement.post_meta_poll_ms: must be > 0".to_string());
        }
        let timeout = self.holder.stream_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 {
            errors.push(format!(
                "holder.stream_timeout_secs: must be a positive number (got {timeout})"
            ));
        }
        let freq = self.holder.signal_frequency_hz;
        if !freq.is_finite() || freq < 0.0 {
            errors.push(format!(
                "holder.signal_frequency_hz: must be >= 0 (got {freq})"
            ));
        }
        let noise = self.holder.noise_std_counts;
        if !noise.is_finite() || noise < 0.0 {
            errors.push(format!(
                "holder.noise_std_counts: must be >= 0 (got {noise})"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by the `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::DEFAULT_SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Session files land here; the sensor catalogue lives in `config/` below it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Rows per compressed column chunk in session files.
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_DATA_DIR)
}
fn default_chunk_rows() -> usize { defaults::STORAGE_CHUNK_ROWS }

impl StorageConfig {
    pub fn catalogue_path(&self) -> PathBuf {
        self.data_dir
            .join(defaults::CONFIG_SUBDIR)
            .join(defaults::SENSOR_CATALOGUE_FILE)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_rows: default_chunk_rows(),
        }
    }
}

// ============================================================================
// Measurement
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Observer batches per second of acquired data.
    #[serde(default = "default_update_rate")]
    pub update_rate_hz: u32,

    /// How long Finalizing waits for post-session metadata. 0 waits forever.
    #[serde(default = "default_post_meta_timeout")]
    pub post_meta_timeout_secs: u64,

    /// Poll interval while waiting for post-session metadata.
    #[serde(default = "default_post_meta_poll")]
    pub post_meta_poll_ms: u64,
}

fn default_update_rate() -> u32 { defaults::DEFAULT_UPDATE_RATE_HZ }
fn default_post_meta_timeout() -> u64 { defaults::DEFAULT_POST_META_TIMEOUT_SECS }
fn default_post_meta_poll() -> u64 { defaults::DEFAULT_POST_META_POLL_MS }

impl MeasurementConfig {
    pub fn post_meta_timeout(&self) -> Option<Duration> {
        (self.post_meta_timeout_secs > 0).then(|| Duration::from_secs(self.post_meta_timeout_secs))
    }

    pub fn post_meta_poll(&self) -> Duration {
        Duration::from_millis(self.post_meta_poll_ms)
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            update_rate_hz: default_update_rate(),
            post_meta_timeout_secs: default_post_meta_timeout(),
            post_meta_poll_ms: default_post_meta_poll(),
        }
    }
}

// ============================================================================
// Holder
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderConfig {
    /// Node name reported by the holder.
    #[serde(default = "default_holder_name")]
    pub name: String,

    /// Seconds without a sample before the stream counts as timed out.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: f64,

    /// Simulated vibration frequency (Hz).
    #[serde(default = "default_signal_frequency")]
    pub signal_frequency_hz: f64,

    /// Simulated noise (ADC counts, 1 sigma).
    #[serde(default = "default_noise_std")]
    pub noise_std_counts: f64,
}

fn default_holder_name() -> String {
    defaults::DEFAULT_HOLDER_NAME.to_string()
}
fn default_stream_timeout() -> f64 { defaults::DEFAULT_STREAM_TIMEOUT_SECS }
fn default_signal_frequency() -> f64 { defaults::SIM_SIGNAL_FREQUENCY_HZ }
fn default_noise_std() -> f64 { defaults::SIM_NOISE_STD_COUNTS }

impl HolderConfig {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stream_timeout_secs)
    }
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            name: default_holder_name(),
            stream_timeout_secs: default_stream_timeout(),
            signal_frequency_hz: default_signal_frequency(),
            noise_std_counts: default_noise_std(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: DaqConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.server.addr, defaults::DEFAULT_SERVER_ADDR);
        assert_eq!(config.measurement.update_rate_hz, 60);
        assert_eq!(config.measurement.post_meta_poll_ms, 1_000);
        assert!(config.measurement.post_meta_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[measurement]
update_rate_hz = 30
post_meta_timeout_secs = 120

[storage]
data_dir = "/var/lib/icodaq"
"#;
        let config: DaqConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.measurement.update_rate_hz, 30);
        assert_eq!(
            config.measurement.post_meta_timeout(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/icodaq"));
        assert_eq!(
            config.storage.catalogue_path(),
            PathBuf::from("/var/lib/icodaq/config/sensors.toml")
        );
        // Untouched sections keep their defaults
        assert_eq!(config.holder.stream_timeout_secs, defaults::DEFAULT_STREAM_TIMEOUT_SECS);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = DaqConfig::default();
        config.measurement.update_rate_hz = 0;
        config.holder.stream_timeout_secs = f64::NAN;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 2, "got: {errors:?}");
                assert!(errors[0].contains("update_rate_hz"));
                assert!(errors[1].contains("stream_timeout_secs"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icodaq.toml");
        std::fs::write(&path, "[measurement]\nupdate_rate_hz = 0\n").unwrap();
        assert!(matches!(
            DaqConfig::load_from_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = DaqConfig::default();
        config.holder.name = "bench-holder".to_string();
        let text = config.to_toml().unwrap();
        let parsed: DaqConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.holder.name, "bench-holder");
    }
}
