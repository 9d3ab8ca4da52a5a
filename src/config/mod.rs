//! Service Configuration Module
//!
//! Provides the acquisition service configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `ICODAQ_CONFIG` environment variable (path to TOML file)
//! 2. `icodaq.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(DaqConfig::load());
//! let rate = config::get().measurement.update_rate_hz;
//! ```

mod daq_config;
pub mod defaults;

pub use daq_config::*;

use std::sync::OnceLock;

/// Global service configuration, initialized once at startup.
static DAQ_CONFIG: OnceLock<DaqConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: DaqConfig) {
    if DAQ_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global configuration.
///
/// Falls back to built-in defaults if `init()` was never called, so library
/// users and tests get a usable configuration without a startup step.
pub fn get() -> &'static DaqConfig {
    DAQ_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() before config::init(), using defaults");
        DaqConfig::default()
    })
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    DAQ_CONFIG.get().is_some()
}
