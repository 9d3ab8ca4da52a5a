//! ICOdaq: measurement sessions for CAN sensor holders
//!
//! Runs one acquisition session at a time against a sensor holder, persists
//! every sample to a session file, and streams batched samples to live
//! observers over WebSockets.
//!
//! ## Architecture
//!
//! - **Acquisition**: holder boundary, ADC/channel configuration, unit conversion
//! - **Sensors**: persistent sensor catalogue and channel resolution
//! - **Pipeline**: session registry, coordinator state machine, observer fan-out
//! - **Storage**: columnar session files and an in-memory backend
//! - **API**: REST endpoints plus the measurement and state WebSockets

pub mod acquisition;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod sensors;
pub mod storage;
pub mod types;

// Re-export service configuration
pub use config::DaqConfig;

// Re-export the session core
pub use pipeline::{
    AppContext, SessionOutcome, SessionRegistry, SessionReport, SessionSettings, StartResult,
    StreamExit,
};

// Re-export holder boundary
pub use acquisition::{Holder, HolderError, ReplayHolder, SimulatedHolder};

// Re-export storage
pub use storage::{SessionStorage, StorageError, StorageFactory};

// Re-export commonly used types
pub use types::{
    MeasurementInstructions, MeasurementStatus, Metadata, Sample, Sensor, SystemState,
};
