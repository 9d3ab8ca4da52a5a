//! Sample acquisition
//!
//! - `holder`: the holder hardware boundary ([`Holder`], [`SampleStream`])
//! - `configurator`: ADC and channel configuration for a session
//! - `conversion`: raw code to physical unit conversion
//! - `simulated` / `replay`: software holders

pub mod configurator;
pub mod conversion;
pub mod holder;
pub mod replay;
pub mod simulated;

pub use configurator::{configure, AcquisitionSetup, ConfigurationError};
pub use conversion::{ChannelLayout, ConversionPipeline, LayoutKind};
pub use holder::{
    AdcConfiguration, Holder, HolderError, SampleStream, SensorChannelConfig, StreamAux,
    StreamEvent, StreamingConfig,
};
pub use replay::{ReplayEnd, ReplayHolder, ReplayStats};
pub use simulated::SimulatedHolder;
