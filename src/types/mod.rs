//! Shared data model
//!
//! - `sensor`: calibration records and the built-in sensor list
//! - `measurement`: client requests, ADC parameters, status snapshots
//! - `stream`: acquisition frames and observer message envelopes

mod measurement;
mod sensor;
mod stream;

pub use measurement::*;
pub use sensor::*;
pub use stream::*;
