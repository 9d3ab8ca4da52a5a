//! Sensor catalogue and channel-to-sensor resolution.

pub mod catalogue;
pub mod resolver;

pub use catalogue::{CatalogueError, CatalogueFile, SensorCatalogue};
pub use resolver::{resolve_in, SensorResolver};
