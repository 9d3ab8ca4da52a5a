//! API route handlers
//!
//! - measurement control and the live observer channel
//! - system state and the state channel
//! - sensor catalogue
//! - session files
//! - holder reset and liveness

mod files;
mod health;
mod measurement;
mod sensor;
mod state;
mod stu;

pub use files::*;
pub use health::*;
pub use measurement::*;
pub use sensor::*;
pub use state::*;
pub use stu::*;
