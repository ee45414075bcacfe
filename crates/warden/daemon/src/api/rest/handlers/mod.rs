//! API request handlers

mod fleet;
mod health;
mod incidents;
mod telemetry;

pub use fleet::*;
pub use health::*;
pub use incidents::*;
pub use telemetry::*;
