//! Core types, errors, logging and settings

pub mod types;
pub mod error;
pub mod logging;
pub mod settings;
pub mod time;

pub use types::*;
pub use error::Error;
pub use settings::WorldSettings;
