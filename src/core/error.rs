//! Error types for the voxel world core

use glam::IVec3;
use thiserror::Error;

/// Main error type for the world core
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid position: {0}")]
    InvalidPosition(IVec3),

    #[error("Unsupported serialization version: {version}")]
    VersionMismatch { version: u8 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown content: {0}")]
    UnknownContent(String),

    #[error("L-system tree has unbalanced brackets")]
    UnbalancedBrackets,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
