//! Error types for voxlink

use thiserror::Error;

/// Main error type for the fallible (non hot-path) operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Pairing with {peer} failed after {attempts} attempts")]
    Pairing { peer: String, attempts: u32 },
}
