//! # Application Errors
//!
//! Everything the binary can fail with. Core errors pass through unchanged.

use tether_core::TetherError;
use thiserror::Error;

/// Errors raised by the Tether CLI.
#[derive(Debug, Error)]
pub enum AppError {
    /// The data layer rejected an operation.
    #[error(transparent)]
    Core(#[from] TetherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The config parsed but does not describe a usable schema.
    #[error("config error: {0}")]
    Config(String),
}
