//! # Tether CLI
//!
//! Library half of the `tether` binary: TOML config loading, the fixture
//! adapter and the command implementations. `main.rs` only wires logging
//! and the runtime.

pub mod cli;
pub mod config;
pub mod error;
pub mod fixtures;

pub use config::TetherConfig;
pub use error::AppError;
pub use fixtures::FixtureAdapter;
