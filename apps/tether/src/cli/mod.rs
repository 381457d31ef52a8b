//! # Tether CLI Module
//!
//! This module implements the CLI interface for Tether.
//!
//! ## Available Commands
//!
//! - `normalize` - Normalize an adapter response into a document
//! - `serialize` - Push a payload and serialize its primary record back
//! - `errors` - Map an invalid-response payload to local member names
//! - `fetch` - Resolve a record and its relationships from fixtures
//! - `schema` - Show types, relationships and their inverses
//!
//! Every command prints JSON on stdout; logs go to stderr.

mod commands;

use crate::config::TetherConfig;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tether_core::RequestKind;

pub use commands::*;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Config file used when neither the flag nor the variable is set.
pub const DEFAULT_CONFIG: &str = "tether.toml";

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tether - inspect and resolve JSON API payloads
///
/// Loads a schema from TOML and runs payloads through the same normalizer,
/// serializer and store the data layer uses.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (falls back to TETHER_CONFIG, then tether.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print compact JSON instead of pretty-printed
    #[arg(long, global = true)]
    pub compact: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Normalize an adapter response
    Normalize {
        /// Primary type of the payload
        type_name: String,

        /// Path to the JSON payload
        #[arg(short, long)]
        file: PathBuf,

        /// Request the payload answers (findRecord, findAll, query, ...)
        #[arg(short, long, default_value = "findRecord", value_parser = parse_request_kind)]
        kind: RequestKind,
    },

    /// Push a payload and serialize its primary record back to the wire
    Serialize {
        /// Primary type of the payload
        type_name: String,

        /// Path to the JSON payload
        #[arg(short, long)]
        file: PathBuf,

        /// Emit the id under the primary key
        #[arg(long)]
        include_id: bool,
    },

    /// Extract per-member errors from an invalid-response payload
    Errors {
        /// Type the errors belong to
        type_name: String,

        /// Path to the JSON payload
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Resolve a record from the fixture directory
    Fetch {
        /// Record type
        type_name: String,

        /// Record id
        id: String,

        /// Relationships to resolve (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        include: Vec<String>,
    },

    /// Show the resolved schema
    Schema,
}

fn parse_request_kind(raw: &str) -> Result<RequestKind, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown request kind '{}'", raw))
}

/// `--config`, then `TETHER_CONFIG`, then `tether.toml`.
#[must_use]
pub fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = TetherConfig::load(&config_path)?;

    let output = match cli.command {
        Commands::Normalize {
            type_name,
            file,
            kind,
        } => cmd_normalize(&config, &type_name, &read_payload(&file)?, kind)?,
        Commands::Serialize {
            type_name,
            file,
            include_id,
        } => cmd_serialize(&config, &type_name, &read_payload(&file)?, include_id)?,
        Commands::Errors { type_name, file } => {
            cmd_errors(&config, &type_name, &read_payload(&file)?)?
        }
        Commands::Fetch {
            type_name,
            id,
            include,
        } => cmd_fetch(&config, &type_name, &id, &include).await?,
        Commands::Schema => cmd_schema(&config)?,
    };

    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", rendered);
    Ok(())
}
