//! # Tether - JSON API payload inspector
//!
//! The binary for the Tether client-side data layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  apps/tether (THE BINARY)                 │
//! │                                                           │
//! │  ┌─────────────┐   ┌──────────────┐   ┌────────────────┐  │
//! │  │    CLI      │   │  TOML config │   │ FixtureAdapter │  │
//! │  │   (clap)    │   │ (toml, heck) │   │  (tokio::fs)   │  │
//! │  └──────┬──────┘   └──────┬───────┘   └───────┬────────┘  │
//! │         └─────────────────┼───────────────────┘           │
//! │                           ▼                               │
//! │                   ┌───────────────┐                       │
//! │                   │  tether-core  │                       │
//! │                   │  (THE LOGIC)  │                       │
//! │                   └───────────────┘                       │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tether schema
//! tether normalize post -f response.json --kind findAll
//! tether serialize post -f post.json --include-id
//! tether errors post -f invalid.json
//! tether fetch post 1 --include comments,author
//! ```

use clap::Parser;
use tether::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = cli::Cli::parse();

    // TETHER_LOG_FORMAT=json enables machine-parseable logs; stdout stays JSON output only.
    let log_format = std::env::var("TETHER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "tether=debug,tether_core=debug"
    } else {
        "tether=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
