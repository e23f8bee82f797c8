//! # Ladder - Incremental Unit Loader
//!
//! The main binary for the Ladder load-level state machine.
//!
//! This application provides:
//! - Manifest-driven load scenarios over simulated units
//! - Sequential or one-thread-per-unit loading
//! - Text and JSON load reports
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/ladder (THE BINARY)           │
//! │                                               │
//! │  ┌─────────────┐        ┌─────────────────┐   │
//! │  │   CLI       │───────▶│ Manifest (TOML) │   │
//! │  │  (clap)     │        └────────┬────────┘   │
//! │  └─────────────┘                 │            │
//! │                                  ▼            │
//! │                         ┌───────────────┐     │
//! │                         │  ladder-core  │     │
//! │                         │  (THE LOGIC)  │     │
//! │                         └───────────────┘     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! ladder load -m units.toml
//! ladder load -m units.toml -t loaded --parallel --json-mode
//! ladder blob 1 0 1 1 0 0
//! ladder levels
//! ```

use clap::Parser;
use ladder::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // LADDER_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("LADDER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ladder=info,ladder_core=info".into());

    // Logs go to stderr so reports on stdout stay parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Ladder startup banner.
fn print_banner() {
    println!(
        r#"
  _              _     _
 | |    __ _  __| | __| | ___ _ __
 | |   / _` |/ _` |/ _` |/ _ \ '__|
 | |__| (_| | (_| | (_| |  __/ |
 |_____\__,_|\__,_|\__,_|\___|_|

  Incremental Unit Loader v{}

  Monotonic • Once-only • Deadlock-tolerant
"#,
        env!("CARGO_PKG_VERSION")
    );
}
