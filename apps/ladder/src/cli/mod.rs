//! # Ladder CLI Module
//!
//! This module implements the CLI interface for Ladder.
//!
//! ## Available Commands
//!
//! - `load` - Drive the units of a manifest to a target level
//! - `blob` - Decode a debuggable attribute blob
//! - `levels` - List the load levels in order

mod commands;

use clap::{Parser, Subcommand};
use ladder_core::{LoadLevel, LoaderError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Ladder - incremental unit loader
///
/// Drives simulated units through the load levels and reports how far each
/// one got.
#[derive(Parser, Debug)]
#[command(name = "ladder")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive every unit of a manifest to a target level
    Load {
        /// Path to the manifest (TOML)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Target level
        #[arg(short, long, default_value = "active")]
        target: LoadLevel,

        /// Drive each unit on its own thread
        #[arg(long)]
        parallel: bool,

        /// Treat running code in an unactivated unit as an error
        #[arg(long)]
        strict: bool,

        /// Force-load every type during activation
        #[arg(long)]
        expand: bool,
    },

    /// Decode a debuggable attribute blob (decimal or 0x-prefixed bytes)
    Blob {
        /// Blob bytes, in order
        bytes: Vec<String>,
    },

    /// List the load levels in order
    Levels,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), LoaderError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Load {
            manifest,
            target,
            parallel,
            strict,
            expand,
        }) => cmd_load(
            &manifest,
            LoadOptions {
                target,
                parallel,
                strict,
                expand,
            },
            json_mode,
            cli.verbose,
        ),
        Some(Commands::Blob { bytes }) => cmd_blob(&bytes, json_mode),
        Some(Commands::Levels) => cmd_levels(json_mode),
        None => {
            // No subcommand - list levels by default
            cmd_levels(json_mode)
        }
    }
}
