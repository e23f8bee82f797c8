//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::manifest::{LoadReport, Manifest};
use ladder_core::{LoadLevel, LoaderError, parse_debuggable_blob};
use std::path::Path;

/// Flags of the `load` command.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub target: LoadLevel,
    pub parallel: bool,
    pub strict: bool,
    pub expand: bool,
}

impl LoadOptions {
    /// Apply the command-line overrides to a manifest's loader settings.
    pub fn apply(&self, manifest: &mut Manifest) {
        if self.strict {
            manifest.loader.strict_activation_checks = true;
        }
        if self.expand {
            manifest.loader.expand_modules_on_load = true;
        }
    }
}

// =============================================================================
// LOAD COMMAND
// =============================================================================

/// Build the manifest's domain and drive it, printing the report.
pub fn cmd_load(
    manifest_path: &Path,
    options: LoadOptions,
    json_mode: bool,
    verbose: bool,
) -> Result<(), LoaderError> {
    let report = run_manifest(manifest_path, options)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else {
        print!("{}", report.render_text());
        if verbose {
            for unit in &report.units {
                if let Some(snapshot) = &unit.snapshot {
                    println!(
                        "  {}: tracing={} profiler={} debugger={} notified={:?}",
                        unit.name,
                        unit.tracing_events,
                        unit.profiler_events,
                        unit.debugger_loads,
                        snapshot.notified
                    );
                }
            }
        }
    }

    match report.first_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Load a manifest, apply CLI overrides and drive every unit.
pub fn run_manifest(manifest_path: &Path, options: LoadOptions) -> Result<LoadReport, LoaderError> {
    let mut manifest = Manifest::load(manifest_path)?;
    options.apply(&mut manifest);

    tracing::info!(
        manifest = %manifest_path.display(),
        units = manifest.units.len(),
        target = %options.target,
        parallel = options.parallel,
        "loading manifest"
    );

    let scenario = manifest.build();
    Ok(scenario.run(options.target, options.parallel))
}

// =============================================================================
// BLOB COMMAND
// =============================================================================

/// Parse one blob byte: decimal or `0x`-prefixed hexadecimal.
pub fn parse_byte(raw: &str) -> Result<u8, LoaderError> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => trimmed.parse::<u8>(),
    };
    parsed.map_err(|e| LoaderError::Config(format!("Invalid byte '{}': {}", raw, e)))
}

/// Decode a debuggable attribute blob.
pub fn cmd_blob(bytes: &[String], json_mode: bool) -> Result<(), LoaderError> {
    let blob = bytes
        .iter()
        .map(|raw| parse_byte(raw))
        .collect::<Result<Vec<u8>, _>>()?;
    let config = parse_debuggable_blob(Some(&blob))?;

    if json_mode {
        let output = serde_json::json!({
            "length": blob.len(),
            "track_jit_info": config.track_jit_info,
            "ignore_symbols": config.ignore_symbols,
            "allow_optimizations": config.allow_optimizations
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Debuggable Attribute");
    println!("====================");
    println!("Length:              {}", blob.len());
    println!("Track JIT info:      {}", config.track_jit_info);
    println!("Ignore symbols:      {}", config.ignore_symbols);
    println!("Allow optimizations: {}", config.allow_optimizations);

    Ok(())
}

// =============================================================================
// LEVELS COMMAND
// =============================================================================

/// List the load levels in order.
pub fn cmd_levels(json_mode: bool) -> Result<(), LoaderError> {
    if json_mode {
        let output: Vec<_> = LoadLevel::ALL
            .iter()
            .map(|level| {
                serde_json::json!({
                    "ordinal": level.as_u8(),
                    "name": level.name()
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Load Levels");
    println!("===========");
    for level in LoadLevel::ALL {
        println!("  {}  {}", level.as_u8(), level);
    }

    Ok(())
}
