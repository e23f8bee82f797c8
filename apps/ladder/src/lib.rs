//! # ladder
//!
//! Library half of the `ladder` binary: the CLI and the manifest format,
//! exposed so integration tests can drive them without spawning a process.

pub mod cli;
pub mod manifest;
