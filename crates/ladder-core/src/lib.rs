//! # ladder-core
//!
//! The incremental load-level state machine for Ladder - THE LOGIC.
//!
//! This crate takes a validated binary image and advances the unit wrapping
//! it, one level at a time, to the point where its code may run. Along the
//! way it notifies tracing, profiler and debugger consumers exactly once per
//! unit, records the first failure as a sticky error, and tolerates threads
//! that load each other's units.
//!
//! ## Layout
//!
//! - `types` → levels, identifiers, result codes, errors
//! - `attribute` → debuggable attribute decoding
//! - `error_state`, `notify` → write-once error cell and one-shot latches
//! - `unit`, `machine` → the unit and its level contracts
//! - `domain` → registry, load entries and the driver loop
//! - `sim` → in-memory collaborators
//!
//! ## Architectural Constraints
//!
//! - The only shared mutable state of a unit is its level, its error and its
//!   latches; all three are atomics
//! - Image mapping, metadata, type loading and fixups are collaborators,
//!   reached through the traits in `collaborators`
//! - NO async, NO I/O (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod attribute;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error_state;
mod machine;
pub mod notify;
pub mod sim;
pub mod types;
pub mod unit;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AttachFlags, DomainId, FailureCause, ListenerKind, LoadLevel, LoaderError, ResultCode, UnitId,
};

// =============================================================================
// RE-EXPORTS: State Machine
// =============================================================================

pub use attribute::{DebuggingConfig, parse_debuggable_blob};
pub use collaborators::{
    CodeContainer, HostBinding, Image, LoadEventListener, SchedulingHook, StaticInitializer,
};
pub use config::LoaderConfig;
pub use domain::LoadDomain;
pub use error_state::ErrorState;
pub use notify::{
    DebuggerSink, Diagnostics, InspectionSink, LogTracingSink, NotificationLatches, ProfilerSink,
    TracingSink,
};
pub use unit::{LoadUnit, UnitSnapshot};
