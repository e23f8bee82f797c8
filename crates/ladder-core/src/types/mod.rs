//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the loader:
//! - The ordered load levels (`LoadLevel`)
//! - Unit and domain identifiers (`UnitId`, `DomainId`)
//! - HRESULT-style result codes (`ResultCode`)
//! - Listener kinds for one-shot notifications (`ListenerKind`)
//! - Debugger attach flags (`AttachFlags`)
//! - The immutable failure snapshot (`FailureCause`)
//! - Error types (`LoaderError`)
//!
//! ## Ordering Guarantees
//!
//! `LoadLevel` is `#[repr(u8)]` and its discriminants follow the load order,
//! so it can live in an `AtomicU8` and be raised with `fetch_max`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// LOAD LEVEL
// =============================================================================

/// How far a unit has progressed through loading.
///
/// Levels are totally ordered. A unit's recorded level never decreases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum LoadLevel {
    /// Wrapped around a validated image; no sub-step has run yet.
    #[default]
    Created = 0,
    /// Registered in the domain and bound to its host identity.
    Begin = 1,
    /// The profiler has had its chance to inject code before types exist.
    BeforeTypeLoad = 2,
    /// Precompiled fixups applied (if the image carries any).
    EagerFixups = 3,
    /// Tracing, profiler and debugger have been told about the load.
    DeliverEvents = 4,
    /// Exported vtable slots patched.
    VtableFixups = 5,
    /// Visible to inspection tooling.
    Loaded = 6,
    /// Static initializer has run; code may execute.
    Active = 7,
}

impl LoadLevel {
    /// All levels in load order.
    pub const ALL: [LoadLevel; 8] = [
        LoadLevel::Created,
        LoadLevel::Begin,
        LoadLevel::BeforeTypeLoad,
        LoadLevel::EagerFixups,
        LoadLevel::DeliverEvents,
        LoadLevel::VtableFixups,
        LoadLevel::Loaded,
        LoadLevel::Active,
    ];

    /// Get the level name as used in manifests and on the command line.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LoadLevel::Created => "created",
            LoadLevel::Begin => "begin",
            LoadLevel::BeforeTypeLoad => "before-type-load",
            LoadLevel::EagerFixups => "eager-fixups",
            LoadLevel::DeliverEvents => "deliver-events",
            LoadLevel::VtableFixups => "vtable-fixups",
            LoadLevel::Loaded => "loaded",
            LoadLevel::Active => "active",
        }
    }

    /// Get the next level, if any.
    #[must_use]
    pub fn next(&self) -> Option<LoadLevel> {
        Self::from_u8(self.as_u8().saturating_add(1))
    }

    /// Get the previous level, if any.
    #[must_use]
    pub fn previous(&self) -> Option<LoadLevel> {
        self.as_u8().checked_sub(1).and_then(Self::from_u8)
    }

    /// The level a deadlock-tolerant caller may legitimately stop at.
    ///
    /// `Created` relaxes to itself.
    #[must_use]
    pub fn relaxed(&self) -> LoadLevel {
        self.previous().unwrap_or(LoadLevel::Created)
    }

    /// Check if this level is terminal (`Active`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadLevel::Active)
    }

    /// Raw discriminant.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`LoadLevel::as_u8`].
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<LoadLevel> {
        Self::ALL.get(usize::from(raw)).copied()
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LoadLevel {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name() == wanted)
            .ok_or_else(|| LoaderError::Config(format!("Unknown load level '{}'", s)))
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a load unit within its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

/// Identifier of a load domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

// =============================================================================
// RESULT CODES
// =============================================================================

/// HRESULT-style status code carried by load-finished notifications.
///
/// Negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const OK: ResultCode = ResultCode(0);
    pub const FAIL: ResultCode = ResultCode(0x8000_4005_u32 as i32);
    pub const LOAD_IN_PROGRESS: ResultCode = ResultCode(0x8013_1016_u32 as i32);
    pub const BAD_IMAGE_FORMAT: ResultCode = ResultCode(0x8007_000B_u32 as i32);
    pub const CONTRACT_VIOLATION: ResultCode = ResultCode(0x8013_1500_u32 as i32);

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

// =============================================================================
// LISTENER KINDS
// =============================================================================

/// Consumers that learn about a unit exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerKind {
    /// Tracing "load finished" event.
    Tracing,
    /// Profiler "load finished" callback.
    Profiler,
    /// Unit-level debugger load ("should notify debugger").
    Debugger,
    /// Module-level debugger load, delivered through the code container.
    DebuggerModule,
    /// Host-visible "unit loaded" event raised after activation.
    HostLoadEvent,
}

impl ListenerKind {
    pub const ALL: [ListenerKind; 5] = [
        ListenerKind::Tracing,
        ListenerKind::Profiler,
        ListenerKind::Debugger,
        ListenerKind::DebuggerModule,
        ListenerKind::HostLoadEvent,
    ];

    /// Bit in the per-unit latch word.
    #[must_use]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

// =============================================================================
// ATTACH FLAGS
// =============================================================================

/// What a debugger load notification covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AttachFlags(pub u32);

impl AttachFlags {
    pub const NONE: AttachFlags = AttachFlags(0);
    pub const ASSEMBLY_LOAD: AttachFlags = AttachFlags(0x1);
    pub const MODULE_LOAD: AttachFlags = AttachFlags(0x2);

    #[must_use]
    pub const fn contains(self, other: AttachFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: AttachFlags) -> AttachFlags {
        AttachFlags(self.0 | other.0)
    }
}

// =============================================================================
// FAILURE CAUSE
// =============================================================================

/// Immutable snapshot of the failure that stopped a unit.
///
/// Created once, when the first sub-step fails, and shared behind an `Arc`
/// by every later re-raise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Result code reported to tracing and profiler sinks.
    pub code: ResultCode,
    /// Rendered message of the original error.
    pub message: String,
    /// Unit the cause is bound to.
    pub unit: String,
    /// Level whose sub-step failed.
    pub level: LoadLevel,
}

impl FailureCause {
    /// Snapshot `error` as the failure of `unit` at `level`.
    #[must_use]
    pub fn capture(error: &LoaderError, unit: impl Into<String>, level: LoadLevel) -> Self {
        Self {
            code: error.result_code(),
            message: error.to_string(),
            unit: unit.into(),
            level,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at {} ({}): {}",
            self.unit, self.level, self.code, self.message
        )
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while loading a unit.
///
/// - Sticky failures are `Load` and always carry the stored cause
/// - Precondition and contract failures are distinct variants, never folded
///   into `Load`
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// A sub-step failed; replayed on every later attempt to pass the level.
    #[error("Load failed: {0}")]
    Load(Arc<FailureCause>),

    /// The debuggable attribute blob failed its format guard.
    #[error("Malformed attribute blob ({len} bytes): {reason}")]
    MalformedAttribute { len: usize, reason: String },

    /// The unit has not reached the required level and has no stored error.
    #[error("Load of {unit} still in progress: at {current}, {required} required")]
    LoadInProgress {
        unit: String,
        current: LoadLevel,
        required: LoadLevel,
    },

    /// Internal consistency defect; fatal to the operation.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// The image cannot be executed.
    #[error("Image validation failed: {0}")]
    ImageValidation(String),

    /// A collaborator failed while performing a sub-step.
    #[error("{level} step failed: {message}")]
    Step { level: LoadLevel, message: String },

    /// Invalid configuration or manifest.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl LoaderError {
    /// Result code reported for this error.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            LoaderError::Load(cause) => cause.code,
            LoaderError::MalformedAttribute { .. } | LoaderError::ImageValidation(_) => {
                ResultCode::BAD_IMAGE_FORMAT
            }
            LoaderError::LoadInProgress { .. } => ResultCode::LOAD_IN_PROGRESS,
            LoaderError::ContractViolation(_) => ResultCode::CONTRACT_VIOLATION,
            LoaderError::Step { .. } | LoaderError::Config(_) | LoaderError::Io(_) => {
                ResultCode::FAIL
            }
        }
    }

    /// The stored cause, if this is a sticky load failure.
    #[must_use]
    pub fn cause(&self) -> Option<&Arc<FailureCause>> {
        match self {
            LoaderError::Load(cause) => Some(cause),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
