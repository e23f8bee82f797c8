//! # Sticky Error State
//!
//! A write-once cell holding the immutable [`FailureCause`] of a unit.
//!
//! Once set, the cell never changes: every reader gets a clone of the same
//! `Arc`, and a second write is a contract violation rather than an update.

use crate::{FailureCause, LoadLevel, LoaderError};
use std::sync::{Arc, OnceLock};

/// Write-once failure holder attached to a unit.
#[derive(Debug, Default)]
pub struct ErrorState {
    cause: OnceLock<Arc<FailureCause>>,
}

impl ErrorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `cause`. The first writer wins; later writers get
    /// `LoaderError::ContractViolation` and the stored cause is unchanged.
    pub fn record(&self, cause: FailureCause) -> Result<Arc<FailureCause>, LoaderError> {
        let cause = Arc::new(cause);
        match self.cause.set(Arc::clone(&cause)) {
            Ok(()) => Ok(cause),
            Err(rejected) => Err(LoaderError::ContractViolation(format!(
                "error already recorded for {}; rejected: {}",
                rejected.unit, rejected.message
            ))),
        }
    }

    /// The stored cause, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<FailureCause>> {
        self.cause.get().cloned()
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.cause.get().is_some()
    }

    /// Re-raise the stored cause if a unit at `current` may not reach `target`.
    pub fn raise_if_blocking(&self, current: LoadLevel, target: LoadLevel) -> Result<(), LoaderError> {
        match self.cause.get() {
            Some(cause) if current < target => Err(LoaderError::Load(Arc::clone(cause))),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
