//! # Notification Dispatch
//!
//! One-shot delivery of "unit reached state X" events to the diagnostic
//! consumers of a domain.
//!
//! Every unit carries a [`NotificationLatches`] word. A latch is claimed with
//! a single `fetch_or`, so exactly one caller wins per listener kind no matter
//! how many threads, or how many reentrant frames, reach the same call site.
//!
//! Sinks are optional except tracing. An absent sink turns its notification
//! into a no-op.

use crate::attribute::DebuggingConfig;
use crate::{ListenerKind, ResultCode, UnitId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

// =============================================================================
// LATCHES
// =============================================================================

/// Independent single-use latches, one per [`ListenerKind`].
#[derive(Debug, Default)]
pub struct NotificationLatches {
    bits: AtomicU8,
}

impl NotificationLatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the latch for `kind`.
    ///
    /// Returns `true` for exactly one caller over the lifetime of the latch.
    pub fn test_and_set(&self, kind: ListenerKind) -> bool {
        let previous = self.bits.fetch_or(kind.bit(), Ordering::AcqRel);
        previous & kind.bit() == 0
    }

    /// Check whether the latch for `kind` has been claimed.
    #[must_use]
    pub fn is_set(&self, kind: ListenerKind) -> bool {
        self.bits.load(Ordering::Acquire) & kind.bit() != 0
    }

    /// Run `action` if this call claims the latch for `kind`.
    ///
    /// The latch is set before `action` runs, so a reentrant call from inside
    /// `action` observes it as already delivered.
    pub fn notify_once(&self, kind: ListenerKind, action: impl FnOnce()) -> bool {
        if self.test_and_set(kind) {
            action();
            true
        } else {
            false
        }
    }

    /// All claimed latches.
    #[must_use]
    pub fn claimed(&self) -> BTreeSet<ListenerKind> {
        let bits = self.bits.load(Ordering::Acquire);
        ListenerKind::ALL
            .into_iter()
            .filter(|kind| bits & kind.bit() != 0)
            .collect()
    }
}

// =============================================================================
// SINK TRAITS
// =============================================================================

/// Event-tracing consumer. Always present in a domain.
pub trait TracingSink: Send + Sync {
    fn load_finished(&self, unit: &str, code: ResultCode);
}

/// Profiler consumer.
pub trait ProfilerSink: Send + Sync {
    fn load_finished(&self, unit: &str, code: ResultCode);
}

/// In-process debugger interface.
pub trait DebuggerSink: Send + Sync {
    /// Unit-level load.
    fn load_unit(&self, unit: UnitId, name: &str, config: DebuggingConfig);

    /// Module-level load. Returns whether the debugger consumed it.
    fn load_module(&self, unit: UnitId, name: &str) -> bool;

    fn unload_module(&self, unit: UnitId, name: &str);

    fn unload_unit(&self, unit: UnitId, name: &str);
}

/// Out-of-process inspection tooling that enumerates loaded modules.
pub trait InspectionSink: Send + Sync {
    fn module_loaded(&self, unit: UnitId, name: &str);
}

// =============================================================================
// DEFAULT TRACING SINK
// =============================================================================

/// Tracing sink that forwards load events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracingSink;

impl TracingSink for LogTracingSink {
    fn load_finished(&self, unit: &str, code: ResultCode) {
        if code.is_success() {
            tracing::info!(target: "ladder::events", unit, %code, "load finished");
        } else {
            tracing::warn!(target: "ladder::events", unit, %code, "load finished with failure");
        }
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// The set of consumers attached to a domain.
#[derive(Clone)]
pub struct Diagnostics {
    tracing: Arc<dyn TracingSink>,
    profiler: Option<Arc<dyn ProfilerSink>>,
    debugger: Option<Arc<dyn DebuggerSink>>,
    inspection: Option<Arc<dyn InspectionSink>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(LogTracingSink))
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("profiler", &self.profiler.is_some())
            .field("debugger", &self.debugger.is_some())
            .field("inspection", &self.inspection.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Diagnostics with only a tracing sink.
    #[must_use]
    pub fn new(tracing: Arc<dyn TracingSink>) -> Self {
        Self {
            tracing,
            profiler: None,
            debugger: None,
            inspection: None,
        }
    }

    #[must_use]
    pub fn with_profiler(mut self, profiler: Arc<dyn ProfilerSink>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    #[must_use]
    pub fn with_debugger(mut self, debugger: Arc<dyn DebuggerSink>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    #[must_use]
    pub fn with_inspection(mut self, inspection: Arc<dyn InspectionSink>) -> Self {
        self.inspection = Some(inspection);
        self
    }

    #[must_use]
    pub fn tracing(&self) -> &dyn TracingSink {
        self.tracing.as_ref()
    }

    #[must_use]
    pub fn profiler(&self) -> Option<&dyn ProfilerSink> {
        self.profiler.as_deref()
    }

    #[must_use]
    pub fn debugger(&self) -> Option<&dyn DebuggerSink> {
        self.debugger.as_deref()
    }

    #[must_use]
    pub fn inspection(&self) -> Option<&dyn InspectionSink> {
        self.inspection.as_deref()
    }

    /// Check if a debugger interface is attached.
    #[must_use]
    pub fn is_debugger_attached(&self) -> bool {
        self.debugger.is_some()
    }
}

// =============================================================================
// TESTS
// =============================================================================
