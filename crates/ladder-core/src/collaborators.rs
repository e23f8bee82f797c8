//! # Collaborator Interfaces
//!
//! Everything the state machine needs from the rest of the runtime, expressed
//! as traits. Physical image mapping, metadata access, type loading and vtable
//! patching all live behind these seams; `crate::sim` provides in-memory
//! implementations.
//!
//! All collaborators must be `Send + Sync`: units are progressed from many
//! threads at once.

use crate::domain::LoadDomain;
use crate::unit::{LoadUnit, UnitSnapshot};
use crate::{AttachFlags, LoadLevel, LoaderError, ResultCode, UnitId};
use std::sync::Arc;

// =============================================================================
// IMAGE
// =============================================================================

/// A loaded binary image.
///
/// A unit holds one `Arc` to its image for its whole lifetime; dropping the
/// unit releases it.
pub trait Image: Send + Sync {
    /// Display name of the image.
    fn name(&self) -> &str;

    /// Check if the image is mapped and ready.
    fn is_loaded(&self) -> bool;

    /// Refuse images that cannot be executed.
    fn validate_for_execution(&self) -> Result<(), LoaderError>;

    /// Check if this is the dependency-free bootstrap image.
    fn is_bootstrap_image(&self) -> bool;

    /// Raw blob of the debuggable attribute, if the image carries one.
    fn debuggable_attribute(&self) -> Option<&[u8]>;

    /// Host-side identity the unit binds itself to during `Begin`.
    fn host_binding(&self) -> Option<Arc<dyn HostBinding>> {
        None
    }
}

/// The host's view of an image, pointing back at the runtime unit.
pub trait HostBinding: Send + Sync {
    fn set_runtime_unit(&self, unit: Option<UnitId>);
}

// =============================================================================
// CODE CONTAINER
// =============================================================================

/// The module produced from a unit's image.
///
/// The unit owns the container's load-level bookkeeping; the container only
/// performs the work of each level.
pub trait CodeContainer: Send + Sync {
    fn notify_tracing_load_finished(&self, code: ResultCode);

    fn notify_profiler_load_finished(&self, code: ResultCode);

    /// Check if the image carries precompiled code with eager fixups.
    fn has_precompiled_fixups(&self) -> bool;

    fn run_eager_fixups(&self) -> Result<(), LoaderError>;

    fn fixup_virtual_tables(&self) -> Result<(), LoaderError>;

    /// Deliver the module-level debugger load. Returns whether the debugger
    /// consumed it.
    fn notify_debugger_load(&self, unit: &LoadUnit, flags: AttachFlags, attaching: bool) -> bool;

    fn notify_debugger_unload(&self, unit: &LoadUnit);

    /// Module static initializer, if the container has one.
    fn global_static_initializer(&self) -> Option<Arc<dyn StaticInitializer>>;

    /// Settle the exception-handling plan before any code runs.
    fn resolve_exception_plan(&self) -> Result<(), LoaderError>;

    /// Force-load every type (diagnostic mode).
    fn expand_all(&self) -> Result<(), LoaderError>;

    /// Make precompiled code visible to code that does not reference the unit.
    fn register_precompiled_code(&self);
}

/// Module static initializer.
///
/// May load other units through `domain`, including, reentrantly, the unit
/// being activated.
pub trait StaticInitializer: Send + Sync {
    fn run(&self, domain: &LoadDomain, unit: &Arc<LoadUnit>) -> Result<(), LoaderError>;
}

impl<F> StaticInitializer for F
where
    F: Fn(&LoadDomain, &Arc<LoadUnit>) -> Result<(), LoaderError> + Send + Sync,
{
    fn run(&self, domain: &LoadDomain, unit: &Arc<LoadUnit>) -> Result<(), LoaderError> {
        self(domain, unit)
    }
}

// =============================================================================
// DOMAIN HOOKS
// =============================================================================

/// Observes every completed level transition (e.g. for JIT scheduling).
///
/// Failures are logged and ignored.
pub trait SchedulingHook: Send + Sync {
    fn record_transition(&self, unit: &LoadUnit, level: LoadLevel) -> Result<(), LoaderError>;
}

/// Receives the host-visible "unit loaded" event once per activated unit.
pub trait LoadEventListener: Send + Sync {
    fn unit_loaded(&self, unit: &UnitSnapshot);
}
