//! # Load Unit
//!
//! The entity under load: one validated image, the code container produced
//! from it, and the bookkeeping that records how far loading has gone.
//!
//! ## Shared State
//!
//! Only three fields are mutated across threads, all lock-free:
//! - `level`: `AtomicU8`, raised with `fetch_max`, never lowered
//! - `error`: write-once [`ErrorState`]
//! - `notified`: [`NotificationLatches`], one `fetch_or` per claim
//!
//! Everything else is fixed when the unit is created.

use crate::attribute::DebuggingConfig;
use crate::collaborators::{CodeContainer, Image};
use crate::error_state::ErrorState;
use crate::notify::{Diagnostics, NotificationLatches};
use crate::{
    AttachFlags, DomainId, FailureCause, ListenerKind, LoadLevel, LoaderError, UnitId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

// =============================================================================
// LOAD UNIT
// =============================================================================

/// A unit being driven through the load levels.
///
/// Created by [`crate::LoadDomain::create_unit`]; the domain's registry and
/// any caller holding the `Arc` keep it alive.
pub struct LoadUnit {
    id: UnitId,
    domain: DomainId,
    name: String,
    image: Arc<dyn Image>,
    container: Arc<dyn CodeContainer>,
    diagnostics: Arc<Diagnostics>,
    level: AtomicU8,
    error: ErrorState,
    notified: NotificationLatches,
    activation_check_disabled: AtomicBool,
    is_system: bool,
    host_bound: AtomicBool,
    debugging: OnceLock<DebuggingConfig>,
}

impl fmt::Debug for LoadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("level", &self.current_level())
            .field("error", &self.error.get())
            .field("notified", &self.notified.claimed())
            .field("is_system", &self.is_system)
            .finish()
    }
}

impl LoadUnit {
    /// Wrap a validated image. Fails if the image cannot be executed.
    pub(crate) fn new(
        id: UnitId,
        domain: DomainId,
        image: Arc<dyn Image>,
        container: Arc<dyn CodeContainer>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self, LoaderError> {
        image.validate_for_execution()?;

        Ok(Self {
            id,
            domain,
            name: image.name().to_string(),
            is_system: image.is_bootstrap_image(),
            image,
            container,
            diagnostics,
            level: AtomicU8::new(LoadLevel::Created.as_u8()),
            error: ErrorState::new(),
            notified: NotificationLatches::new(),
            activation_check_disabled: AtomicBool::new(false),
            host_bound: AtomicBool::new(false),
            debugging: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[must_use]
    pub fn domain_id(&self) -> DomainId {
        self.domain
    }

    /// Only the domain that created a unit may drive it.
    pub(crate) fn check_domain(&self, domain: DomainId) -> Result<(), LoaderError> {
        if domain != self.domain {
            return Err(LoaderError::ContractViolation(format!(
                "{} belongs to {} but was driven through {}",
                self.name, self.domain, domain
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn image(&self) -> &dyn Image {
        self.image.as_ref()
    }

    #[must_use]
    pub fn container(&self) -> &dyn CodeContainer {
        self.container.as_ref()
    }

    #[must_use]
    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Check if this is the dependency-free bootstrap unit.
    #[must_use]
    pub fn is_system_unit(&self) -> bool {
        self.is_system
    }

    // =========================================================================
    // LEVEL
    // =========================================================================

    /// Current attained level.
    #[must_use]
    pub fn current_level(&self) -> LoadLevel {
        LoadLevel::from_u8(self.level.load(Ordering::Acquire)).unwrap_or(LoadLevel::Created)
    }

    /// Check if the unit has not yet reached `Active`.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.current_level() < LoadLevel::Active
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current_level() >= LoadLevel::Loaded
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current_level() >= LoadLevel::Active
    }

    /// Raise the recorded level to `level`. Lower values are ignored.
    ///
    /// Returns the level held before the call.
    pub(crate) fn complete_level(&self, level: LoadLevel) -> LoadLevel {
        let previous = self.level.fetch_max(level.as_u8(), Ordering::AcqRel);
        LoadLevel::from_u8(previous).unwrap_or(LoadLevel::Created)
    }

    // =========================================================================
    // STICKY ERROR
    // =========================================================================

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_set()
    }

    /// The stored failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<Arc<FailureCause>> {
        self.error.get()
    }

    /// Record the failure that stops this unit.
    ///
    /// Always emits the failure to tracing, even after a successful load event.
    /// The profiler hears about it only if it was not already told about this
    /// unit. Calling this twice is a contract violation.
    pub fn set_error(&self, cause: FailureCause) -> Result<Arc<FailureCause>, LoaderError> {
        let stored = self.error.record(cause)?;
        let code = stored.code;

        tracing::error!(
            unit = %self.name,
            level = %stored.level,
            %code,
            "load failed: {}",
            stored.message
        );

        self.container.notify_tracing_load_finished(code);
        self.notified.notify_once(ListenerKind::Profiler, || {
            self.container.notify_profiler_load_finished(code);
        });

        Ok(stored)
    }

    /// Turn a sub-step failure at `level` into the unit's sticky error.
    ///
    /// Returns the error the driver should surface: the stored cause, or the
    /// contract violation if an error was already recorded.
    pub(crate) fn record_failure(&self, level: LoadLevel, err: LoaderError) -> LoaderError {
        let cause = FailureCause::capture(&err, self.name.clone(), level);
        match self.set_error(cause) {
            Ok(stored) => LoaderError::Load(stored),
            Err(violation) => violation,
        }
    }

    /// Re-raise the stored error if the unit is below `target`.
    pub fn throw_if_error(&self, target: LoadLevel) -> Result<(), LoaderError> {
        self.error.raise_if_blocking(self.current_level(), target)
    }

    /// True if the unit has reached `target` or has no error.
    #[must_use]
    pub fn check_no_error(&self, target: LoadLevel) -> bool {
        self.current_level() >= target || !self.is_error()
    }

    // =========================================================================
    // ACTIVATION GATE
    // =========================================================================

    /// Decide whether code in this unit may run.
    ///
    /// The bootstrap unit passes at any level. A unit whose static
    /// initializer is running passes once it is `Loaded`, so the initializer
    /// can call into its own unit.
    #[must_use]
    pub fn check_activated(&self) -> bool {
        if !self.check_no_error(LoadLevel::Active) {
            return false;
        }
        if self.is_active() {
            return true;
        }
        if self.is_system {
            return true;
        }
        if !self.image.is_loaded() || !self.is_loaded() {
            return false;
        }
        self.activation_check_disabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_activation_check_disabled(&self) -> bool {
        self.activation_check_disabled.load(Ordering::Acquire)
    }

    /// Suppress the activation check until the returned guard drops.
    pub(crate) fn suppress_activation_check(&self) -> ActivationCheckSuppression<'_> {
        let previous = self.activation_check_disabled.swap(true, Ordering::AcqRel);
        ActivationCheckSuppression {
            unit: self,
            previous,
        }
    }

    // =========================================================================
    // NOTIFICATIONS
    // =========================================================================

    /// One-shot latches for this unit.
    #[must_use]
    pub fn latches(&self) -> &NotificationLatches {
        &self.notified
    }

    /// Listener kinds already notified.
    #[must_use]
    pub fn notified(&self) -> BTreeSet<ListenerKind> {
        self.notified.claimed()
    }

    /// Decode (once) the image's debuggable attribute.
    pub fn debugging_config(&self) -> Result<DebuggingConfig, LoaderError> {
        if let Some(config) = self.debugging.get() {
            return Ok(*config);
        }
        let config = DebuggingConfig::default().apply_blob(self.image.debuggable_attribute())?;
        Ok(*self.debugging.get_or_init(|| config))
    }

    /// Tell the debugger about this unit.
    ///
    /// Nothing is sent until the unit has been flagged for the debugger
    /// (the `Debugger` latch, claimed while delivering load events), and
    /// nothing is sent without an attached debugger. The unit-level load is
    /// sent on every call that asks for it; the module-level load goes
    /// through the container at most once.
    pub fn notify_debugger_load(
        &self,
        flags: AttachFlags,
        attaching: bool,
    ) -> Result<bool, LoaderError> {
        if attaching {
            return Err(LoaderError::ContractViolation(format!(
                "in-process debugger attach requested for {}",
                self.name
            )));
        }

        if !self.notified.is_set(ListenerKind::Debugger) {
            return Ok(false);
        }
        let Some(debugger) = self.diagnostics.debugger() else {
            return Ok(false);
        };

        let mut result = false;

        if flags.contains(AttachFlags::ASSEMBLY_LOAD) {
            let config = self.debugging_config().unwrap_or_else(|err| {
                tracing::warn!(unit = %self.name, error = %err, "ignoring debuggable attribute");
                DebuggingConfig::default()
            });
            debugger.load_unit(self.id, &self.name, config);
            result = true;
        }

        if self.notified.test_and_set(ListenerKind::DebuggerModule) {
            let flags = flags.union(AttachFlags::MODULE_LOAD);
            result |= self.container.notify_debugger_load(self, flags, attaching);
        }

        Ok(result)
    }

    /// Tell the debugger the unit is going away. No-op without a debugger.
    pub fn notify_debugger_unload(&self) {
        let Some(debugger) = self.diagnostics.debugger() else {
            return;
        };
        // The debugger tolerates unloads without a matching load.
        self.container.notify_debugger_unload(self);
        debugger.unload_unit(self.id, &self.name);
    }

    // =========================================================================
    // HOST IDENTITY
    // =========================================================================

    /// Make this unit discoverable from the host's view of its image.
    pub(crate) fn register_with_host(&self) {
        if let Some(binding) = self.image.host_binding() {
            binding.set_runtime_unit(Some(self.id));
            self.host_bound.store(true, Ordering::Release);
        }
    }

    pub(crate) fn unregister_from_host(&self) {
        if !self.host_bound.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(binding) = self.image.host_binding() {
            binding.set_runtime_unit(None);
        }
    }

    // =========================================================================
    // SNAPSHOT
    // =========================================================================

    /// Serializable view of the unit's current state.
    #[must_use]
    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            id: self.id,
            name: self.name.clone(),
            level: self.current_level(),
            error: self.error().map(|cause| cause.to_string()),
            notified: self.notified().into_iter().collect(),
            activated: self.check_activated(),
            is_system: self.is_system,
        }
    }
}

impl Drop for LoadUnit {
    fn drop(&mut self) {
        self.unregister_from_host();
        tracing::trace!(unit = %self.name, "unit released");
    }
}

// =============================================================================
// ACTIVATION CHECK SUPPRESSION
// =============================================================================

/// Restores the activation check when dropped.
pub(crate) struct ActivationCheckSuppression<'a> {
    unit: &'a LoadUnit,
    previous: bool,
}

impl Drop for ActivationCheckSuppression<'_> {
    fn drop(&mut self) {
        self.unit
            .activation_check_disabled
            .store(self.previous, Ordering::Release);
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time view of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub name: String,
    pub level: LoadLevel,
    pub error: Option<String>,
    pub notified: Vec<ListenerKind>,
    pub activated: bool,
    pub is_system: bool,
}

// =============================================================================
// TESTS
// =============================================================================
