//! # Simulated Collaborators
//!
//! In-memory images, modules and initializers for driving the state machine
//! without a runtime underneath. Used by the tests, the benchmarks and the
//! `ladder` binary.
//!
//! A [`SimModule`] can be told to fail the sub-step of one level. Only the
//! levels whose work the container performs can fail; see
//! [`SimModule::FAILURE_POINTS`].

mod recorder;

pub use recorder::{RecordingSink, SinkEvent};

use crate::collaborators::{CodeContainer, HostBinding, Image, StaticInitializer};
use crate::domain::LoadDomain;
use crate::notify::Diagnostics;
use crate::unit::LoadUnit;
use crate::{AttachFlags, LoadLevel, LoaderError, ResultCode, UnitId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// IMAGE
// =============================================================================

/// Host-side view of a [`SimImage`].
#[derive(Debug, Default)]
pub struct SimHostBinding {
    unit: Mutex<Option<UnitId>>,
}

impl SimHostBinding {
    /// The unit currently bound to the image, if any.
    #[must_use]
    pub fn current(&self) -> Option<UnitId> {
        *self.unit.lock()
    }
}

impl HostBinding for SimHostBinding {
    fn set_runtime_unit(&self, unit: Option<UnitId>) {
        *self.unit.lock() = unit;
    }
}

/// An image that is always mapped unless told otherwise.
#[derive(Debug)]
pub struct SimImage {
    name: String,
    mapped: bool,
    valid: bool,
    bootstrap: bool,
    debuggable: Option<Vec<u8>>,
    binding: Arc<SimHostBinding>,
}

impl SimImage {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mapped: true,
            valid: true,
            bootstrap: false,
            debuggable: None,
            binding: Arc::new(SimHostBinding::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark as the dependency-free bootstrap image.
    #[must_use]
    pub fn bootstrap(mut self) -> Self {
        self.bootstrap = true;
        self
    }

    /// Make `validate_for_execution` refuse the image.
    #[must_use]
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Report the image as not mapped.
    #[must_use]
    pub fn unmapped(mut self) -> Self {
        self.mapped = false;
        self
    }

    #[must_use]
    pub fn with_debuggable(mut self, blob: Vec<u8>) -> Self {
        self.debuggable = Some(blob);
        self
    }

    /// Handle to the host binding, to observe it after the image is moved.
    #[must_use]
    pub fn binding(&self) -> Arc<SimHostBinding> {
        Arc::clone(&self.binding)
    }
}

impl Image for SimImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        self.mapped
    }

    fn validate_for_execution(&self) -> Result<(), LoaderError> {
        if self.valid {
            Ok(())
        } else {
            Err(LoaderError::ImageValidation(format!(
                "{} is not an executable image",
                self.name
            )))
        }
    }

    fn is_bootstrap_image(&self) -> bool {
        self.bootstrap
    }

    fn debuggable_attribute(&self) -> Option<&[u8]> {
        self.debuggable.as_deref()
    }

    fn host_binding(&self) -> Option<Arc<dyn HostBinding>> {
        Some(self.binding.clone())
    }
}

// =============================================================================
// MODULE
// =============================================================================

/// How often each piece of container work ran.
#[derive(Debug, Default)]
pub struct SimCounters {
    eager_fixups: AtomicUsize,
    vtable_fixups: AtomicUsize,
    exception_plans: AtomicUsize,
    expansions: AtomicUsize,
    precompiled_registrations: AtomicUsize,
}

impl SimCounters {
    #[must_use]
    pub fn eager_fixups(&self) -> usize {
        self.eager_fixups.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vtable_fixups(&self) -> usize {
        self.vtable_fixups.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn exception_plans(&self) -> usize {
        self.exception_plans.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn precompiled_registrations(&self) -> usize {
        self.precompiled_registrations.load(Ordering::SeqCst)
    }
}

/// A code container that forwards its notifications to the domain's sinks.
pub struct SimModule {
    name: String,
    diagnostics: Arc<Diagnostics>,
    precompiled: bool,
    fail_at: Option<LoadLevel>,
    initializer: Option<Arc<dyn StaticInitializer>>,
    counters: Arc<SimCounters>,
}

impl std::fmt::Debug for SimModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimModule")
            .field("name", &self.name)
            .field("precompiled", &self.precompiled)
            .field("fail_at", &self.fail_at)
            .field("initializer", &self.initializer.is_some())
            .finish_non_exhaustive()
    }
}

impl SimModule {
    /// Levels whose sub-step calls into the container and can therefore fail.
    pub const FAILURE_POINTS: [LoadLevel; 3] = [
        LoadLevel::EagerFixups,
        LoadLevel::VtableFixups,
        LoadLevel::Active,
    ];

    #[must_use]
    pub fn new(name: impl Into<String>, diagnostics: &Arc<Diagnostics>) -> Self {
        Self {
            name: name.into(),
            diagnostics: Arc::clone(diagnostics),
            precompiled: false,
            fail_at: None,
            initializer: None,
            counters: Arc::new(SimCounters::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give the module precompiled code with eager fixups.
    #[must_use]
    pub fn precompiled(mut self) -> Self {
        self.precompiled = true;
        self
    }

    /// Fail the container work of `level`.
    ///
    /// Levels outside [`Self::FAILURE_POINTS`] never fail.
    #[must_use]
    pub fn failing_at(mut self, level: LoadLevel) -> Self {
        self.fail_at = Some(level);
        self
    }

    #[must_use]
    pub fn with_initializer(mut self, initializer: Arc<dyn StaticInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Handle to the work counters, to observe them after the module is moved.
    #[must_use]
    pub fn counters(&self) -> Arc<SimCounters> {
        Arc::clone(&self.counters)
    }

    fn step(&self, level: LoadLevel, counter: &AtomicUsize) -> Result<(), LoaderError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(level) {
            return Err(LoaderError::Step {
                level,
                message: format!("injected failure in {}", self.name),
            });
        }
        Ok(())
    }
}

impl CodeContainer for SimModule {
    fn notify_tracing_load_finished(&self, code: ResultCode) {
        self.diagnostics.tracing().load_finished(&self.name, code);
    }

    fn notify_profiler_load_finished(&self, code: ResultCode) {
        if let Some(profiler) = self.diagnostics.profiler() {
            profiler.load_finished(&self.name, code);
        }
    }

    fn has_precompiled_fixups(&self) -> bool {
        self.precompiled || self.fail_at == Some(LoadLevel::EagerFixups)
    }

    fn run_eager_fixups(&self) -> Result<(), LoaderError> {
        self.step(LoadLevel::EagerFixups, &self.counters.eager_fixups)
    }

    fn fixup_virtual_tables(&self) -> Result<(), LoaderError> {
        self.step(LoadLevel::VtableFixups, &self.counters.vtable_fixups)
    }

    fn notify_debugger_load(&self, unit: &LoadUnit, flags: AttachFlags, _attaching: bool) -> bool {
        if !flags.contains(AttachFlags::MODULE_LOAD) {
            return false;
        }
        match self.diagnostics.debugger() {
            Some(debugger) => debugger.load_module(unit.id(), unit.name()),
            None => false,
        }
    }

    fn notify_debugger_unload(&self, unit: &LoadUnit) {
        if let Some(debugger) = self.diagnostics.debugger() {
            debugger.unload_module(unit.id(), unit.name());
        }
    }

    fn global_static_initializer(&self) -> Option<Arc<dyn StaticInitializer>> {
        self.initializer.clone()
    }

    fn resolve_exception_plan(&self) -> Result<(), LoaderError> {
        self.step(LoadLevel::Active, &self.counters.exception_plans)
    }

    fn expand_all(&self) -> Result<(), LoaderError> {
        self.counters.expansions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register_precompiled_code(&self) {
        self.counters
            .precompiled_registrations
            .fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// INITIALIZER
// =============================================================================

/// Static initializer that brings other units to `Active` before returning.
///
/// Dependencies are held weakly so units may depend on each other in a cycle
/// without leaking.
#[derive(Debug, Default)]
pub struct DependencyInitializer {
    dependencies: RwLock<Vec<Weak<LoadUnit>>>,
    runs: AtomicUsize,
}

impl DependencyInitializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependency(&self, unit: &Arc<LoadUnit>) {
        self.dependencies.write().push(Arc::downgrade(unit));
    }

    /// Number of times the initializer has run to completion.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl StaticInitializer for DependencyInitializer {
    fn run(&self, domain: &LoadDomain, unit: &Arc<LoadUnit>) -> Result<(), LoaderError> {
        let dependencies = self.dependencies.read().clone();
        for dependency in dependencies.iter().filter_map(Weak::upgrade) {
            tracing::trace!(unit = %unit.name(), dependency = %dependency.name(), "initializer loading dependency");
            dependency.ensure_level(domain, LoadLevel::Active)?;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
