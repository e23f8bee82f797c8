//! # Load-Level State Machine
//!
//! Per-level sub-steps and the level contracts built on top of them.
//!
//! | Level | Sub-step |
//! |-------|----------|
//! | `Begin` | Register in the domain (under the load lock), bind host identity |
//! | `BeforeTypeLoad` | One-shot profiler notification before any type exists |
//! | `EagerFixups` | Apply precompiled fixups, if the image has them |
//! | `DeliverEvents` | Tracing, profiler and debugger load notifications |
//! | `VtableFixups` | Patch exported vtable slots |
//! | `Loaded` | Publish the level early, notify inspection tooling |
//! | `Active` | Exception plan, static initializer, optional type expansion |
//!
//! Every sub-step is idempotent with respect to the unit's latches, because
//! only `Begin` runs under the domain-wide lock.
//!
//! ## Deadlock Relaxation
//!
//! `ensure_level` may return with the unit one level short of the target when
//! the calling thread is already progressing it, directly or through a cycle
//! of units loading each other. That is the price of never blocking forever.

use crate::domain::LoadDomain;
use crate::unit::LoadUnit;
use crate::{AttachFlags, ListenerKind, LoadLevel, LoaderError, ResultCode};
use std::sync::Arc;

impl LoadUnit {
    // =========================================================================
    // LEVEL CONTRACTS
    // =========================================================================

    /// Drive the unit to at least `target`.
    ///
    /// On return the unit is at `target`, or at `target.relaxed()` when the
    /// calling thread could not progress it further without deadlocking.
    /// A stored error below `target` is re-raised, every time.
    pub fn ensure_level(
        self: &Arc<Self>,
        domain: &LoadDomain,
        target: LoadLevel,
    ) -> Result<(), LoaderError> {
        self.check_domain(domain.id())?;

        if self.is_loading() {
            domain.drive(self, target)?;

            // Short of the target only because of reentrancy.
            self.require_level(target.relaxed())
        } else {
            self.throw_if_error(target)
        }
    }

    /// Assert the unit is at `target` without progressing it.
    ///
    /// Fails with the stored error if there is one, otherwise with
    /// `LoaderError::LoadInProgress`.
    pub fn require_level(&self, target: LoadLevel) -> Result<(), LoaderError> {
        let current = self.current_level();
        if current < target {
            self.throw_if_error(target)?;
            return Err(LoaderError::LoadInProgress {
                unit: self.name().to_string(),
                current,
                required: target,
            });
        }
        Ok(())
    }

    /// Check the unit has reached `required`.
    ///
    /// With `deadlock_ok`, a unit one level short also passes when the calling
    /// thread could not progress it without deadlocking. A domain the unit
    /// does not belong to cannot vouch for it, so that check fails.
    #[must_use]
    pub fn check_load_level(
        &self,
        domain: &LoadDomain,
        required: LoadLevel,
        deadlock_ok: bool,
    ) -> bool {
        if self.check_domain(domain.id()).is_err() {
            return false;
        }
        if deadlock_ok {
            domain.check_loading(self, required)
        } else {
            self.current_level() >= required
        }
    }

    // =========================================================================
    // INCREMENTAL LOAD
    // =========================================================================

    /// Perform the one sub-step associated with `level`.
    ///
    /// Returns `Ok(false)` without side effects if the unit already carries
    /// an error. Does not record the level or the error; the driver does.
    pub fn do_incremental_load(
        self: &Arc<Self>,
        domain: &LoadDomain,
        level: LoadLevel,
    ) -> Result<bool, LoaderError> {
        self.check_domain(domain.id())?;
        if self.is_error() {
            return Ok(false);
        }

        match level {
            LoadLevel::Created => {
                return Err(LoaderError::ContractViolation(format!(
                    "no sub-step leads to {}",
                    level
                )));
            }
            LoadLevel::Begin => self.begin(domain),
            LoadLevel::BeforeTypeLoad => self.before_type_load()?,
            LoadLevel::EagerFixups => self.eager_fixups()?,
            LoadLevel::DeliverEvents => self.deliver_sync_events()?,
            LoadLevel::VtableFixups => self.container().fixup_virtual_tables()?,
            LoadLevel::Loaded => self.finish_load(),
            LoadLevel::Active => self.activate(domain)?,
        }

        domain.record_transition(self, level);
        Ok(true)
    }

    // =========================================================================
    // SUB-STEPS
    // =========================================================================

    fn begin(self: &Arc<Self>, domain: &LoadDomain) {
        domain.add_unit(self);
        self.register_with_host();
    }

    fn before_type_load(&self) -> Result<(), LoaderError> {
        if !self.image().is_loaded() {
            return Err(LoaderError::ContractViolation(format!(
                "image of {} must be loaded before types are",
                self.name()
            )));
        }

        // The profiler may inject methods; it must see the unit before any
        // type from it is materialized.
        self.latches().notify_once(ListenerKind::Profiler, || {
            self.container().notify_profiler_load_finished(ResultCode::OK);
        });
        Ok(())
    }

    fn eager_fixups(&self) -> Result<(), LoaderError> {
        if self.container().has_precompiled_fixups() {
            self.container().run_eager_fixups()?;
        }
        Ok(())
    }

    fn deliver_sync_events(&self) -> Result<(), LoaderError> {
        self.latches().notify_once(ListenerKind::Tracing, || {
            self.container().notify_tracing_load_finished(ResultCode::OK);
        });
        self.latches().notify_once(ListenerKind::Profiler, || {
            self.container().notify_profiler_load_finished(ResultCode::OK);
        });

        // Flagged whether or not a debugger is listening; a debugger that
        // shows up later reads the flag.
        if self.latches().test_and_set(ListenerKind::Debugger) {
            self.notify_debugger_load(AttachFlags::ASSEMBLY_LOAD, false)?;
        }
        Ok(())
    }

    fn finish_load(&self) {
        // Published before the step completes so inspection tooling can
        // enumerate the unit.
        self.complete_level(LoadLevel::Loaded);

        if let Some(inspection) = self.diagnostics().inspection() {
            inspection.module_loaded(self.id(), self.name());
        }
    }

    fn activate(self: &Arc<Self>, domain: &LoadDomain) -> Result<(), LoaderError> {
        if !self.is_loaded() {
            return Err(LoaderError::ContractViolation(format!(
                "{} activated before it was loaded",
                self.name()
            )));
        }

        // No code may run before the exception plan is known.
        self.container().resolve_exception_plan()?;

        if let Some(initializer) = self.container().global_static_initializer() {
            let _suppressed = self.suppress_activation_check();
            initializer.run(domain, self)?;
        }

        if domain.config().expand_modules_on_load {
            self.container().expand_all()?;
        }

        if self.container().has_precompiled_fixups() {
            self.container().register_precompiled_code();
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::collaborators::StaticInitializer;
    use crate::notify::Diagnostics;
    use crate::sim::{RecordingSink, SimImage, SimModule};
    use crate::LoaderConfig;

    fn setup() -> (LoadDomain, Arc<RecordingSink>) {
        let recorder = Arc::new(RecordingSink::new());
        let diagnostics = Diagnostics::new(recorder.clone())
            .with_profiler(recorder.clone())
            .with_debugger(recorder.clone())
            .with_inspection(recorder.clone());
        (
            LoadDomain::new(LoaderConfig::default(), diagnostics),
            recorder,
        )
    }

    fn create(domain: &LoadDomain, module: SimModule) -> Arc<LoadUnit> {
        let image = SimImage::new(module.name());
        domain
            .create_unit(Arc::new(image), Arc::new(module))
            .expect("create")
    }

    #[test]
    fn ensure_level_reaches_target_only() {
        let (domain, recorder) = setup();
        let unit = create(&domain, SimModule::new("App", domain.diagnostics()));

        unit.ensure_level(&domain, LoadLevel::EagerFixups)
            .expect("ensure");
        assert_eq!(unit.current_level(), LoadLevel::EagerFixups);
        assert_eq!(domain.unit_count(), 1);
        assert_eq!(recorder.profiler_events("App"), 1);
        assert_eq!(recorder.tracing_events("App"), 0);
    }

    #[test]
    fn ensure_level_already_met_is_side_effect_free() {
        let (domain, recorder) = setup();
        let unit = create(&domain, SimModule::new("App", domain.diagnostics()));
        unit.ensure_level(&domain, LoadLevel::Active).expect("ensure");

        let before = recorder.events().len();
        unit.ensure_level(&domain, LoadLevel::Loaded).expect("again");
        unit.ensure_level(&domain, LoadLevel::Active).expect("again");
        assert_eq!(recorder.events().len(), before);
    }

    #[test]
    fn require_level_distinguishes_progress_from_error() {
        let (domain, _) = setup();
        let unit = create(
            &domain,
            SimModule::new("App", domain.diagnostics()).failing_at(LoadLevel::VtableFixups),
        );

        assert!(matches!(
            unit.require_level(LoadLevel::Begin),
            Err(LoaderError::LoadInProgress { .. })
        ));

        let err = unit
            .ensure_level(&domain, LoadLevel::Active)
            .expect_err("fails");
        assert!(err.cause().is_some());
        assert!(matches!(
            unit.require_level(LoadLevel::Active),
            Err(LoaderError::Load(_))
        ));
        assert!(unit.require_level(LoadLevel::DeliverEvents).is_ok());
    }

    #[test]
    fn do_incremental_load_noop_after_error() {
        let (domain, recorder) = setup();
        let module = SimModule::new("App", domain.diagnostics()).failing_at(LoadLevel::VtableFixups);
        let counters = module.counters();
        let unit = create(&domain, module);

        assert!(unit.ensure_level(&domain, LoadLevel::Active).is_err());
        let before = recorder.events().len();

        let ran = unit
            .do_incremental_load(&domain, LoadLevel::VtableFixups)
            .expect("noop");
        assert!(!ran);
        assert_eq!(counters.vtable_fixups(), 1);
        assert_eq!(recorder.events().len(), before);
    }

    #[test]
    fn created_has_no_sub_step() {
        let (domain, _) = setup();
        let unit = create(&domain, SimModule::new("App", domain.diagnostics()));
        assert!(matches!(
            unit.do_incremental_load(&domain, LoadLevel::Created),
            Err(LoaderError::ContractViolation(_))
        ));
    }

    #[test]
    fn eager_fixups_only_for_precompiled_images() {
        let (domain, _) = setup();
        let plain = SimModule::new("Plain", domain.diagnostics());
        let plain_counters = plain.counters();
        let precompiled = SimModule::new("R2R", domain.diagnostics()).precompiled();
        let precompiled_counters = precompiled.counters();

        create(&domain, plain)
            .ensure_level(&domain, LoadLevel::Active)
            .expect("plain");
        create(&domain, precompiled)
            .ensure_level(&domain, LoadLevel::Active)
            .expect("r2r");

        assert_eq!(plain_counters.eager_fixups(), 0);
        assert_eq!(precompiled_counters.eager_fixups(), 1);
        assert_eq!(precompiled_counters.precompiled_registrations(), 1);
    }

    #[test]
    fn finish_load_notifies_inspection() {
        let (domain, recorder) = setup();
        let unit = create(&domain, SimModule::new("App", domain.diagnostics()));
        unit.ensure_level(&domain, LoadLevel::Loaded).expect("ensure");
        assert_eq!(recorder.inspection_events("App"), 1);
    }

    #[test]
    fn initializer_can_call_back_into_its_unit() {
        let (domain, _) = setup();
        let seen_activated = Arc::new(parking_lot::Mutex::new(None));
        let seen = Arc::clone(&seen_activated);
        let initializer: Arc<dyn StaticInitializer> = Arc::new(
            move |domain: &LoadDomain, unit: &Arc<LoadUnit>| -> Result<(), LoaderError> {
                // Reentrant self-activation returns one level short.
                unit.ensure_level(domain, LoadLevel::Active)?;
                *seen.lock() = Some((unit.current_level(), unit.check_activated()));
                Ok(())
            },
        );
        let unit = create(
            &domain,
            SimModule::new("App", domain.diagnostics()).with_initializer(initializer),
        );

        unit.ensure_level(&domain, LoadLevel::Active).expect("ensure");
        assert_eq!(*seen_activated.lock(), Some((LoadLevel::Loaded, true)));
        assert!(unit.is_active());
        assert!(!unit.is_activation_check_disabled());
    }

    #[test]
    fn expand_modules_on_load_is_configurable() {
        let recorder = Arc::new(RecordingSink::new());
        let config = LoaderConfig {
            expand_modules_on_load: true,
            ..LoaderConfig::default()
        };
        let domain = LoadDomain::new(config, Diagnostics::new(recorder));
        let module = SimModule::new("App", domain.diagnostics());
        let counters = module.counters();
        create(&domain, module)
            .ensure_level(&domain, LoadLevel::Active)
            .expect("ensure");
        assert_eq!(counters.expansions(), 1);
    }

    #[test]
    fn check_load_level_strict() {
        let (domain, _) = setup();
        let unit = create(&domain, SimModule::new("App", domain.diagnostics()));
        unit.ensure_level(&domain, LoadLevel::DeliverEvents)
            .expect("ensure");

        assert!(unit.check_load_level(&domain, LoadLevel::DeliverEvents, false));
        assert!(!unit.check_load_level(&domain, LoadLevel::VtableFixups, false));
        // Nobody is progressing the unit, so no relaxation applies.
        assert!(!unit.check_load_level(&domain, LoadLevel::VtableFixups, true));
    }

    #[test]
    fn foreign_domain_cannot_drive_unit() {
        let (home, recorder) = setup();
        let (foreign, _) = setup();
        let unit = create(&home, SimModule::new("App", home.diagnostics()));

        let result = unit.ensure_level(&foreign, LoadLevel::Active);
        assert!(matches!(result, Err(LoaderError::ContractViolation(_))));
        assert!(matches!(
            unit.do_incremental_load(&foreign, LoadLevel::Begin),
            Err(LoaderError::ContractViolation(_))
        ));
        assert_eq!(unit.current_level(), LoadLevel::Created);
        assert!(!unit.is_error());
        assert_eq!(foreign.unit_count(), 0);
        assert_eq!(home.unit_count(), 0);
        assert_eq!(recorder.profiler_events("App"), 0);

        unit.ensure_level(&home, LoadLevel::Active).expect("home");
        assert_eq!(home.unit_count(), 1);
        assert!(unit.check_load_level(&home, LoadLevel::Active, false));
        assert!(!unit.check_load_level(&foreign, LoadLevel::Active, false));
        assert!(!unit.check_load_level(&foreign, LoadLevel::Active, true));
    }
}
