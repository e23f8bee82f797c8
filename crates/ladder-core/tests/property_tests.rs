//! # Property-Based Tests
//!
//! Invariants of the load-level state machine checked with proptest:
//! monotonic levels, one-shot notifications, sticky errors and the
//! debuggable attribute bit rules.

use ladder_core::sim::{RecordingSink, SimImage, SimModule};
use ladder_core::{
    DebuggingConfig, Diagnostics, LoadDomain, LoadLevel, LoadUnit, LoaderConfig, LoaderError,
    ResultCode, parse_debuggable_blob,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

fn level() -> impl Strategy<Value = LoadLevel> {
    prop::sample::select(LoadLevel::ALL.to_vec())
}

fn failure_point() -> impl Strategy<Value = Option<LoadLevel>> {
    prop::option::of(prop::sample::select(SimModule::FAILURE_POINTS.to_vec()))
}

fn setup(fail_at: Option<LoadLevel>) -> (LoadDomain, Arc<RecordingSink>, Arc<LoadUnit>) {
    let recorder = Arc::new(RecordingSink::new());
    let diagnostics = Diagnostics::new(recorder.clone())
        .with_profiler(recorder.clone())
        .with_debugger(recorder.clone());
    let domain = LoadDomain::new(LoaderConfig::default(), diagnostics);

    let mut module = SimModule::new("Unit", domain.diagnostics()).precompiled();
    if let Some(level) = fail_at {
        module = module.failing_at(level);
    }
    let unit = domain
        .create_unit(Arc::new(SimImage::new("Unit")), Arc::new(module))
        .expect("create");
    (domain, recorder, unit)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The recorded level never decreases, whatever the requests.
    #[test]
    fn level_is_monotonic(targets in vec(level(), 1..20), fail_at in failure_point()) {
        let (domain, _, unit) = setup(fail_at);
        let mut previous = unit.current_level();

        for target in targets {
            let result = unit.ensure_level(&domain, target);
            let current = unit.current_level();
            prop_assert!(current >= previous);
            if result.is_ok() {
                prop_assert!(current >= target);
            }
            previous = current;
        }
    }

    /// Every consumer hears about the unit at most once.
    #[test]
    fn notifications_at_most_once(targets in vec(level(), 1..20), fail_at in failure_point()) {
        let (domain, recorder, unit) = setup(fail_at);

        for target in targets {
            let _ = unit.ensure_level(&domain, target);
        }

        // Tracing hears the success and, separately, the failure.
        let codes = recorder.tracing_codes("Unit");
        prop_assert!(codes.iter().filter(|code| **code == ResultCode::OK).count() <= 1);
        prop_assert!(codes.iter().filter(|code| **code != ResultCode::OK).count() <= 1);
        prop_assert!(recorder.profiler_events("Unit") <= 1);
        prop_assert!(recorder.debugger_unit_loads("Unit") <= 1);
        prop_assert!(recorder.debugger_module_loads("Unit") <= 1);
    }

    /// After a failure, every request past the reached level raises the same
    /// cause.
    #[test]
    fn sticky_error_is_replayed(
        fail_at in prop::sample::select(SimModule::FAILURE_POINTS.to_vec()),
        targets in vec(level(), 1..20),
    ) {
        let (domain, _, unit) = setup(Some(fail_at));
        let first = unit.ensure_level(&domain, LoadLevel::Active).expect_err("fails");
        let stored = first.cause().cloned().expect("cause");
        let reached = unit.current_level();
        prop_assert_eq!(reached, fail_at.relaxed());

        for target in targets {
            let result = unit.ensure_level(&domain, target);
            if target <= reached {
                prop_assert!(result.is_ok());
            } else {
                match result {
                    Err(LoaderError::Load(cause)) => prop_assert!(Arc::ptr_eq(&cause, &stored)),
                    other => prop_assert!(false, "expected stored cause, got {:?}", other),
                }
            }
            prop_assert_eq!(unit.current_level(), reached);
        }
    }

    /// Well-formed blobs decode according to the bit rules.
    #[test]
    fn blob_follows_bit_rules(
        flags in any::<u8>(),
        disable in any::<u8>(),
        tail in vec(any::<u8>(), 2..=2),
        long in any::<bool>(),
    ) {
        let mut blob = vec![1, 0, flags, disable];
        blob.extend(&tail);
        if long {
            blob.extend([0, 0]);
        }

        let config = parse_debuggable_blob(Some(&blob)).expect("well-formed");
        let tracking = flags & 1 != 0;
        prop_assert_eq!(config.track_jit_info, tracking);
        prop_assert_eq!(config.ignore_symbols, flags & 2 != 0);
        prop_assert_eq!(config.allow_optimizations, !tracking || disable == 0);
    }

    /// A bad prolog on a supported length is always malformed.
    #[test]
    fn bad_prolog_is_malformed(
        prolog in (any::<u8>(), any::<u8>()).prop_filter("not 01 00", |p| *p != (1, 0)),
        long in any::<bool>(),
    ) {
        let mut blob = vec![prolog.0, prolog.1, 1, 1, 0, 0];
        if long {
            blob.extend([0, 0]);
        }
        let is_malformed = matches!(
            parse_debuggable_blob(Some(&blob)),
            Err(LoaderError::MalformedAttribute { .. })
        );
        prop_assert!(is_malformed);
    }

    /// Unsupported lengths pass through as the default.
    #[test]
    fn unsupported_length_is_default(
        blob in vec(any::<u8>(), 0..16).prop_filter("unsupported length", |b| b.len() != 6 && b.len() != 8),
    ) {
        let config = parse_debuggable_blob(Some(&blob)).expect("pass-through");
        prop_assert_eq!(config, DebuggingConfig::default());
    }
}
