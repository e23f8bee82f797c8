//! Integration tests for manifest parsing, scenario runs and reports.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use ladder::cli::{LoadOptions, run_manifest};
use ladder::manifest::{Manifest, UnitStatus};
use ladder_core::{ListenerKind, LoadLevel, LoaderError, ResultCode};
use std::io::Write;

const MIXED: &str = r#"
[loader]
strict_activation_checks = false

[sinks]
profiler = true
debugger = true
inspection = true

[[unit]]
name = "System.Private.CoreLib"
bootstrap = true

[[unit]]
name = "App"
depends_on = ["Lib"]
debuggable = [1, 0, 1, 1, 0, 0]

[[unit]]
name = "Lib"
precompiled = true
"#;

fn write_manifest(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn options(target: LoadLevel, parallel: bool) -> LoadOptions {
    LoadOptions {
        target,
        parallel,
        strict: false,
        expand: false,
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn test_parse_mixed_manifest() {
    let manifest = Manifest::from_toml_str(MIXED).unwrap();

    assert!(!manifest.loader.strict_activation_checks);
    assert!(manifest.sinks.debugger);
    assert_eq!(manifest.units.len(), 3);
    assert!(manifest.units[0].bootstrap);
    assert_eq!(manifest.units[1].depends_on, ["Lib"]);
    assert_eq!(manifest.units[1].debuggable, Some(vec![1, 0, 1, 1, 0, 0]));
}

#[test]
fn test_fail_at_uses_level_names() {
    let manifest = Manifest::from_toml_str(
        r#"
[[unit]]
name = "Lib"
fail_at = "vtable-fixups"
"#,
    )
    .unwrap();
    assert_eq!(manifest.units[0].fail_at, Some(LoadLevel::VtableFixups));
}

#[test]
fn test_empty_manifest_is_valid() {
    let manifest = Manifest::from_toml_str("").unwrap();
    assert!(manifest.units.is_empty());
    assert!(!manifest.sinks.profiler);
}

#[test]
fn test_unknown_field_rejected() {
    let result = Manifest::from_toml_str(
        r#"
[[unit]]
name = "App"
colour = "blue"
"#,
    );
    assert!(matches!(result, Err(LoaderError::Config(_))));
}

#[test]
fn test_duplicate_unit_rejected() {
    let result = Manifest::from_toml_str(
        r#"
[[unit]]
name = "App"

[[unit]]
name = "App"
"#,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Duplicate unit 'App'"));
}

#[test]
fn test_unknown_dependency_rejected() {
    let result = Manifest::from_toml_str(
        r#"
[[unit]]
name = "App"
depends_on = ["Missing"]
"#,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("unknown unit 'Missing'"));
}

#[test]
fn test_uninjectable_failure_rejected() {
    let result = Manifest::from_toml_str(
        r#"
[[unit]]
name = "App"
fail_at = "deliver-events"
"#,
    );
    assert!(matches!(result, Err(LoaderError::Config(_))));
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_mixed_manifest_loads_sequentially() {
    let manifest = Manifest::from_toml_str(MIXED).unwrap();
    let report = manifest.build().run(LoadLevel::Active, false);

    assert_eq!(report.failures(), 0);
    assert_eq!(report.registered, 3);
    for unit in &report.units {
        assert_eq!(unit.status, UnitStatus::Ok);
        let snapshot = unit.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.level, LoadLevel::Active);
        assert!(snapshot.activated);
        assert_eq!(unit.tracing_events, 1);
        assert_eq!(unit.profiler_events, 1);
        assert_eq!(unit.debugger_loads, 1);
    }
    assert!(report.first_error().is_none());
}

#[test]
fn test_cycle_loads_in_parallel() {
    let manifest = Manifest::from_toml_str(
        r#"
[[unit]]
name = "A"
depends_on = ["B"]

[[unit]]
name = "B"
depends_on = ["A"]

[[unit]]
name = "C"
depends_on = ["A", "B"]
"#,
    )
    .unwrap();

    let report = manifest.build().run(LoadLevel::Active, true);
    assert_eq!(report.failures(), 0);
    assert!(report.parallel);
    for unit in &report.units {
        let snapshot = unit.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.level, LoadLevel::Active);
        assert!(snapshot.notified.contains(&ListenerKind::HostLoadEvent));
    }
}

#[test]
fn test_failure_and_refusal_are_reported() {
    let manifest = Manifest::from_toml_str(
        r#"
[[unit]]
name = "Broken"
invalid = true

[[unit]]
name = "Lib"
fail_at = "vtable-fixups"

[[unit]]
name = "App"
depends_on = ["Lib"]

[[unit]]
name = "Standalone"
"#,
    )
    .unwrap();

    let report = manifest.build().run(LoadLevel::Active, false);
    let status: Vec<_> = report.units.iter().map(|unit| unit.status).collect();
    assert_eq!(
        status,
        [
            UnitStatus::Refused,
            UnitStatus::Failed,
            UnitStatus::Failed,
            UnitStatus::Ok
        ]
    );

    assert!(report.units[0].snapshot.is_none());
    assert_eq!(
        report.units[1].snapshot.as_ref().unwrap().level,
        LoadLevel::DeliverEvents
    );
    assert_eq!(
        report.units[1].result_code.as_deref(),
        Some(ResultCode::FAIL.to_string().as_str())
    );
    assert_eq!(
        report.units[2].snapshot.as_ref().unwrap().level,
        LoadLevel::Loaded
    );
    assert!(matches!(
        report.first_error(),
        Some(LoaderError::ImageValidation(_))
    ));
}

#[test]
fn test_partial_target() {
    let manifest = Manifest::from_toml_str(MIXED).unwrap();
    let report = manifest.build().run(LoadLevel::DeliverEvents, false);

    assert_eq!(report.failures(), 0);
    let app = &report.units[1];
    let snapshot = app.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.level, LoadLevel::DeliverEvents);
    assert!(!snapshot.activated);
    assert_eq!(app.debugger_loads, 1);
}

// =============================================================================
// FILES AND OPTIONS
// =============================================================================

#[test]
fn test_run_manifest_from_file() {
    let file = write_manifest(MIXED);
    let report = run_manifest(file.path(), options(LoadLevel::Active, false)).unwrap();
    assert_eq!(report.units.len(), 3);
    assert_eq!(report.failures(), 0);
}

#[test]
fn test_flags_override_manifest() {
    let mut manifest = Manifest::from_toml_str(
        r#"
[loader]
strict_activation_checks = false
expand_modules_on_load = false
"#,
    )
    .unwrap();

    let mut flags = options(LoadLevel::Active, false);
    flags.apply(&mut manifest);
    assert!(!manifest.loader.strict_activation_checks);

    flags.strict = true;
    flags.expand = true;
    flags.apply(&mut manifest);
    assert!(manifest.loader.strict_activation_checks);
    assert!(manifest.loader.expand_modules_on_load);
}

#[test]
fn test_activation_failure_from_file() {
    let file = write_manifest(
        r#"
[[unit]]
name = "App"
fail_at = "active"
"#,
    );
    let mut strict = options(LoadLevel::Active, false);
    strict.strict = true;

    let report = run_manifest(file.path(), strict).unwrap();
    assert_eq!(report.failures(), 1);
    assert_eq!(
        report.first_error().unwrap().result_code(),
        ResultCode::FAIL
    );
    assert!(!report.units[0].snapshot.as_ref().unwrap().activated);
}

#[test]
fn test_missing_manifest_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_manifest(
        &dir.path().join("absent.toml"),
        options(LoadLevel::Active, false),
    );
    assert!(matches!(result, Err(LoaderError::Io(_))));
}

#[test]
fn test_directory_is_not_a_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let result = run_manifest(dir.path(), options(LoadLevel::Active, false));
    assert!(matches!(result, Err(LoaderError::Io(_))));
}

// =============================================================================
// REPORT RENDERING
// =============================================================================

#[test]
fn test_report_json_shape() {
    let manifest = Manifest::from_toml_str(MIXED).unwrap();
    let report = manifest.build().run(LoadLevel::Active, false);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["target"], "active");
    assert_eq!(json["units"][1]["name"], "App");
    assert_eq!(json["units"][1]["status"], "ok");
    assert_eq!(json["units"][1]["snapshot"]["level"], "active");
    assert!(json["units"][1].get("outcome").is_none());
}

#[test]
fn test_report_text_lists_units() {
    let manifest = Manifest::from_toml_str(
        r#"
[[unit]]
name = "Lib"
fail_at = "eager-fixups"
"#,
    )
    .unwrap();
    let report = manifest.build().run(LoadLevel::Active, false);
    let text = report.render_text();

    assert!(text.contains("Ladder Load Report"));
    assert!(text.contains("Lib"));
    assert!(text.contains("FAILED"));
    assert!(text.contains("1 unit(s), 1 failure(s)"));
}
