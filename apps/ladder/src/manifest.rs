//! # Load Manifests
//!
//! A TOML description of a domain full of simulated units, and the report
//! produced by driving them.
//!
//! ```toml
//! [loader]
//! strict_activation_checks = true
//!
//! [sinks]
//! profiler = true
//! debugger = true
//!
//! [[unit]]
//! name = "System.Private.CoreLib"
//! bootstrap = true
//!
//! [[unit]]
//! name = "App"
//! depends_on = ["Lib"]
//! debuggable = [1, 0, 1, 1, 0, 0]
//!
//! [[unit]]
//! name = "Lib"
//! fail_at = "vtable-fixups"
//! ```

use ladder_core::sim::{DependencyInitializer, RecordingSink, SimImage, SimModule};
use ladder_core::{
    Diagnostics, LoadDomain, LoadLevel, LoadUnit, LoaderConfig, LoaderError, UnitSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Maximum manifest size (1 MB).
const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

// =============================================================================
// MANIFEST
// =============================================================================

/// Which optional sinks the domain gets. Tracing is always on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
    pub profiler: bool,
    pub debugger: bool,
    pub inspection: bool,
}

/// One simulated unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitSpec {
    pub name: String,
    /// Dependency-free bootstrap unit.
    pub bootstrap: bool,
    /// Carries precompiled code with eager fixups.
    pub precompiled: bool,
    /// Has a static initializer even without dependencies.
    pub initializer: bool,
    /// Units brought to `Active` by this unit's static initializer.
    pub depends_on: Vec<String>,
    /// Level whose sub-step fails.
    pub fail_at: Option<LoadLevel>,
    /// Raw debuggable attribute blob.
    pub debuggable: Option<Vec<u8>>,
    /// Image fails validation and never becomes a unit.
    pub invalid: bool,
}

impl UnitSpec {
    fn has_initializer(&self) -> bool {
        self.initializer || !self.depends_on.is_empty()
    }
}

/// A domain description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub sinks: SinkConfig,
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitSpec>,
}

impl Manifest {
    /// Parse and validate a manifest.
    pub fn from_toml_str(source: &str) -> Result<Self, LoaderError> {
        let manifest: Manifest = toml::from_str(source)
            .map_err(|e| LoaderError::Config(format!("Invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        let path = validate_file_path(path)?;
        let metadata = std::fs::metadata(&path)
            .map_err(|e| LoaderError::Io(format!("Cannot read file metadata: {}", e)))?;
        if metadata.len() > MAX_MANIFEST_SIZE {
            return Err(LoaderError::Io(format!(
                "Manifest size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_MANIFEST_SIZE
            )));
        }

        let source = std::fs::read_to_string(&path)
            .map_err(|e| LoaderError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Check names are unique, dependencies exist and failures are injectable.
    pub fn validate(&self) -> Result<(), LoaderError> {
        let mut names = BTreeSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(LoaderError::Config("Unit with empty name".to_string()));
            }
            if !names.insert(unit.name.as_str()) {
                return Err(LoaderError::Config(format!(
                    "Duplicate unit '{}'",
                    unit.name
                )));
            }
        }

        for unit in &self.units {
            if let Some(missing) = unit.depends_on.iter().find(|d| !names.contains(d.as_str())) {
                return Err(LoaderError::Config(format!(
                    "Unit '{}' depends on unknown unit '{}'",
                    unit.name, missing
                )));
            }
            if let Some(level) = unit.fail_at {
                if !SimModule::FAILURE_POINTS.contains(&level) {
                    return Err(LoaderError::Config(format!(
                        "Unit '{}' cannot fail at {}; choose one of {}",
                        unit.name,
                        level,
                        SimModule::FAILURE_POINTS
                            .iter()
                            .map(LoadLevel::name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create the domain and one unit per entry, wiring dependencies.
    pub fn build(&self) -> Scenario {
        let recorder = Arc::new(RecordingSink::new());
        let mut diagnostics = Diagnostics::new(recorder.clone());
        if self.sinks.profiler {
            diagnostics = diagnostics.with_profiler(recorder.clone());
        }
        if self.sinks.debugger {
            diagnostics = diagnostics.with_debugger(recorder.clone());
        }
        if self.sinks.inspection {
            diagnostics = diagnostics.with_inspection(recorder.clone());
        }

        let domain =
            LoadDomain::new(self.loader, diagnostics).with_scheduling_hook(recorder.clone());
        domain.subscribe(recorder.clone());

        let mut initializers = BTreeMap::new();
        let mut units = Vec::with_capacity(self.units.len());

        for spec in &self.units {
            let mut image = SimImage::new(spec.name.as_str());
            if spec.bootstrap {
                image = image.bootstrap();
            }
            if spec.invalid {
                image = image.invalid();
            }
            if let Some(blob) = &spec.debuggable {
                image = image.with_debuggable(blob.clone());
            }

            let mut module = SimModule::new(spec.name.as_str(), domain.diagnostics());
            if spec.precompiled {
                module = module.precompiled();
            }
            if let Some(level) = spec.fail_at {
                module = module.failing_at(level);
            }
            if spec.has_initializer() {
                let initializer = Arc::new(DependencyInitializer::new());
                initializers.insert(spec.name.as_str(), Arc::clone(&initializer));
                module = module.with_initializer(initializer);
            }

            let outcome = domain.create_unit(Arc::new(image), Arc::new(module));
            if let Err(err) = &outcome {
                tracing::warn!(unit = %spec.name, error = %err, "image refused");
            }
            units.push(PlannedUnit {
                name: spec.name.clone(),
                outcome,
            });
        }

        for spec in &self.units {
            let Some(initializer) = initializers.get(spec.name.as_str()) else {
                continue;
            };
            for dependency in &spec.depends_on {
                match units.iter().find(|planned| &planned.name == dependency) {
                    Some(PlannedUnit { outcome: Ok(unit), .. }) => initializer.add_dependency(unit),
                    _ => tracing::warn!(
                        unit = %spec.name,
                        %dependency,
                        "dependency was refused; skipping it"
                    ),
                }
            }
        }

        Scenario {
            domain,
            recorder,
            units,
        }
    }
}

/// Validate a manifest path.
///
/// Canonicalizes the path (resolving symlinks and `..`) and ensures it names
/// a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, LoaderError> {
    let canonical = path.canonicalize().map_err(|e| {
        LoaderError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(LoaderError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

// =============================================================================
// SCENARIO
// =============================================================================

/// A unit as created from its manifest entry.
pub struct PlannedUnit {
    pub name: String,
    /// The unit, or the reason its image was refused.
    pub outcome: Result<Arc<LoadUnit>, LoaderError>,
}

/// A built domain, ready to drive.
pub struct Scenario {
    pub domain: LoadDomain,
    pub recorder: Arc<RecordingSink>,
    pub units: Vec<PlannedUnit>,
}

impl Scenario {
    /// Drive every unit to `target`, in manifest order or one thread per unit.
    pub fn run(&self, target: LoadLevel, parallel: bool) -> LoadReport {
        let outcomes: Vec<Result<(), LoaderError>> = if parallel {
            thread::scope(|scope| {
                let handles: Vec<_> = self
                    .units
                    .iter()
                    .map(|planned| scope.spawn(move || self.drive(planned, target)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(LoaderError::ContractViolation(
                                "load thread panicked".to_string(),
                            ))
                        })
                    })
                    .collect()
            })
        } else {
            self.units
                .iter()
                .map(|planned| self.drive(planned, target))
                .collect()
        };

        let units = self
            .units
            .iter()
            .zip(outcomes)
            .map(|(planned, outcome)| self.unit_report(planned, outcome))
            .collect();

        LoadReport {
            domain: self.domain.id().0,
            target,
            parallel,
            registered: self.domain.unit_count(),
            units,
            events: self.recorder.events().len(),
        }
    }

    fn drive(&self, planned: &PlannedUnit, target: LoadLevel) -> Result<(), LoaderError> {
        let unit = planned.outcome.as_ref().map_err(|e| e.clone())?;
        unit.ensure_level(&self.domain, target)?;
        if target.is_terminal() {
            self.domain.require_activated(unit)?;
        }
        Ok(())
    }

    fn unit_report(&self, planned: &PlannedUnit, outcome: Result<(), LoaderError>) -> UnitReport {
        let snapshot = planned.outcome.as_ref().ok().map(|unit| unit.snapshot());
        let status = match (&planned.outcome, &outcome) {
            (Err(_), _) => UnitStatus::Refused,
            (Ok(_), Ok(())) => UnitStatus::Ok,
            (Ok(_), Err(_)) => UnitStatus::Failed,
        };

        UnitReport {
            name: planned.name.clone(),
            status,
            error: outcome.as_ref().err().map(ToString::to_string),
            result_code: outcome.as_ref().err().map(|e| e.result_code().to_string()),
            snapshot,
            tracing_events: self.recorder.tracing_events(&planned.name),
            profiler_events: self.recorder.profiler_events(&planned.name),
            debugger_loads: self.recorder.debugger_unit_loads(&planned.name),
            outcome,
        }
    }
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Failed,
    Refused,
}

/// Outcome of driving one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub status: UnitStatus,
    pub error: Option<String>,
    pub result_code: Option<String>,
    pub snapshot: Option<UnitSnapshot>,
    pub tracing_events: usize,
    pub profiler_events: usize,
    pub debugger_loads: usize,
    #[serde(skip)]
    pub outcome: Result<(), LoaderError>,
}

/// Outcome of driving a whole manifest.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub domain: u64,
    pub target: LoadLevel,
    pub parallel: bool,
    pub registered: usize,
    pub units: Vec<UnitReport>,
    pub events: usize,
}

impl LoadReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.status != UnitStatus::Ok)
            .count()
    }

    /// The first error in manifest order, if any unit failed.
    #[must_use]
    pub fn first_error(&self) -> Option<LoaderError> {
        self.units
            .iter()
            .find_map(|unit| unit.outcome.as_ref().err().cloned())
    }

    /// Human-readable table.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Ladder Load Report\n");
        out.push_str("==================\n");
        out.push_str(&format!("Domain:     {}\n", self.domain));
        out.push_str(&format!("Target:     {}\n", self.target));
        out.push_str(&format!(
            "Mode:       {}\n",
            if self.parallel { "parallel" } else { "sequential" }
        ));
        out.push_str(&format!("Registered: {}\n\n", self.registered));

        for unit in &self.units {
            let level = unit
                .snapshot
                .as_ref()
                .map_or("-", |snapshot| snapshot.level.name());
            let status = match unit.status {
                UnitStatus::Ok => "ok",
                UnitStatus::Failed => "FAILED",
                UnitStatus::Refused => "REFUSED",
            };
            out.push_str(&format!("  {:<24} {:<16} {}\n", unit.name, level, status));
            if let Some(error) = &unit.error {
                out.push_str(&format!("      {}\n", error));
            }
        }

        out.push_str(&format!(
            "\n{} unit(s), {} failure(s), {} event(s)\n",
            self.units.len(),
            self.failures(),
            self.events
        ));
        out
    }
}
