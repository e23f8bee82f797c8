//! Sink that records every event it receives, in order.

use crate::attribute::DebuggingConfig;
use crate::collaborators::{LoadEventListener, SchedulingHook};
use crate::notify::{DebuggerSink, InspectionSink, ProfilerSink, TracingSink};
use crate::unit::{LoadUnit, UnitSnapshot};
use crate::{LoadLevel, LoaderError, ResultCode, UnitId};
use parking_lot::Mutex;
use serde::Serialize;

/// One observed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    TracingLoadFinished { unit: String, code: ResultCode },
    ProfilerLoadFinished { unit: String, code: ResultCode },
    DebuggerUnitLoad { unit: String, config: DebuggingConfig },
    DebuggerModuleLoad { unit: String },
    DebuggerModuleUnload { unit: String },
    DebuggerUnitUnload { unit: String },
    ModuleLoaded { unit: String },
    Transition { unit: String, level: LoadLevel },
    UnitLoaded { unit: String },
}

impl SinkEvent {
    /// Name of the unit the event is about.
    #[must_use]
    pub fn unit(&self) -> &str {
        match self {
            Self::TracingLoadFinished { unit, .. }
            | Self::ProfilerLoadFinished { unit, .. }
            | Self::DebuggerUnitLoad { unit, .. }
            | Self::DebuggerModuleLoad { unit }
            | Self::DebuggerModuleUnload { unit }
            | Self::DebuggerUnitUnload { unit }
            | Self::ModuleLoaded { unit }
            | Self::Transition { unit, .. }
            | Self::UnitLoaded { unit } => unit,
        }
    }
}

/// Records events from every sink and hook it is plugged into.
///
/// Units are identified by name; the recorder does not track ids.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().push(event);
    }

    /// All events so far.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    fn count(&self, unit: &str, matches: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.unit() == unit && matches(event))
            .count()
    }

    #[must_use]
    pub fn tracing_events(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::TracingLoadFinished { .. }))
    }

    #[must_use]
    pub fn profiler_events(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::ProfilerLoadFinished { .. }))
    }

    #[must_use]
    pub fn debugger_unit_loads(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::DebuggerUnitLoad { .. }))
    }

    #[must_use]
    pub fn debugger_module_loads(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::DebuggerModuleLoad { .. }))
    }

    #[must_use]
    pub fn debugger_module_unloads(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::DebuggerModuleUnload { .. }))
    }

    #[must_use]
    pub fn debugger_unit_unloads(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::DebuggerUnitUnload { .. }))
    }

    #[must_use]
    pub fn inspection_events(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::ModuleLoaded { .. }))
    }

    #[must_use]
    pub fn unit_loaded_events(&self, unit: &str) -> usize {
        self.count(unit, |e| matches!(e, SinkEvent::UnitLoaded { .. }))
    }

    /// Levels reported to the scheduling hook for `unit`, in order.
    #[must_use]
    pub fn transitions(&self, unit: &str) -> Vec<LoadLevel> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Transition { unit: name, level } if name == unit => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Result codes of the tracing events for `unit`.
    #[must_use]
    pub fn tracing_codes(&self, unit: &str) -> Vec<ResultCode> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::TracingLoadFinished { unit: name, code } if name == unit => Some(*code),
                _ => None,
            })
            .collect()
    }
}

impl TracingSink for RecordingSink {
    fn load_finished(&self, unit: &str, code: ResultCode) {
        self.push(SinkEvent::TracingLoadFinished {
            unit: unit.to_string(),
            code,
        });
    }
}

impl ProfilerSink for RecordingSink {
    fn load_finished(&self, unit: &str, code: ResultCode) {
        self.push(SinkEvent::ProfilerLoadFinished {
            unit: unit.to_string(),
            code,
        });
    }
}

impl DebuggerSink for RecordingSink {
    fn load_unit(&self, _unit: UnitId, name: &str, config: DebuggingConfig) {
        self.push(SinkEvent::DebuggerUnitLoad {
            unit: name.to_string(),
            config,
        });
    }

    fn load_module(&self, _unit: UnitId, name: &str) -> bool {
        self.push(SinkEvent::DebuggerModuleLoad {
            unit: name.to_string(),
        });
        true
    }

    fn unload_module(&self, _unit: UnitId, name: &str) {
        self.push(SinkEvent::DebuggerModuleUnload {
            unit: name.to_string(),
        });
    }

    fn unload_unit(&self, _unit: UnitId, name: &str) {
        self.push(SinkEvent::DebuggerUnitUnload {
            unit: name.to_string(),
        });
    }
}

impl InspectionSink for RecordingSink {
    fn module_loaded(&self, _unit: UnitId, name: &str) {
        self.push(SinkEvent::ModuleLoaded {
            unit: name.to_string(),
        });
    }
}

impl SchedulingHook for RecordingSink {
    fn record_transition(&self, unit: &LoadUnit, level: LoadLevel) -> Result<(), LoaderError> {
        self.push(SinkEvent::Transition {
            unit: unit.name().to_string(),
            level,
        });
        Ok(())
    }
}

impl LoadEventListener for RecordingSink {
    fn unit_loaded(&self, unit: &UnitSnapshot) {
        self.push(SinkEvent::UnitLoaded {
            unit: unit.name.clone(),
        });
    }
}
