//! # Load Domain
//!
//! The owner of a set of units and of the machinery that serializes their
//! progression.
//!
//! Two locks live here, with different jobs:
//!
//! - `load_lock`, a reentrant mutex held only while a unit registers itself
//!   during `Begin`.
//! - The per-unit load entries, which record which thread is progressing
//!   which unit and which thread waits for which unit. A thread that would
//!   close a waits-for cycle by blocking is told to stop instead, and its
//!   caller accepts the unit one level short.
//!
//! Nothing else about a unit is protected by a lock; see [`crate::unit`].

use crate::collaborators::{CodeContainer, Image, LoadEventListener, SchedulingHook};
use crate::config::LoaderConfig;
use crate::notify::Diagnostics;
use crate::unit::LoadUnit;
use crate::{DomainId, ListenerKind, LoadLevel, LoaderError, UnitId};
use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

static NEXT_DOMAIN: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// LOAD ENTRIES
// =============================================================================

/// Who progresses which unit, and who waits for which unit.
#[derive(Debug, Default)]
struct LoadEntries {
    owners: HashMap<UnitId, ThreadId>,
    waiting: HashMap<ThreadId, UnitId>,
}

impl LoadEntries {
    /// Check if `thread` blocking on `unit` would close a waits-for cycle.
    fn would_deadlock(&self, thread: ThreadId, unit: UnitId) -> bool {
        let mut next = unit;
        // Each hop visits a distinct owner unless a cycle exists elsewhere.
        for _ in 0..=self.owners.len() {
            let Some(&owner) = self.owners.get(&next) else {
                return false;
            };
            if owner == thread {
                return true;
            }
            match self.waiting.get(&owner) {
                Some(&blocked_on) => next = blocked_on,
                None => return false,
            }
        }
        false
    }
}

/// Outcome of asking for the right to progress a unit.
enum Entry<'a> {
    Acquired(EntryGuard<'a>),
    /// This thread already progresses the unit further up the stack.
    Reentrant,
    /// Blocking would deadlock with another thread.
    WouldDeadlock,
}

/// Releases a unit's load entry and wakes waiters when dropped.
struct EntryGuard<'a> {
    domain: &'a LoadDomain,
    unit: UnitId,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.domain.entries.lock();
        entries.owners.remove(&self.unit);
        drop(entries);
        self.domain.released.notify_all();
    }
}

// =============================================================================
// LOAD DOMAIN
// =============================================================================

/// An isolation boundary that owns units and drives them through the levels.
pub struct LoadDomain {
    id: DomainId,
    config: LoaderConfig,
    diagnostics: Arc<Diagnostics>,
    load_lock: ReentrantMutex<()>,
    registry: RwLock<BTreeMap<UnitId, Arc<LoadUnit>>>,
    entries: Mutex<LoadEntries>,
    released: Condvar,
    scheduling: Option<Arc<dyn SchedulingHook>>,
    listeners: RwLock<Vec<Arc<dyn LoadEventListener>>>,
    next_unit: AtomicU64,
}

impl fmt::Debug for LoadDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadDomain")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("diagnostics", &self.diagnostics)
            .field("units", &self.unit_count())
            .finish_non_exhaustive()
    }
}

impl LoadDomain {
    #[must_use]
    pub fn new(config: LoaderConfig, diagnostics: Diagnostics) -> Self {
        Self {
            id: DomainId(NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed)),
            config,
            diagnostics: Arc::new(diagnostics),
            load_lock: ReentrantMutex::new(()),
            registry: RwLock::new(BTreeMap::new()),
            entries: Mutex::new(LoadEntries::default()),
            released: Condvar::new(),
            scheduling: None,
            listeners: RwLock::new(Vec::new()),
            next_unit: AtomicU64::new(1),
        }
    }

    /// Attach a hook that observes every completed level transition.
    #[must_use]
    pub fn with_scheduling_hook(mut self, hook: Arc<dyn SchedulingHook>) -> Self {
        self.scheduling = Some(hook);
        self
    }

    #[must_use]
    pub fn id(&self) -> DomainId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Wrap an image and its container in a fresh unit at `Created`.
    ///
    /// The unit is not registered until it completes `Begin`.
    pub fn create_unit(
        &self,
        image: Arc<dyn Image>,
        container: Arc<dyn CodeContainer>,
    ) -> Result<Arc<LoadUnit>, LoaderError> {
        let id = UnitId(self.next_unit.fetch_add(1, Ordering::Relaxed));
        let unit = LoadUnit::new(
            id,
            self.id,
            image,
            container,
            Arc::clone(&self.diagnostics),
        )?;
        tracing::debug!(unit = %unit.name(), %id, "unit created");
        Ok(Arc::new(unit))
    }

    /// Fail (or, without strict checks, warn) if code in `unit` may not run.
    pub fn require_activated(&self, unit: &LoadUnit) -> Result<(), LoaderError> {
        if unit.check_activated() {
            return Ok(());
        }
        if self.config.strict_activation_checks {
            return Err(LoaderError::ContractViolation(format!(
                "{} is not activated (level {})",
                unit.name(),
                unit.current_level()
            )));
        }
        tracing::warn!(
            unit = %unit.name(),
            level = %unit.current_level(),
            "running code in a unit that is not activated"
        );
        Ok(())
    }

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Register `unit`. Repeated registration is a no-op.
    pub(crate) fn add_unit(&self, unit: &Arc<LoadUnit>) {
        let _guard = self.load_lock.lock();
        let mut registry = self.registry.write();
        if !registry.contains_key(&unit.id()) {
            registry.insert(unit.id(), Arc::clone(unit));
            tracing::debug!(unit = %unit.name(), id = %unit.id(), "unit registered");
        }
    }

    /// Remove `unit` from the domain and tell the debugger it is gone.
    ///
    /// Returns `false` if the unit was not registered.
    pub fn unload_unit(&self, unit: &LoadUnit) -> bool {
        if unit.domain_id() != self.id {
            return false;
        }
        let removed = {
            let _guard = self.load_lock.lock();
            self.registry.write().remove(&unit.id())
        };
        let Some(removed) = removed else {
            return false;
        };

        removed.notify_debugger_unload();
        removed.unregister_from_host();
        tracing::info!(unit = %removed.name(), "unit unloaded");
        true
    }

    /// Registered units, in creation order.
    #[must_use]
    pub fn units(&self) -> Vec<Arc<LoadUnit>> {
        self.registry.read().values().cloned().collect()
    }

    #[must_use]
    pub fn find_unit(&self, name: &str) -> Option<Arc<LoadUnit>> {
        self.registry
            .read()
            .values()
            .find(|unit| unit.name() == name)
            .cloned()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.registry.read().len()
    }

    // =========================================================================
    // LISTENERS
    // =========================================================================

    /// Receive a snapshot of every unit that reaches `Active` from now on.
    pub fn subscribe(&self, listener: Arc<dyn LoadEventListener>) {
        self.listeners.write().push(listener);
    }

    fn deliver_async_events(&self, unit: &LoadUnit) {
        if !unit.is_active() || !unit.latches().test_and_set(ListenerKind::HostLoadEvent) {
            return;
        }
        let snapshot = unit.snapshot();
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.unit_loaded(&snapshot);
        }
    }

    pub(crate) fn record_transition(&self, unit: &LoadUnit, level: LoadLevel) {
        let Some(hook) = &self.scheduling else {
            return;
        };
        if let Err(err) = hook.record_transition(unit, level) {
            tracing::warn!(unit = %unit.name(), %level, error = %err, "scheduling hook failed");
        }
    }

    // =========================================================================
    // DRIVER
    // =========================================================================

    /// Run sub-steps on `unit` until it reaches `target`, fails, or can only
    /// go further by deadlocking.
    pub(crate) fn drive(&self, unit: &Arc<LoadUnit>, target: LoadLevel) -> Result<(), LoaderError> {
        while unit.current_level() < target && !unit.is_error() {
            let _entry = match self.acquire_entry(unit) {
                Entry::Acquired(guard) => guard,
                Entry::Reentrant => break,
                Entry::WouldDeadlock => {
                    tracing::warn!(
                        unit = %unit.name(),
                        level = %unit.current_level(),
                        %target,
                        "stopping early to avoid a load deadlock"
                    );
                    break;
                }
            };

            // Another thread may have progressed the unit while we waited.
            let current = unit.current_level();
            if current >= target || unit.is_error() {
                break;
            }
            let Some(next) = current.next() else {
                break;
            };

            match unit.do_incremental_load(self, next) {
                Ok(true) => {
                    unit.complete_level(next);
                    tracing::debug!(unit = %unit.name(), level = %next, "level completed");
                    if next == LoadLevel::Active {
                        tracing::info!(unit = %unit.name(), "unit active");
                    }
                }
                Ok(false) => break,
                Err(err) => return Err(unit.record_failure(next, err)),
            }
        }

        self.deliver_async_events(unit);
        unit.throw_if_error(target)
    }

    fn acquire_entry(&self, unit: &LoadUnit) -> Entry<'_> {
        let me = thread::current().id();
        let mut entries = self.entries.lock();
        loop {
            match entries.owners.get(&unit.id()) {
                None => {
                    entries.owners.insert(unit.id(), me);
                    return Entry::Acquired(EntryGuard {
                        domain: self,
                        unit: unit.id(),
                    });
                }
                Some(&owner) if owner == me => return Entry::Reentrant,
                Some(_) => {
                    if entries.would_deadlock(me, unit.id()) {
                        return Entry::WouldDeadlock;
                    }
                    entries.waiting.insert(me, unit.id());
                    self.released.wait(&mut entries);
                    entries.waiting.remove(&me);
                }
            }
        }
    }

    /// Check `unit` against `required`, accepting one level short when this
    /// thread cannot progress it further without deadlocking.
    pub(crate) fn check_loading(&self, unit: &LoadUnit, required: LoadLevel) -> bool {
        let current = unit.current_level();
        if current >= required {
            return true;
        }
        if current < required.relaxed() {
            return false;
        }
        let me = thread::current().id();
        let entries = self.entries.lock();
        match entries.owners.get(&unit.id()) {
            Some(&owner) if owner == me => true,
            Some(_) => entries.would_deadlock(me, unit.id()),
            None => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
