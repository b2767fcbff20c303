//! Active scenario selection
//!
//! [`ScenarioContext`] holds which scenario the UI is routed to. Switching
//! only swaps the id; caches keep every scenario's state keyed by id, so a
//! switch never discards anything.

use crate::types::{Scenario, ScenarioId};
use parking_lot::Mutex;
use scx_notify::{Listener, Notifier, Subscription};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Key-value client store for the selected scenario id
///
/// Failures are the store's own concern: implementations log and degrade
/// to "nothing stored".
pub trait SelectionStore: Send + Sync {
    /// Persisted id, if any
    fn load(&self) -> Option<ScenarioId>;

    /// Persist `id` (`None` clears)
    fn save(&self, id: Option<&ScenarioId>);
}

/// Process-local selection store
#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    value: Mutex<Option<ScenarioId>>,
}

impl MemorySelectionStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store holding `id`
    #[must_use]
    pub fn with_value(id: impl Into<ScenarioId>) -> Self {
        Self {
            value: Mutex::new(Some(id.into())),
        }
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load(&self) -> Option<ScenarioId> {
        self.value.lock().clone()
    }

    fn save(&self, id: Option<&ScenarioId>) {
        *self.value.lock() = id.cloned();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SelectionDocument {
    active_scenario_id: Option<ScenarioId>,
}

/// Selection store backed by a small JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileSelectionStore {
    path: PathBuf,
}

impl JsonFileSelectionStore {
    /// Store at `path` (created on first save)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectionStore for JsonFileSelectionStore {
    fn load(&self) -> Option<ScenarioId> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read selection");
                return None;
            }
        };

        match serde_json::from_str::<SelectionDocument>(&raw) {
            Ok(doc) => doc.active_scenario_id,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt selection");
                None
            }
        }
    }

    fn save(&self, id: Option<&ScenarioId>) {
        let doc = SelectionDocument {
            active_scenario_id: id.cloned(),
        };
        let json = match serde_json::to_string_pretty(&doc) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode selection");
                return;
            }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create selection dir");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, json) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist selection");
        }
    }
}

/// Holder of the active scenario
///
/// `None` is a valid state meaning "no scenario"; dependents present empty
/// state for it.
pub struct ScenarioContext {
    active: Mutex<Option<Scenario>>,
    /// Last publication version; only advanced with `active` held
    version: AtomicU64,
    notifier: Notifier<(), Option<Scenario>>,
    store: Arc<dyn SelectionStore>,
}

impl ScenarioContext {
    /// Create context with nothing selected
    #[must_use]
    pub fn new(store: Arc<dyn SelectionStore>) -> Self {
        let notifier = Notifier::new();
        notifier.seed((), None);
        Self {
            active: Mutex::new(None),
            version: AtomicU64::new(0),
            notifier,
            store,
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Active scenario
    #[must_use]
    pub fn active(&self) -> Option<Scenario> {
        self.active.lock().clone()
    }

    /// Active scenario id
    #[must_use]
    pub fn active_id(&self) -> Option<ScenarioId> {
        self.active.lock().as_ref().map(|s| s.id.clone())
    }

    /// Route to `scenario` and notify dependents
    ///
    /// Persists the id when it changes. Returns the previous selection.
    pub fn set_active(&self, scenario: Option<Scenario>) -> Option<Scenario> {
        let (previous, version) = {
            let mut active = self.active.lock();
            let previous = std::mem::replace(&mut *active, scenario.clone());
            let next_id = scenario.as_ref().map(|s| &s.id);
            if previous.as_ref().map(|s| &s.id) != next_id {
                // Persisted under the lock so the store follows the last switch.
                self.store.save(next_id);
            }
            (previous, self.next_version())
        };

        let previous_id = previous.as_ref().map(|s| &s.id);
        let next_id = scenario.as_ref().map(|s| &s.id);
        if previous_id != next_id {
            tracing::info!(
                from = ?previous_id.map(ScenarioId::as_str),
                to = ?next_id.map(ScenarioId::as_str),
                "active scenario changed"
            );
        }

        self.notifier.publish_versioned((), version, scenario);
        previous
    }

    /// Rename the active scenario in place
    ///
    /// Returns the renamed scenario, or `None` when nothing is active.
    pub fn rename_active(&self, name: impl Into<String>) -> Option<Scenario> {
        let (renamed, version) = {
            let mut active = self.active.lock();
            let renamed = active.as_ref()?.renamed(name);
            *active = Some(renamed.clone());
            (renamed, self.next_version())
        };
        self.notifier
            .publish_versioned((), version, Some(renamed.clone()));
        Some(renamed)
    }

    /// Re-resolve the persisted id against the live scenario list
    ///
    /// A stale id degrades to no selection and is cleared from the store.
    pub fn restore(&self, live: &[Scenario]) -> Option<Scenario> {
        let Some(stored) = self.store.load() else {
            tracing::debug!("no persisted scenario selection");
            return None;
        };

        match live.iter().find(|s| s.id == stored) {
            Some(scenario) => {
                self.set_active(Some(scenario.clone()));
                Some(scenario.clone())
            }
            None => {
                tracing::warn!(scenario = %stored, "persisted scenario no longer exists");
                self.store.save(None);
                self.set_active(None);
                None
            }
        }
    }

    /// Observe selection changes; replays the current selection
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Option<Scenario>) + Send + Sync + 'static,
    {
        self.notifier.subscribe((), callback)
    }

    /// Channel of selection changes; the current selection comes first
    pub fn listen(&self) -> Listener<Option<Scenario>> {
        self.notifier.listen(())
    }
}

impl std::fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("active", &self.active_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn context() -> (ScenarioContext, Arc<MemorySelectionStore>) {
        let store = Arc::new(MemorySelectionStore::new());
        (ScenarioContext::new(store.clone()), store)
    }

    #[test]
    fn starts_empty_and_replays_none() {
        let (ctx, _) = context();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = ctx.on_change(move |s| sink.lock().unwrap().push(s.clone()));

        assert!(ctx.active().is_none());
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn set_active_persists_and_notifies() {
        let (ctx, store) = context();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = ctx.on_change(move |s| {
            sink.lock().unwrap().push(s.as_ref().map(|s| s.id.to_string()));
        });

        let previous = ctx.set_active(Some(Scenario::base("s1", "Base")));
        assert!(previous.is_none());
        assert_eq!(ctx.active_id(), Some(ScenarioId::new("s1")));
        assert_eq!(store.load(), Some(ScenarioId::new("s1")));

        ctx.set_active(None);
        assert_eq!(store.load(), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("s1".to_string()), None]
        );
    }

    #[test]
    fn late_subscriber_sees_current_selection() {
        let (ctx, _) = context();
        ctx.set_active(Some(Scenario::base("s2", "Other")));

        let seen = Arc::new(StdMutex::new(None));
        let sink = seen.clone();
        let _sub = ctx.on_change(move |s| *sink.lock().unwrap() = s.clone());
        assert_eq!(seen.lock().unwrap().as_ref().unwrap().id.as_str(), "s2");
    }

    #[test]
    fn concurrent_switches_replay_the_final_selection() {
        let (ctx, store) = context();
        let ctx = Arc::new(ctx);

        let switchers: Vec<_> = (0..8)
            .map(|t| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        ctx.set_active(Some(Scenario::base(format!("s{t}-{i}"), "S")));
                    }
                })
            })
            .collect();
        for switcher in switchers {
            switcher.join().unwrap();
        }

        let active = ctx.active_id();
        let seen = Arc::new(StdMutex::new(None));
        let sink = seen.clone();
        let _sub = ctx.on_change(move |s| *sink.lock().unwrap() = s.as_ref().map(|s| s.id.clone()));
        assert_eq!(*seen.lock().unwrap(), active);
        assert_eq!(store.load(), active);
    }

    #[test]
    fn rename_keeps_id() {
        let (ctx, _) = context();
        assert!(ctx.rename_active("nothing").is_none());

        ctx.set_active(Some(Scenario::base("s1", "Base")));
        let renamed = ctx.rename_active("Renamed").unwrap();
        assert_eq!(renamed.id.as_str(), "s1");
        assert_eq!(ctx.active().unwrap().name, "Renamed");
    }

    #[test]
    fn restore_resolves_against_live_list() {
        let store = Arc::new(MemorySelectionStore::with_value("s2"));
        let ctx = ScenarioContext::new(store);
        let live = vec![Scenario::base("s1", "A"), Scenario::base("s2", "B")];

        let restored = ctx.restore(&live).unwrap();
        assert_eq!(restored.name, "B");
        assert_eq!(ctx.active_id(), Some(ScenarioId::new("s2")));
    }

    #[test]
    fn restore_degrades_stale_id() {
        let store = Arc::new(MemorySelectionStore::with_value("gone"));
        let ctx = ScenarioContext::new(store.clone());

        assert!(ctx.restore(&[Scenario::base("s1", "A")]).is_none());
        assert!(ctx.active().is_none());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn json_store_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("selection.json");
        let store = JsonFileSelectionStore::new(&path);

        assert_eq!(store.load(), None);
        store.save(Some(&ScenarioId::new("s7")));
        assert_eq!(store.load(), Some(ScenarioId::new("s7")));

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(store.load(), None);
    }
}
