//! Testing utilities for SCX workspace
//!
//! Scripted backend, fixtures and assertions shared by integration tests
//! and the simulator.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use scx_artifact::ArtifactRef;
use scx_core::{
    Backend, BackendError, ExecutionRecord, FileEntry, FileOrigin, FileScope, MemorySelectionStore,
    Scenario, ScenarioId, ScriptOutput, StopAck, Workbench, WorkbenchConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What `run_script` does for a given path
#[derive(Debug, Clone)]
pub enum ScriptBehavior {
    /// Resolve with this output
    Output(ScriptOutput),
    /// Reject with this error
    Fail(BackendError),
    /// Never resolve
    Hang,
}

/// In-memory backend with scripted responses
///
/// Unscripted paths succeed with stdout `"ok"` and no artifacts.
#[derive(Debug, Default)]
pub struct FakeBackend {
    scripts: Mutex<HashMap<String, ScriptBehavior>>,
    files: Mutex<HashMap<ScenarioId, Vec<FileEntry>>>,
    global_files: Mutex<Vec<FileEntry>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    scenarios: Mutex<Vec<Scenario>>,
    list_failure: Mutex<Option<BackendError>>,
    run_calls: AtomicUsize,
    list_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that knows `scenarios`
    #[must_use]
    pub fn with_scenarios(scenarios: Vec<Scenario>) -> Self {
        let backend = Self::new();
        *backend.scenarios.lock() = scenarios;
        backend
    }

    pub fn script(&self, path: &str, behavior: ScriptBehavior) {
        self.scripts.lock().insert(path.to_string(), behavior);
    }

    /// `path` succeeds and reports `artifacts`
    pub fn script_output(&self, path: &str, stdout: &str, artifacts: &[&str]) {
        self.script(path, ScriptBehavior::Output(output_with_artifacts(stdout, artifacts)));
    }

    /// `path` fails with a transport error
    pub fn script_transport_error(&self, path: &str, message: &str) {
        self.script(path, ScriptBehavior::Fail(BackendError::Transport(message.to_string())));
    }

    /// `path` never resolves
    pub fn hang_on(&self, path: &str) {
        self.script(path, ScriptBehavior::Hang);
    }

    /// Add a scenario-scoped file
    pub fn add_file(&self, scenario: &str, name: &str) -> FileEntry {
        let entry = file_entry(name, FileScope::Scenario(ScenarioId::new(scenario)));
        self.files
            .lock()
            .entry(ScenarioId::new(scenario))
            .or_default()
            .push(entry.clone());
        entry
    }

    /// Add a globally visible file
    pub fn add_global_file(&self, name: &str) -> FileEntry {
        let entry = file_entry(name, FileScope::Global);
        self.global_files.lock().push(entry.clone());
        entry
    }

    pub fn set_content(&self, path: &str, content: &[u8]) {
        self.contents.lock().insert(path.to_string(), content.to_vec());
    }

    pub fn set_scenarios(&self, scenarios: Vec<Scenario>) {
        *self.scenarios.lock() = scenarios;
    }

    /// Make `list_files` fail until cleared with `None`
    pub fn fail_listing(&self, error: Option<BackendError>) {
        *self.list_failure.lock() = error;
    }

    #[must_use]
    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn run_script(&self, path: &str) -> Result<ScriptOutput, BackendError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.scripts.lock().get(path).cloned();
        match behavior {
            Some(ScriptBehavior::Output(output)) => Ok(output),
            Some(ScriptBehavior::Fail(error)) => Err(error),
            Some(ScriptBehavior::Hang) => std::future::pending().await,
            None => Ok(output_with_artifacts("ok", &[])),
        }
    }

    async fn stop_execution(&self) -> Result<StopAck, BackendError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StopAck {
            message: "stop requested".to_string(),
        })
    }

    async fn list_files(&self, scenario: &ScenarioId) -> Result<Vec<FileEntry>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_failure.lock().clone() {
            return Err(error);
        }
        let mut files = self.files.lock().get(scenario).cloned().unwrap_or_default();
        files.extend(self.global_files.lock().iter().cloned());
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        self.contents
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    async fn delete_file(&self, path: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut removed = false;
        for list in self.files.lock().values_mut() {
            let before = list.len();
            list.retain(|f| f.path != path && f.name != path);
            removed |= list.len() != before;
        }
        if removed {
            Ok(())
        } else {
            Err(BackendError::NotFound(path.to_string()))
        }
    }

    async fn list_scenarios(&self) -> Result<Vec<Scenario>, BackendError> {
        Ok(self.scenarios.lock().clone())
    }
}

// -- fixtures -------------------------------------------------------------

/// Base scenario named after its id
#[must_use]
pub fn scenario(id: &str) -> Scenario {
    Scenario::base(id, format!("Scenario {id}"))
}

#[must_use]
pub fn file_entry(name: &str, scope: FileScope) -> FileEntry {
    let origin = if ArtifactRef::new(name, Utc::now()).versioned_name().is_versioned() {
        FileOrigin::Generated
    } else {
        FileOrigin::Uploaded
    };
    FileEntry {
        name: name.to_string(),
        path: name.to_string(),
        size_bytes: name.len() as u64,
        modified_at: Utc::now(),
        origin,
        scope,
    }
}

#[must_use]
pub fn output_with_artifacts(stdout: &str, artifacts: &[&str]) -> ScriptOutput {
    ScriptOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        return_code: 0,
        artifacts: artifacts.iter().map(|a| (*a).to_string()).collect(),
    }
}

/// Workbench over `backend` with an in-memory selection store
///
/// # Panics
/// Panics if the default configuration is rejected
#[must_use]
pub fn setup_workbench(backend: Arc<FakeBackend>) -> Workbench {
    setup_workbench_with(WorkbenchConfig::new(), backend)
}

/// # Panics
/// Panics if `config` is rejected
#[must_use]
pub fn setup_workbench_with(config: WorkbenchConfig, backend: Arc<FakeBackend>) -> Workbench {
    Workbench::new(config, backend, Arc::new(MemorySelectionStore::new()))
        .expect("test workbench config is valid")
}

// -- assertions -----------------------------------------------------------

/// Panic unless at most one record is running
///
/// # Panics
/// Panics when two or more records hold the running slot
pub fn assert_single_running(history: &[ExecutionRecord]) {
    let running = history.iter().filter(|r| r.is_running).count();
    assert!(running <= 1, "{running} running records in one scenario");
}
