//! Workbench - composition root
//!
//! Owns one instance of every cache and the backend handle, and wires the
//! cross-cache flows:
//! 1. Scenario switch → background file list hydration
//! 2. Run script → begin → backend → complete → organize → refresh files
//! 3. Delete artifact → backend delete → remove from every query group
//!
//! `*_active` operations resolve the active scenario first; with nothing
//! selected they log a warning and return `None`.

use crate::backend::Backend;
use crate::config::WorkbenchConfig;
use crate::error::{ExecutionError, FileCacheError, WorkbenchResult};
use crate::execution::{CompletionOutcome, ExecutionCache};
use crate::file_cache::FileCache;
use crate::organizer::ArtifactOrganizer;
use crate::scenario::{JsonFileSelectionStore, MemorySelectionStore, ScenarioContext, SelectionStore};
use crate::types::{
    ExecutionId, ExecutionRecord, ExecutionResult, FileList, Scenario, ScenarioId, StopAck,
};
use chrono::{DateTime, Utc};
use scx_artifact::QueryId;
use std::sync::Arc;

/// Scenario-scoped execution and artifact workbench
pub struct Workbench {
    config: WorkbenchConfig,
    backend: Arc<dyn Backend>,
    scenarios: Arc<ScenarioContext>,
    executions: Arc<ExecutionCache>,
    organizer: Arc<ArtifactOrganizer>,
    files: Arc<FileCache>,
}

impl Workbench {
    /// Assemble a workbench
    ///
    /// # Errors
    /// Returns `WorkbenchError::Config` if `config` fails validation
    pub fn new(
        config: WorkbenchConfig,
        backend: Arc<dyn Backend>,
        store: Arc<dyn SelectionStore>,
    ) -> WorkbenchResult<Self> {
        config.validate()?;

        let scenarios = Arc::new(ScenarioContext::new(store));
        let executions = ExecutionCache::new(config.execution);
        let organizer = Arc::new(ArtifactOrganizer::new());
        let files = Arc::new(FileCache::new(config.file_cache, Arc::clone(&backend)));

        tracing::info!(
            safety_timeout_secs = config.execution.safety_timeout_secs,
            max_cached_scenarios = ?config.file_cache.max_scenarios,
            "workbench ready"
        );

        Ok(Self {
            config,
            backend,
            scenarios,
            executions,
            organizer,
            files,
        })
    }

    /// Assemble a workbench whose selection store follows `config.selection`
    ///
    /// # Errors
    /// Returns `WorkbenchError::Config` if `config` fails validation
    pub fn from_config(config: WorkbenchConfig, backend: Arc<dyn Backend>) -> WorkbenchResult<Self> {
        let store: Arc<dyn SelectionStore> = match &config.selection.store_path {
            Some(path) => Arc::new(JsonFileSelectionStore::new(path)),
            None => Arc::new(MemorySelectionStore::new()),
        };
        Self::new(config, backend, store)
    }

    // -- accessors ---------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn scenarios(&self) -> &Arc<ScenarioContext> {
        &self.scenarios
    }

    #[must_use]
    pub fn executions(&self) -> &Arc<ExecutionCache> {
        &self.executions
    }

    #[must_use]
    pub fn organizer(&self) -> &Arc<ArtifactOrganizer> {
        &self.organizer
    }

    #[must_use]
    pub fn files(&self) -> &Arc<FileCache> {
        &self.files
    }

    /// Currently active scenario
    #[must_use]
    pub fn active_scenario(&self) -> Option<Scenario> {
        self.scenarios.active()
    }

    // -- scenario selection ------------------------------------------------

    /// Route to `scenario`; its file list hydrates in the background
    ///
    /// Nothing cached for other scenarios is touched. Returns the previous
    /// selection.
    pub fn set_active_scenario(&self, scenario: Option<Scenario>) -> Option<Scenario> {
        let next = scenario.as_ref().map(|s| s.id.clone());
        let previous = self.scenarios.set_active(scenario);
        if let Some(id) = next {
            self.spawn_hydrate(id);
        }
        previous
    }

    /// Re-resolve the persisted selection against the backend's scenarios
    ///
    /// # Errors
    /// Returns `WorkbenchError::Backend` if the scenario list cannot be fetched
    pub async fn restore_selection(&self) -> WorkbenchResult<Option<Scenario>> {
        let live = self.backend.list_scenarios().await?;
        let restored = self.scenarios.restore(&live);
        if let Some(scenario) = &restored {
            tracing::info!(scenario = %scenario.id, "selection restored");
            if let Err(e) = self.files.hydrate(&scenario.id).await {
                tracing::warn!(scenario = %scenario.id, error = %e, "hydration after restore failed");
            }
        }
        Ok(restored)
    }

    fn spawn_hydrate(&self, scenario_id: ScenarioId) {
        if self.files.is_cached(&scenario_id) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(scenario = %scenario_id, "no async runtime; file list loads on first read");
            return;
        };
        let files = Arc::clone(&self.files);
        runtime.spawn(async move {
            if let Err(e) = files.hydrate(&scenario_id).await {
                tracing::warn!(scenario = %scenario_id, error = %e, "background hydration failed");
            }
        });
    }

    fn require_active(&self, operation: &'static str) -> Option<ScenarioId> {
        let active = self.scenarios.active_id();
        if active.is_none() {
            tracing::warn!(operation, "no active scenario; ignoring");
        }
        active
    }

    // -- execution ---------------------------------------------------------

    /// Run the script at `path` in `scenario_id` end to end
    ///
    /// Produced files are grouped under `query_text` (the path when
    /// `None`) and the scenario's file list is refreshed. Backend failures
    /// become a terminal record with return code `-1`; they are not
    /// returned as errors.
    ///
    /// # Errors
    /// Returns `ExecutionError::AlreadyRunning` if the scenario is busy
    pub async fn run_script(
        &self,
        scenario_id: &ScenarioId,
        path: &str,
        query_text: Option<&str>,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let execution_id = self.executions.begin_execution(scenario_id, path)?;

        let result = match self.backend.run_script(path).await {
            Ok(output) => ExecutionResult::from_output(output, Utc::now()),
            Err(e) => {
                tracing::warn!(scenario = %scenario_id, error = %e, "script transport failure");
                ExecutionResult::transport_error(&e)
            }
        };
        let outcome =
            self.executions
                .complete_execution_for(scenario_id, execution_id, result.clone());

        if !result.artifacts.is_empty() {
            let filenames = result.artifacts.iter().map(|a| a.filename.clone());
            self.organizer.add_query_files(
                query_text.unwrap_or(path),
                filenames,
                Some(Utc::now()),
                scenario_id,
            );
            if let Err(e) = self.files.refresh(scenario_id).await {
                tracing::warn!(scenario = %scenario_id, error = %e, "file refresh after run failed");
            }
        }

        Ok(self.record_at(scenario_id, outcome, result))
    }

    fn record_at(
        &self,
        scenario_id: &ScenarioId,
        outcome: CompletionOutcome,
        result: ExecutionResult,
    ) -> ExecutionRecord {
        // The scenario may have been cleared in between.
        self.executions
            .history(scenario_id)
            .get(outcome.index())
            .cloned()
            .unwrap_or_else(|| ExecutionRecord::detached(scenario_id.clone(), result, Utc::now()))
    }

    /// [`run_script`](Self::run_script) in the active scenario
    pub async fn run_script_active(
        &self,
        path: &str,
        query_text: Option<&str>,
    ) -> Option<Result<ExecutionRecord, ExecutionError>> {
        let scenario_id = self.require_active("run_script")?;
        Some(self.run_script(&scenario_id, path, query_text).await)
    }

    /// Start an execution in the active scenario; the caller drives the
    /// backend and reports back through
    /// [`complete_active_execution`](Self::complete_active_execution)
    pub fn begin_active_execution(
        &self,
        command: &str,
    ) -> Option<Result<ExecutionId, ExecutionError>> {
        let scenario_id = self.require_active("begin_execution")?;
        Some(self.executions.begin_execution(&scenario_id, command))
    }

    /// Finalize the active scenario's running execution
    ///
    /// Reloads and republishes the scenario's file list when the run
    /// produced files.
    pub async fn complete_active_execution(
        &self,
        result: ExecutionResult,
    ) -> Option<CompletionOutcome> {
        let scenario_id = self.require_active("complete_execution")?;
        let produced = !result.artifacts.is_empty();
        let outcome = self.executions.complete_execution(&scenario_id, result);
        if produced {
            if let Err(e) = self.files.refresh(&scenario_id).await {
                tracing::warn!(scenario = %scenario_id, error = %e, "file refresh after completion failed");
            }
        }
        Some(outcome)
    }

    /// Group files under `query_text` in the active scenario
    pub fn add_query_files_active<I, S>(
        &self,
        query_text: &str,
        filenames: I,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<QueryId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scenario_id = self.require_active("add_query_files")?;
        self.organizer
            .add_query_files(query_text, filenames, timestamp, &scenario_id)
    }

    /// Ask the backend to stop the in-flight run
    ///
    /// The interrupted run still reports its own terminal event.
    ///
    /// # Errors
    /// Returns `WorkbenchError::Backend` if the stop request fails
    pub async fn stop_execution(&self) -> WorkbenchResult<StopAck> {
        let ack = self.backend.stop_execution().await?;
        tracing::info!(message = %ack.message, "stop requested");
        Ok(ack)
    }

    // -- files -------------------------------------------------------------

    /// Delete a produced file and drop it from every query group of the
    /// scenario that references it
    ///
    /// # Errors
    /// Returns `WorkbenchError::FileCache` if the backend delete or the
    /// following reload fails. Query groups are left untouched only when
    /// the delete itself fails.
    pub async fn delete_artifact(
        &self,
        scenario_id: &ScenarioId,
        path: &str,
    ) -> WorkbenchResult<FileList> {
        let reloaded = match self.files.delete_file(scenario_id, path).await {
            Err(e @ FileCacheError::Delete { .. }) => return Err(e.into()),
            other => other,
        };
        self.organizer.remove_file_from_scenario(scenario_id, path);
        Ok(reloaded?)
    }

    // -- housekeeping ------------------------------------------------------

    /// Drop everything cached for `scenario_id`
    pub async fn clear_scenario(&self, scenario_id: &ScenarioId) {
        self.executions.clear_scenario(scenario_id);
        self.organizer.clear_scenario(scenario_id);
        self.files.clear_scenario(scenario_id).await;
    }

    /// Drop everything cached for every scenario
    ///
    /// The active selection is kept.
    pub fn clear_all_data(&self) {
        self.executions.clear_all();
        self.organizer.clear_all();
        self.files.clear_all();
        tracing::info!("all scenario data cleared");
    }
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("config", &self.config)
            .field("scenarios", &self.scenarios)
            .field("executions", &self.executions)
            .field("organizer", &self.organizer)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}
