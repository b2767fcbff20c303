//! Per-scenario execution history
//!
//! [`ExecutionCache`] keeps an ordered log of execution attempts for every
//! scenario and enforces the running-slot invariant: at most one record per
//! scenario has `is_running == true`.
//!
//! # Lifecycle
//!
//! ```text
//! begin_execution ──► [running placeholder] ──┬─► complete_execution ──► terminal (in place)
//!                        │                    └─► safety timer fires ──► terminal "timeout" (in place)
//!                        └── whichever observes is_running first wins; the other is a no-op
//!
//! complete_execution with no running record ──► terminal record appended
//! ```
//!
//! Logs are copy-on-write: every mutation builds a new `Arc<[ExecutionRecord]>`
//! and swaps it in, so a published snapshot never changes afterwards. Each
//! swap is stamped with a publication version while the log lock is held;
//! the notifier drops any snapshot that arrives after a newer one.

use crate::config::ExecutionConfig;
use crate::error::{BackendError, ExecutionError};
use crate::types::{ExecutionId, ExecutionRecord, ExecutionResult, ScenarioId};
use chrono::Utc;
use parking_lot::Mutex;
use scx_notify::{Listener, Notifier, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Immutable snapshot of one scenario's history, in append order
pub type History = Arc<[ExecutionRecord]>;

/// How a terminal result entered the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Replaced the running placeholder at `index`
    Replaced { index: usize },
    /// No matching running record; appended at `index`
    Appended { index: usize },
}

impl CompletionOutcome {
    /// Position of the terminal record in the history
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        match *self {
            Self::Replaced { index } | Self::Appended { index } => index,
        }
    }
}

/// Armed safety timer; aborted when dropped unless disarmed
struct SafetyTimer {
    execution_id: ExecutionId,
    handle: Option<JoinHandle<()>>,
}

impl SafetyTimer {
    /// Release the task without aborting it (used from the task itself)
    fn release(mut self) {
        self.handle.take();
    }
}

impl Drop for SafetyTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct ScenarioLog {
    records: History,
    timer: Option<SafetyTimer>,
}

impl Default for ScenarioLog {
    fn default() -> Self {
        Self {
            records: empty_history(),
            timer: None,
        }
    }
}

impl ScenarioLog {
    fn running_index(&self) -> Option<usize> {
        self.records.iter().rposition(|r| r.is_running)
    }

    fn append(&mut self, record: ExecutionRecord) -> usize {
        let mut next = Vec::with_capacity(self.records.len() + 1);
        next.extend(self.records.iter().cloned());
        next.push(record);
        self.records = Arc::from(next);
        self.records.len() - 1
    }

    fn replace(&mut self, index: usize, record: ExecutionRecord) {
        let mut next: Vec<ExecutionRecord> = self.records.to_vec();
        next[index] = record;
        self.records = Arc::from(next);
    }
}

fn empty_history() -> History {
    Arc::from(Vec::new())
}

/// Execution history for every scenario
///
/// Owned by the composition root and shared by `Arc`. The safety timer
/// holds only a weak reference, so dropping the cache cancels nothing but
/// also finalizes nothing.
pub struct ExecutionCache {
    config: ExecutionConfig,
    logs: Mutex<HashMap<ScenarioId, ScenarioLog>>,
    /// Last publication version; only advanced with `logs` held
    version: AtomicU64,
    notifier: Notifier<ScenarioId, History>,
    this: Weak<ExecutionCache>,
}

impl ExecutionCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            logs: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            notifier: Notifier::new(),
            this: this.clone(),
        })
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Start an execution in `scenario_id`
    ///
    /// Appends a running placeholder, publishes, and arms the safety timer
    /// when called inside a tokio runtime.
    ///
    /// # Errors
    /// - `ExecutionError::AlreadyRunning` if the scenario's running slot is taken
    pub fn begin_execution(
        &self,
        scenario_id: &ScenarioId,
        command: impl Into<String>,
    ) -> Result<ExecutionId, ExecutionError> {
        let record = ExecutionRecord::running(scenario_id.clone(), command, Utc::now());
        let execution_id = record.id;

        let (version, snapshot) = {
            let mut logs = self.logs.lock();
            let log = logs.entry(scenario_id.clone()).or_default();
            if let Some(idx) = log.running_index() {
                return Err(ExecutionError::AlreadyRunning {
                    scenario: scenario_id.clone(),
                    running: log.records[idx].id,
                });
            }
            log.append(record);
            log.timer = self.arm_timer(scenario_id, execution_id);
            (self.next_version(), log.records.clone())
        };

        tracing::info!(scenario = %scenario_id, execution = %execution_id, "execution started");
        self.notifier
            .publish_versioned(scenario_id.clone(), version, snapshot);
        Ok(execution_id)
    }

    fn arm_timer(&self, scenario_id: &ScenarioId, execution_id: ExecutionId) -> Option<SafetyTimer> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(
                    scenario = %scenario_id,
                    execution = %execution_id,
                    "no async runtime; safety timer not armed"
                );
                return None;
            }
        };

        let cache = self.this.clone();
        let scenario = scenario_id.clone();
        let deadline = self.config.safety_timeout();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(cache) = cache.upgrade() {
                cache.expire(&scenario, execution_id);
            }
        });

        Some(SafetyTimer {
            execution_id,
            handle: Some(handle),
        })
    }

    /// Finalize whatever is running in `scenario_id` with `result`
    ///
    /// Replaces the running record in place. With nothing running the
    /// result is appended; completions are never dropped.
    pub fn complete_execution(
        &self,
        scenario_id: &ScenarioId,
        result: ExecutionResult,
    ) -> CompletionOutcome {
        self.finalize(scenario_id, None, result)
    }

    /// Finalize `execution_id` specifically
    ///
    /// Same as [`complete_execution`](Self::complete_execution) but only
    /// replaces the running record if it is `execution_id`. A late result
    /// for a run that already timed out, or that was superseded by a newer
    /// run, is appended instead of finalizing someone else's slot.
    pub fn complete_execution_for(
        &self,
        scenario_id: &ScenarioId,
        execution_id: ExecutionId,
        result: ExecutionResult,
    ) -> CompletionOutcome {
        self.finalize(scenario_id, Some(execution_id), result)
    }

    /// Record a backend transport failure as a terminal result
    pub fn fail_execution(
        &self,
        scenario_id: &ScenarioId,
        execution_id: Option<ExecutionId>,
        error: &BackendError,
    ) -> CompletionOutcome {
        tracing::warn!(scenario = %scenario_id, error = %error, "execution transport failure");
        self.finalize(scenario_id, execution_id, ExecutionResult::transport_error(error))
    }

    fn finalize(
        &self,
        scenario_id: &ScenarioId,
        execution_id: Option<ExecutionId>,
        result: ExecutionResult,
    ) -> CompletionOutcome {
        let now = Utc::now();
        let (outcome, version, snapshot) = {
            let mut logs = self.logs.lock();
            let log = logs.entry(scenario_id.clone()).or_default();

            let target = log
                .running_index()
                .filter(|&idx| execution_id.map_or(true, |id| log.records[idx].id == id));

            let outcome = match target {
                Some(index) => {
                    let finished = log.records[index].clone().finish(result, now);
                    log.replace(index, finished);
                    // Dropping the timer aborts it.
                    log.timer = None;
                    CompletionOutcome::Replaced { index }
                }
                None => {
                    let record = ExecutionRecord::detached(scenario_id.clone(), result, now);
                    CompletionOutcome::Appended {
                        index: log.append(record),
                    }
                }
            };
            (outcome, self.next_version(), log.records.clone())
        };

        match outcome {
            CompletionOutcome::Replaced { index } => {
                tracing::info!(scenario = %scenario_id, index, "execution completed");
            }
            CompletionOutcome::Appended { index } => {
                tracing::warn!(
                    scenario = %scenario_id,
                    execution = ?execution_id,
                    index,
                    "completion without matching running record; appended"
                );
            }
        }
        self.notifier
            .publish_versioned(scenario_id.clone(), version, snapshot);
        outcome
    }

    /// Finalize `execution_id` as timed out if it still holds the running slot
    ///
    /// Called by the safety timer; also usable by hosts that track deadlines
    /// themselves. Returns `true` if the record was finalized.
    pub fn expire(&self, scenario_id: &ScenarioId, execution_id: ExecutionId) -> bool {
        let (version, snapshot) = {
            let mut logs = self.logs.lock();
            let Some(log) = logs.get_mut(scenario_id) else {
                return false;
            };
            let Some(index) = log
                .running_index()
                .filter(|&idx| log.records[idx].id == execution_id)
            else {
                tracing::debug!(
                    scenario = %scenario_id,
                    execution = %execution_id,
                    "safety timer fired after completion; ignoring"
                );
                return false;
            };

            let result = ExecutionResult::timeout(self.config.safety_timeout());
            let finished = log.records[index].clone().finish(result, Utc::now());
            log.replace(index, finished);
            if let Some(timer) = log.timer.take() {
                if timer.execution_id == execution_id {
                    timer.release();
                }
            }
            (self.next_version(), log.records.clone())
        };

        tracing::warn!(
            scenario = %scenario_id,
            execution = %execution_id,
            timeout_secs = self.config.safety_timeout_secs,
            "execution timed out; finalized by safety timer"
        );
        self.notifier
            .publish_versioned(scenario_id.clone(), version, snapshot);
        true
    }

    /// History snapshot for `scenario_id` (empty if never touched)
    #[must_use]
    pub fn history(&self, scenario_id: &ScenarioId) -> History {
        self.logs
            .lock()
            .get(scenario_id)
            .map_or_else(empty_history, |log| log.records.clone())
    }

    /// The running record, if any
    #[must_use]
    pub fn running(&self, scenario_id: &ScenarioId) -> Option<ExecutionRecord> {
        let logs = self.logs.lock();
        let log = logs.get(scenario_id)?;
        log.running_index().map(|idx| log.records[idx].clone())
    }

    /// Whether `scenario_id`'s running slot is taken
    #[must_use]
    pub fn is_running(&self, scenario_id: &ScenarioId) -> bool {
        self.running(scenario_id).is_some()
    }

    /// Scenarios with a history in memory
    #[must_use]
    pub fn scenarios(&self) -> Vec<ScenarioId> {
        self.logs.lock().keys().cloned().collect()
    }

    /// Observe `scenario_id`'s history; replays the current snapshot
    pub fn subscribe<F>(&self, scenario_id: &ScenarioId, callback: F) -> Subscription
    where
        F: Fn(&History) + Send + Sync + 'static,
    {
        self.notifier
            .seed(scenario_id.clone(), self.history(scenario_id));
        self.notifier.subscribe(scenario_id.clone(), callback)
    }

    /// Channel of `scenario_id`'s history snapshots
    pub fn listen(&self, scenario_id: &ScenarioId) -> Listener<History> {
        self.notifier
            .seed(scenario_id.clone(), self.history(scenario_id));
        self.notifier.listen(scenario_id.clone())
    }

    /// Drop `scenario_id`'s history and disarm its timer
    pub fn clear_scenario(&self, scenario_id: &ScenarioId) {
        let (removed, version) = {
            let mut logs = self.logs.lock();
            (logs.remove(scenario_id), self.next_version())
        };
        if removed.is_some() {
            tracing::info!(scenario = %scenario_id, "execution history cleared");
        }
        self.notifier
            .publish_versioned(scenario_id.clone(), version, empty_history());
    }

    /// Drop every scenario's history
    pub fn clear_all(&self) {
        let (removed, version) = {
            let mut logs = self.logs.lock();
            let removed: Vec<ScenarioId> = logs.drain().map(|(id, _)| id).collect();
            (removed, self.next_version())
        };
        tracing::info!(scenarios = removed.len(), "all execution history cleared");
        for scenario_id in self.notifier.scopes() {
            self.notifier
                .publish_versioned(scenario_id, version, empty_history());
        }
    }
}

impl std::fmt::Debug for ExecutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCache")
            .field("config", &self.config)
            .field("scenarios", &self.logs.lock().len())
            .finish_non_exhaustive()
    }
}
