//! Core types for SCX
//!
//! Defines the data model shared by every cache:
//! - Scenarios and their identifiers
//! - Execution records and the terminal results that finalize them
//! - Backend script output and file listings

use crate::error::BackendError;
use chrono::{DateTime, Utc};
use scx_artifact::ArtifactRef;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::sync::Arc;
use ulid::Ulid;

/// Scenario identifier (assigned by the backend)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(String);

impl ScenarioId {
    /// Wrap a backend-assigned id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh local id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as `&str`
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScenarioId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScenarioId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ScenarioId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An isolated analysis context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario ID
    pub id: ScenarioId,
    /// Display name
    pub name: String,
    /// Created from an upload rather than branched
    pub is_base_scenario: bool,
    /// Scenario this one was branched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scenario_id: Option<ScenarioId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
}

impl Scenario {
    /// Create a base scenario
    #[must_use]
    pub fn base(id: impl Into<ScenarioId>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            is_base_scenario: true,
            parent_scenario_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Create a scenario branched from `parent`
    #[must_use]
    pub fn branch(id: impl Into<ScenarioId>, name: impl Into<String>, parent: &Scenario) -> Self {
        Self {
            is_base_scenario: false,
            parent_scenario_id: Some(parent.id.clone()),
            ..Self::base(id, name)
        }
    }

    /// Same scenario under a new name
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Unique execution identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Ulid);

impl ExecutionId {
    /// Generate new execution ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Return code recorded for transport failures and timeouts
pub const ABNORMAL_RETURN_CODE: i32 = -1;

/// Error tag recorded when the safety timer finalizes an execution
pub const TIMEOUT_ERROR: &str = "timeout";

/// One execution attempt in a scenario's history
///
/// # Invariants
/// - `return_code` is `None` exactly while `is_running`
/// - at most one record per scenario has `is_running == true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution ID
    pub id: ExecutionId,
    /// Owning scenario
    pub scenario_id: ScenarioId,
    /// Command or script path that was run
    pub command: String,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr (transport errors land here too)
    pub stderr: String,
    /// Exit code, absent while running
    pub return_code: Option<i32>,
    /// Files produced by the run
    pub artifacts: Vec<ArtifactRef>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time, absent while running
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether this record holds the scenario's running slot
    pub is_running: bool,
    /// Terminal error tag (`"timeout"`, transport message, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Placeholder for a run that has just started
    #[must_use]
    pub fn running(scenario_id: ScenarioId, command: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            scenario_id,
            command: command.into(),
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            artifacts: Vec::new(),
            started_at: now,
            finished_at: None,
            is_running: true,
            error: None,
        }
    }

    /// Terminal record for a result that had no running placeholder
    #[must_use]
    pub fn detached(scenario_id: ScenarioId, result: ExecutionResult, now: DateTime<Utc>) -> Self {
        let command = result.command.clone().unwrap_or_default();
        Self::running(scenario_id, command, now).finish(result, now)
    }

    /// Replace this placeholder's outputs with `result`
    ///
    /// Keeps the id and start time so the record stays at its position.
    #[must_use]
    pub fn finish(self, result: ExecutionResult, now: DateTime<Utc>) -> Self {
        Self {
            command: result.command.unwrap_or(self.command),
            stdout: result.stdout,
            stderr: result.stderr,
            return_code: Some(result.return_code),
            artifacts: result.artifacts,
            finished_at: Some(now),
            is_running: false,
            error: result.error,
            ..self
        }
    }

    /// Whether the run finished with exit code 0
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.return_code == Some(0)
    }

    /// Whether the safety timer finalized this record
    #[inline]
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    /// Wall-clock duration, once finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Terminal outcome of one execution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Overrides the placeholder's command when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code
    pub return_code: i32,
    /// Produced files
    pub artifacts: Vec<ArtifactRef>,
    /// Terminal error tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Successful run with the given stdout
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Run that exited with `return_code`
    #[must_use]
    pub fn failure(return_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            return_code,
            ..Self::default()
        }
    }

    /// Backend call failed; the error text goes to stderr
    #[must_use]
    pub fn transport_error(error: &BackendError) -> Self {
        Self {
            stderr: error.to_string(),
            return_code: ABNORMAL_RETURN_CODE,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Safety deadline elapsed before any terminal event
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            stderr: format!("execution did not finish within {}s", after.as_secs()),
            return_code: ABNORMAL_RETURN_CODE,
            error: Some(TIMEOUT_ERROR.to_string()),
            ..Self::default()
        }
    }

    /// Convert backend output, stamping artifact arrival with `now`
    #[must_use]
    pub fn from_output(output: ScriptOutput, now: DateTime<Utc>) -> Self {
        Self {
            command: None,
            stdout: output.stdout,
            stderr: output.stderr,
            return_code: output.return_code,
            artifacts: output
                .artifacts
                .into_iter()
                .map(|path| ArtifactRef::new(path, now))
                .collect(),
            error: None,
        }
    }

    /// With command
    #[inline]
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// With artifacts
    #[inline]
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactRef>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Raw result of `Backend::run_script`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code
    pub return_code: i32,
    /// Paths of produced files
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Acknowledgement of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    /// Backend message
    pub message: String,
}

/// Where a file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOrigin {
    /// Uploaded by the user
    Uploaded,
    /// Produced by an execution
    Generated,
}

/// Visibility of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileScope {
    /// Only visible inside one scenario
    Scenario(ScenarioId),
    /// Visible from every scenario
    Global,
}

/// One known file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Display name
    pub name: String,
    /// Backend path
    pub path: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Uploaded or generated
    pub origin: FileOrigin,
    /// Scenario-scoped or global
    pub scope: FileScope,
}

impl FileEntry {
    /// Whether the file belongs to `scenario` specifically
    #[inline]
    #[must_use]
    pub fn is_scoped_to(&self, scenario: &ScenarioId) -> bool {
        matches!(&self.scope, FileScope::Scenario(id) if id == scenario)
    }

    /// Whether the file is globally visible
    #[inline]
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self.scope, FileScope::Global)
    }
}

/// Immutable snapshot of a scenario's known files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileList(Arc<[FileEntry]>);

impl FileList {
    /// All entries
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[FileEntry] {
        &self.0
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries
    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.0.iter()
    }

    /// Files scoped to `scenario`
    pub fn scenario_files<'a>(
        &'a self,
        scenario: &'a ScenarioId,
    ) -> impl Iterator<Item = &'a FileEntry> + 'a {
        self.0.iter().filter(move |f| f.is_scoped_to(scenario))
    }

    /// Globally visible files
    pub fn global_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.0.iter().filter(|f| f.is_global())
    }

    /// Look up by name or path
    #[must_use]
    pub fn find(&self, name_or_path: &str) -> Option<&FileEntry> {
        self.0
            .iter()
            .find(|f| f.name == name_or_path || f.path == name_or_path)
    }
}

impl Default for FileList {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl From<Vec<FileEntry>> for FileList {
    fn from(entries: Vec<FileEntry>) -> Self {
        Self(Arc::from(entries))
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, scope: FileScope) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: format!("files/{name}"),
            size_bytes: 1,
            modified_at: Utc::now(),
            origin: FileOrigin::Uploaded,
            scope,
        }
    }

    #[test]
    fn branch_links_parent() {
        let base = Scenario::base("s1", "Base");
        let branch = Scenario::branch("s2", "What-if", &base);
        assert!(base.is_base_scenario);
        assert!(!branch.is_base_scenario);
        assert_eq!(branch.parent_scenario_id, Some(base.id.clone()));
    }

    #[test]
    fn renamed_keeps_identity() {
        let base = Scenario::base("s1", "Base");
        let renamed = base.renamed("Q3 plan");
        assert_eq!(renamed.id, base.id);
        assert_eq!(renamed.name, "Q3 plan");
        assert_eq!(renamed.created_at, base.created_at);
    }

    #[test]
    fn finish_keeps_id_and_start() {
        let now = Utc::now();
        let running = ExecutionRecord::running("s1".into(), "run.py", now);
        let done = running
            .clone()
            .finish(ExecutionResult::success("ok"), now + chrono::Duration::seconds(2));

        assert_eq!(done.id, running.id);
        assert_eq!(done.started_at, running.started_at);
        assert_eq!(done.command, "run.py");
        assert_eq!(done.return_code, Some(0));
        assert!(!done.is_running);
        assert!(done.succeeded());
        assert_eq!(done.duration(), Some(chrono::Duration::seconds(2)));
    }

    #[test]
    fn transport_error_goes_to_stderr() {
        let err = BackendError::Transport("connection reset".to_string());
        let result = ExecutionResult::transport_error(&err);
        assert_eq!(result.return_code, ABNORMAL_RETURN_CODE);
        assert!(result.stderr.contains("connection reset"));
    }

    #[test]
    fn timeout_result_is_tagged() {
        let record = ExecutionRecord::detached(
            "s1".into(),
            ExecutionResult::timeout(std::time::Duration::from_secs(65)),
            Utc::now(),
        );
        assert!(record.timed_out());
        assert_eq!(record.return_code, Some(-1));
        assert!(record.stderr.contains("65s"));
    }

    #[test]
    fn from_output_builds_artifact_refs() {
        let output = ScriptOutput {
            stdout: "done".to_string(),
            artifacts: vec!["out/chart_1700000000_1.html".to_string()],
            ..ScriptOutput::default()
        };
        let result = ExecutionResult::from_output(output, Utc::now());
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].filename, "chart_1700000000_1.html");
    }

    #[test]
    fn file_list_separates_scopes() {
        let s1 = ScenarioId::new("s1");
        let list = FileList::from(vec![
            entry("a.csv", FileScope::Scenario(s1.clone())),
            entry("b.csv", FileScope::Global),
            entry("c.csv", FileScope::Scenario(ScenarioId::new("s2"))),
        ]);

        let scoped: Vec<_> = list.scenario_files(&s1).map(|f| f.name.as_str()).collect();
        let global: Vec<_> = list.global_files().map(|f| f.name.as_str()).collect();
        assert_eq!(scoped, vec!["a.csv"]);
        assert_eq!(global, vec!["b.csv"]);
        assert!(list.find("files/b.csv").is_some());
    }
}
