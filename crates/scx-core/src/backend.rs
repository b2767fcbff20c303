//! Backend collaborator boundary
//!
//! The remote execution/data service is opaque to this crate. Every call
//! must eventually resolve or reject exactly once; the execution cache's
//! safety timer covers the case where `run_script` never does.

use crate::error::BackendError;
use crate::types::{FileEntry, Scenario, ScenarioId, ScriptOutput, StopAck};
use async_trait::async_trait;

/// Remote execution and file service
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute the script at `path`
    async fn run_script(&self, path: &str) -> Result<ScriptOutput, BackendError>;

    /// Ask the backend to stop the in-flight execution
    ///
    /// The interrupted run still reports its own terminal event.
    async fn stop_execution(&self) -> Result<StopAck, BackendError>;

    /// Files visible from `scenario` (scenario-scoped and global)
    async fn list_files(&self, scenario: &ScenarioId) -> Result<Vec<FileEntry>, BackendError>;

    /// Raw content of the file at `path`
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError>;

    /// Delete the file at `path`
    async fn delete_file(&self, path: &str) -> Result<(), BackendError>;

    /// Live scenario list
    async fn list_scenarios(&self) -> Result<Vec<Scenario>, BackendError>;
}
