//! SCX Core - Scenario-scoped execution and artifact caches
//!
//! Keeps every scenario's state alive side by side so switching the active
//! scenario never loses anything:
//! - [`ExecutionCache`]: ordered execution history with a single running slot
//!   per scenario and a safety timer for runs that never report back
//! - [`ArtifactOrganizer`]: files grouped by the query that produced them,
//!   presented with only the latest version of each name
//! - [`FileCache`]: lazily loaded per-scenario file lists
//! - [`ScenarioContext`]: the active scenario and its persisted selection
//! - [`Workbench`]: composition root wiring the caches to a [`Backend`]
//!
//! # Example
//!
//! ```rust,ignore
//! use scx_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(backend: Arc<dyn Backend>) -> Result<(), Box<dyn std::error::Error>> {
//! let workbench = Workbench::from_config(WorkbenchConfig::new(), backend)?;
//! workbench.set_active_scenario(Some(Scenario::base("s1", "Baseline")));
//!
//! let record = workbench
//!     .run_script_active("analysis/revenue.py", Some("find revenue"))
//!     .await
//!     .transpose()?;
//! println!("{:?}", record.map(|r| r.return_code));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod backend;
pub mod config;
pub mod error;
pub mod execution;
pub mod file_cache;
pub mod organizer;
pub mod scenario;
pub mod types;
pub mod workbench;

// Re-exports for convenience
pub use backend::Backend;
pub use config::{
    ExecutionConfig, FileCacheConfig, SelectionConfig, WorkbenchConfig, DEFAULT_SAFETY_TIMEOUT_SECS,
};
pub use error::{
    BackendError, ConfigError, ExecutionError, FileCacheError, WorkbenchError, WorkbenchResult,
};
pub use execution::{CompletionOutcome, ExecutionCache, History};
pub use file_cache::FileCache;
pub use organizer::{ArtifactOrganizer, GroupView, MaterializedGroup, QueryGroup};
pub use scenario::{JsonFileSelectionStore, MemorySelectionStore, ScenarioContext, SelectionStore};
pub use types::{
    ExecutionId, ExecutionRecord, ExecutionResult, FileEntry, FileList, FileOrigin, FileScope,
    Scenario, ScenarioId, ScriptOutput, StopAck, ABNORMAL_RETURN_CODE, TIMEOUT_ERROR,
};
pub use workbench::Workbench;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with SCX Core
    pub use crate::{
        ArtifactOrganizer, Backend, BackendError, CompletionOutcome, ExecutionCache,
        ExecutionRecord, ExecutionResult, FileCache, FileList, Scenario, ScenarioId,
        ScriptOutput, Workbench, WorkbenchConfig, WorkbenchError,
    };
    pub use scx_artifact::{ArtifactRef, QueryId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn caches_share_scenario_keys() {
        let executions = ExecutionCache::new(ExecutionConfig::default());
        let organizer = ArtifactOrganizer::new();
        let s1 = ScenarioId::new("s1");

        executions.begin_execution(&s1, "plot.py").unwrap();
        let outcome = executions.complete_execution(
            &s1,
            ExecutionResult::from_output(
                ScriptOutput {
                    artifacts: vec!["out/plot_1700000000_1.png".into()],
                    ..ScriptOutput::default()
                },
                chrono::Utc::now(),
            ),
        );
        assert_eq!(outcome, CompletionOutcome::Replaced { index: 0 });

        let record = executions.history(&s1)[0].clone();
        let names: Vec<String> = record.artifacts.iter().map(|a| a.filename.clone()).collect();
        let id = organizer.add_query_files("plot", names, None, &s1).unwrap();
        assert_eq!(
            organizer.find_query_group_by_file("plot_1700000000_1.png").unwrap().query_id,
            id
        );
    }
}
