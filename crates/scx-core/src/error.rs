//! Error types for SCX Core
//!
//! Provides error handling for:
//! - Backend transport failures
//! - Running-slot violations in the execution cache
//! - File cache loads and deletes
//! - Configuration loading

use crate::types::{ExecutionId, ScenarioId};
use std::path::PathBuf;

/// Backend collaborator failures (transport kind)
///
/// Never surfaced to execution callers: the cache records them as a
/// terminal record with return code `-1`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Request could not be delivered or the connection dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend did not answer in time
    #[error("backend timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend refused the request
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Execution cache errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// The scenario's running slot is taken
    #[error("scenario {scenario} already has a running execution ({running})")]
    AlreadyRunning {
        scenario: ScenarioId,
        running: ExecutionId,
    },
}

/// File cache errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileCacheError {
    /// Listing files from the backend failed
    #[error("failed to load files for scenario {scenario}: {source}")]
    Load {
        scenario: ScenarioId,
        #[source]
        source: BackendError,
    },

    /// Deleting a file failed
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: BackendError,
    },

    /// Reading file content failed
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: BackendError,
    },
}

impl FileCacheError {
    /// Create load error for scenario
    pub fn load(scenario: &ScenarioId, source: BackendError) -> Self {
        Self::Load {
            scenario: scenario.clone(),
            source,
        }
    }

    /// Underlying backend error
    #[must_use]
    pub fn backend_error(&self) -> &BackendError {
        match self {
            Self::Load { source, .. } | Self::Delete { source, .. } | Self::Read { source, .. } => {
                source
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Combined workbench error
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("file cache error: {0}")]
    FileCache(#[from] FileCacheError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for workbench operations
pub type WorkbenchResult<T> = Result<T, WorkbenchError>;
