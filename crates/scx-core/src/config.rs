//! Workbench configuration
//!
//! Loaded from TOML; every section and field has a default so an empty
//! document is a valid configuration.
//!
//! ```toml
//! [execution]
//! safety_timeout_secs = 65
//!
//! [file_cache]
//! max_scenarios = 64
//!
//! [selection]
//! store_path = "~/.config/workbench/selection.json"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default safety deadline for a running execution
pub const DEFAULT_SAFETY_TIMEOUT_SECS: u64 = 65;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Execution cache settings
    pub execution: ExecutionConfig,
    /// File cache settings
    pub file_cache: FileCacheConfig,
    /// Persisted selection settings
    pub selection: SelectionConfig,
}

impl WorkbenchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns error if the document does not parse or fails validation
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded workbench config");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.safety_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "execution.safety_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.file_cache.max_scenarios == Some(0) {
            return Err(ConfigError::Invalid(
                "file_cache.max_scenarios must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// With safety timeout
    ///
    /// The deadline is kept in whole seconds; a partial second rounds up,
    /// so any non-zero `timeout` stays valid.
    #[inline]
    #[must_use]
    pub fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.execution.safety_timeout_secs = timeout.as_secs().saturating_add(partial);
        self
    }

    /// With bounded file cache
    #[inline]
    #[must_use]
    pub fn with_max_cached_scenarios(mut self, max: u64) -> Self {
        self.file_cache.max_scenarios = Some(max);
        self
    }

    /// With on-disk selection store
    #[inline]
    #[must_use]
    pub fn with_selection_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.selection.store_path = Some(path.into());
        self
    }
}

/// Execution cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Seconds before a running execution is finalized as timed out
    pub safety_timeout_secs: u64,
}

impl ExecutionConfig {
    /// Safety deadline as a `Duration`
    #[inline]
    #[must_use]
    pub fn safety_timeout(&self) -> Duration {
        Duration::from_secs(self.safety_timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            safety_timeout_secs: DEFAULT_SAFETY_TIMEOUT_SECS,
        }
    }
}

/// File cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCacheConfig {
    /// Maximum scenarios with a cached file list; `None` keeps every list
    pub max_scenarios: Option<u64>,
}

/// Persisted selection settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// JSON file holding the selected scenario id; in-memory when `None`
    pub store_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = WorkbenchConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkbenchConfig::default());
        assert_eq!(config.execution.safety_timeout(), Duration::from_secs(65));
        assert_eq!(config.file_cache.max_scenarios, None);
    }

    #[test]
    fn parses_sections() {
        let config = WorkbenchConfig::from_toml_str(
            r#"
            [execution]
            safety_timeout_secs = 10

            [file_cache]
            max_scenarios = 8

            [selection]
            store_path = "/tmp/selection.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.safety_timeout_secs, 10);
        assert_eq!(config.file_cache.max_scenarios, Some(8));
        assert_eq!(
            config.selection.store_path.as_deref(),
            Some(Path::new("/tmp/selection.json"))
        );
    }

    #[test]
    fn sub_second_timeout_rounds_up() {
        let config = WorkbenchConfig::new().with_safety_timeout(Duration::from_millis(500));
        assert_eq!(config.execution.safety_timeout_secs, 1);
        assert!(config.validate().is_ok());

        let config = WorkbenchConfig::new().with_safety_timeout(Duration::from_millis(2_001));
        assert_eq!(config.execution.safety_timeout_secs, 3);

        let config = WorkbenchConfig::new().with_safety_timeout(Duration::from_secs(30));
        assert_eq!(config.execution.safety_timeout_secs, 30);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = WorkbenchConfig::from_toml_str("[execution]\nsafety_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_types() {
        let err = WorkbenchConfig::from_toml_str("[execution]\nsafety_timeout_secs = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builders() {
        let config = WorkbenchConfig::new()
            .with_safety_timeout(Duration::from_secs(5))
            .with_max_cached_scenarios(3)
            .with_selection_path("sel.json");
        assert_eq!(config.execution.safety_timeout_secs, 5);
        assert_eq!(config.file_cache.max_scenarios, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = WorkbenchConfig::load("/nonexistent/scx.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
