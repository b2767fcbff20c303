//! Per-scenario file lists
//!
//! Lists are loaded lazily from the backend and kept in a `moka` cache keyed
//! by scenario id. Concurrent loads of the same scenario share one backend
//! call. Nothing polls: a list is reloaded only on hydrate, upload, delete,
//! refresh or explicit invalidation.

use crate::backend::Backend;
use crate::config::FileCacheConfig;
use crate::error::FileCacheError;
use crate::types::{FileList, ScenarioId};
use moka::future::Cache;
use scx_notify::{Listener, Notifier, Subscription};
use std::sync::Arc;

/// Lazily loaded file lists for every scenario
pub struct FileCache {
    backend: Arc<dyn Backend>,
    inner: Cache<ScenarioId, FileList>,
    notifier: Notifier<ScenarioId, FileList>,
}

impl FileCache {
    /// Create cache over `backend`
    ///
    /// Unbounded unless `config.max_scenarios` is set.
    #[must_use]
    pub fn new(config: FileCacheConfig, backend: Arc<dyn Backend>) -> Self {
        let inner = match config.max_scenarios {
            Some(max) => Cache::builder().max_capacity(max).build(),
            None => Cache::builder().build(),
        };
        Self {
            backend,
            inner,
            notifier: Notifier::new(),
        }
    }

    /// File list for `scenario_id`, loading it on first use
    ///
    /// # Errors
    /// Returns `FileCacheError::Load` if the backend listing fails; nothing
    /// is cached in that case.
    pub async fn files(&self, scenario_id: &ScenarioId) -> Result<FileList, FileCacheError> {
        let backend = Arc::clone(&self.backend);
        let id = scenario_id.clone();
        let entry = self
            .inner
            .entry(scenario_id.clone())
            .or_try_insert_with(async move {
                backend
                    .list_files(&id)
                    .await
                    .map(FileList::from)
                    .map_err(|e| FileCacheError::load(&id, e))
            })
            .await
            .map_err(|e| {
                tracing::warn!(scenario = %scenario_id, error = %e, "file list load failed");
                (*e).clone()
            })?;

        if entry.is_fresh() {
            let list = entry.into_value();
            tracing::debug!(scenario = %scenario_id, files = list.len(), "file list loaded");
            self.notifier.publish(scenario_id.clone(), list.clone());
            Ok(list)
        } else {
            tracing::trace!(scenario = %scenario_id, "file list cache hit");
            Ok(entry.into_value())
        }
    }

    /// Last published list for `scenario_id`, without loading
    #[must_use]
    pub fn snapshot(&self, scenario_id: &ScenarioId) -> Option<FileList> {
        self.notifier.latest(scenario_id)
    }

    /// Whether a list for `scenario_id` is cached
    #[must_use]
    pub fn is_cached(&self, scenario_id: &ScenarioId) -> bool {
        self.inner.contains_key(scenario_id)
    }

    /// Load `scenario_id`'s list if it is not cached yet
    ///
    /// Called when the scenario becomes active.
    ///
    /// # Errors
    /// Returns `FileCacheError::Load` if the backend listing fails
    pub async fn hydrate(&self, scenario_id: &ScenarioId) -> Result<(), FileCacheError> {
        if self.is_cached(scenario_id) {
            return Ok(());
        }
        tracing::debug!(scenario = %scenario_id, "hydrating file list");
        self.files(scenario_id).await.map(|_| ())
    }

    /// Reload after a file was uploaded to `scenario_id`
    ///
    /// # Errors
    /// Returns `FileCacheError::Load` if the reload fails
    pub async fn record_upload(&self, scenario_id: &ScenarioId) -> Result<FileList, FileCacheError> {
        tracing::info!(scenario = %scenario_id, "upload recorded");
        self.refresh(scenario_id).await
    }

    /// Delete `path` on the backend and reload `scenario_id`'s list
    ///
    /// # Errors
    /// - `FileCacheError::Delete` if the backend rejects the delete
    /// - `FileCacheError::Load` if the reload fails
    pub async fn delete_file(
        &self,
        scenario_id: &ScenarioId,
        path: &str,
    ) -> Result<FileList, FileCacheError> {
        self.backend
            .delete_file(path)
            .await
            .map_err(|source| FileCacheError::Delete {
                path: path.to_string(),
                source,
            })?;
        tracing::info!(scenario = %scenario_id, path, "file deleted");
        self.refresh(scenario_id).await
    }

    /// Drop and reload `scenario_id`'s list
    ///
    /// # Errors
    /// Returns `FileCacheError::Load` if the reload fails
    pub async fn refresh(&self, scenario_id: &ScenarioId) -> Result<FileList, FileCacheError> {
        self.inner.invalidate(scenario_id).await;
        self.files(scenario_id).await
    }

    /// Drop `scenario_id`'s list; the next read reloads it
    pub async fn invalidate(&self, scenario_id: &ScenarioId) {
        self.inner.invalidate(scenario_id).await;
        tracing::debug!(scenario = %scenario_id, "file list invalidated");
    }

    /// Raw content of `path`
    ///
    /// # Errors
    /// Returns `FileCacheError::Read` if the backend read fails
    pub async fn read_content(&self, path: &str) -> Result<Vec<u8>, FileCacheError> {
        self.backend
            .read_file(path)
            .await
            .map_err(|source| FileCacheError::Read {
                path: path.to_string(),
                source,
            })
    }

    /// Observe `scenario_id`'s list; replays the last loaded one
    pub fn subscribe<F>(&self, scenario_id: &ScenarioId, callback: F) -> Subscription
    where
        F: Fn(&FileList) + Send + Sync + 'static,
    {
        self.notifier.subscribe(scenario_id.clone(), callback)
    }

    /// Channel of `scenario_id`'s lists
    pub fn listen(&self, scenario_id: &ScenarioId) -> Listener<FileList> {
        self.notifier.listen(scenario_id.clone())
    }

    /// Forget `scenario_id`'s list and publish an empty one
    pub async fn clear_scenario(&self, scenario_id: &ScenarioId) {
        self.inner.invalidate(scenario_id).await;
        self.notifier.publish(scenario_id.clone(), FileList::default());
        tracing::info!(scenario = %scenario_id, "file list cleared");
    }

    /// Forget every list
    pub fn clear_all(&self) {
        self.inner.invalidate_all();
        for scenario_id in self.notifier.scopes() {
            self.notifier.publish(scenario_id, FileList::default());
        }
        tracing::info!("all file lists cleared");
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("entries", &self.inner.entry_count())
            .finish_non_exhaustive()
    }
}
