//! # Descriptor Lifecycle
//!
//! Reacts to version-change events from the external version controller and
//! keeps the [`Engine`] fed with the right schema blob for each namespace.
//!
//! Per namespace an event walks through
//! `Idle -> Checking -> {CacheValid -> Feeding} | {CacheStale -> Downloading -> Feeding} -> Idle`.
//!
//! The local [`DiskCache`] is trusted when its checksum matches the one announced
//! by the event; otherwise the blob is downloaded from [`BlobStorage`] under a
//! timeout. Freshly downloaded blobs are handed to a bounded [`PersistQueue`] so
//! the next process start can skip the download.
//!
//! A failed download or a blob the engine rejects leaves the serving generation
//! untouched.
pub mod cache;
pub mod persist;
pub mod storage;

pub use cache::DiskCache;
pub use persist::{PersistEntry, PersistQueue, PersistStats};
pub use storage::{BlobStorage, FsBlobStorage, HttpBlobStorage, StorageError};

use crate::{
    checksum::Checksum,
    config::LifecycleConfig,
    engine::{Engine, UpdateError},
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Descriptor,
    BusinessConfig,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Descriptor => "descriptor",
            ResourceType::BusinessConfig => "business_config",
        }
    }
}

/// A resource of a namespace moved to a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub namespace: String,
    pub resource_type: ResourceType,
    /// Key of the blob in remote storage.
    pub storage_key: String,
    /// Checksum the blob is expected to have.
    pub checksum: String,
    pub last_time: Option<SystemTime>,
}

impl VersionChange {
    pub fn descriptor(
        namespace: impl Into<String>,
        storage_key: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: ResourceType::Descriptor,
            storage_key: storage_key.into(),
            checksum: checksum.into(),
            last_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedState {
    #[default]
    Idle,
    Checking,
    CacheValid,
    CacheStale,
    Downloading,
    Feeding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The event was malformed or not about a schema blob.
    Ignored,
    /// The local cache was valid. `unchanged` is true when the engine already
    /// served these bytes.
    FedFromCache { unchanged: bool },
    FedFromDownload { unchanged: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Download of '{key}' for namespace '{namespace}' timed out after {timeout:?}")]
    DownloadTimeout {
        namespace: String,
        key: String,
        timeout: Duration,
    },

    #[error("Download of '{key}' for namespace '{namespace}' failed: {source}")]
    Download {
        namespace: String,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("Schema update task for namespace '{0}' did not complete")]
    FeedAborted(String),

    #[error("Failed to read local cache for namespace '{namespace}': {source}")]
    CacheRead {
        namespace: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct DescriptorLifecycle {
    engine: Arc<Engine>,
    storage: Arc<dyn BlobStorage>,
    cache: DiskCache,
    persist: PersistQueue,
    worker: JoinHandle<PersistStats>,
    download_timeout: Duration,
    states: Mutex<HashMap<String, FeedState>>,
}

impl DescriptorLifecycle {
    /// Starts the persistence worker, so it must be called inside a Tokio runtime.
    pub fn new(engine: Arc<Engine>, storage: Arc<dyn BlobStorage>, config: &LifecycleConfig) -> Self {
        let cache = DiskCache::new(&config.cache_dir);
        let (persist, worker) = PersistQueue::spawn(cache.clone(), config);
        Self {
            engine,
            storage,
            cache,
            persist,
            worker,
            download_timeout: config.download_timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    pub fn state(&self, namespace: &str) -> FeedState {
        self.states
            .lock()
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }

    #[tracing::instrument(
        skip_all,
        fields(namespace = %event.namespace, key = %event.storage_key)
    )]
    pub async fn handle(&self, event: &VersionChange) -> Result<FeedOutcome, LifecycleError> {
        if event.resource_type != ResourceType::Descriptor {
            tracing::debug!(
                resource_type = event.resource_type.as_str(),
                "ignoring non-schema resource"
            );
            return Ok(FeedOutcome::Ignored);
        }

        if event.namespace.trim().is_empty() || event.storage_key.trim().is_empty() {
            tracing::warn!("ignoring version change without namespace or storage key");
            return Ok(FeedOutcome::Ignored);
        }

        let result = self.feed(event).await;
        self.set_state(&event.namespace, FeedState::Idle);
        result
    }

    /// Handles events until the sender side closes. Failures are logged and do
    /// not stop the loop.
    pub async fn run(&self, mut events: mpsc::Receiver<VersionChange>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(&event).await {
                tracing::warn!(namespace = %event.namespace, error = %e, "version change failed");
            }
        }
    }

    /// Feeds whatever the disk cache holds for `namespace`, without checking it
    /// against any version. Used at boot, before the version controller reports in.
    pub async fn restore(&self, namespace: &str) -> Result<bool, LifecycleError> {
        let Some(bytes) = self.read_cache(namespace).await? else {
            tracing::debug!(namespace, "nothing cached to restore");
            return Ok(false);
        };

        self.feed_engine(namespace, bytes).await?;
        tracing::info!(namespace, "restored schema from local cache");

        Ok(true)
    }

    /// Stops accepting persistence work and waits for the queued writes.
    pub async fn shutdown(self) -> PersistStats {
        let Self {
            persist, worker, ..
        } = self;
        drop(persist);
        worker.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "persist worker panicked");
            PersistStats::default()
        })
    }

    async fn feed(&self, event: &VersionChange) -> Result<FeedOutcome, LifecycleError> {
        let namespace = event.namespace.as_str();
        self.set_state(namespace, FeedState::Checking);

        let cached = match self.read_cache(namespace).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, "local cache unreadable, treating as stale");
                None
            }
        };

        if let Some(bytes) = cached {
            if Checksum::of(&bytes).matches(&event.checksum) {
                self.set_state(namespace, FeedState::CacheValid);
                tracing::debug!(checksum = %event.checksum, "local cache hit");

                self.set_state(namespace, FeedState::Feeding);
                let unchanged = self.feed_engine(namespace, bytes).await?;
                return Ok(FeedOutcome::FedFromCache { unchanged });
            }
        }

        self.set_state(namespace, FeedState::CacheStale);
        tracing::debug!(checksum = %event.checksum, "local cache miss");

        self.set_state(namespace, FeedState::Downloading);
        let bytes = self.download(event).await?;

        let actual = Checksum::of(&bytes);
        if !actual.matches(&event.checksum) {
            tracing::warn!(
                expected = %event.checksum,
                actual = %actual,
                "downloaded blob does not match the announced checksum"
            );
        }

        self.set_state(namespace, FeedState::Feeding);
        let unchanged = self.feed_engine(namespace, bytes.clone()).await?;

        let entry = PersistEntry {
            namespace: namespace.to_string(),
            resource_type: ResourceType::Descriptor,
            bytes,
        };
        if let Err(e) = self.persist.enqueue(entry).await {
            tracing::warn!(error = %e, "blob not queued for persistence");
        }

        Ok(FeedOutcome::FedFromDownload { unchanged })
    }

    async fn download(&self, event: &VersionChange) -> Result<Bytes, LifecycleError> {
        let download = self.storage.download(&event.storage_key, event.last_time);

        match tokio::time::timeout(self.download_timeout, download).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(source)) => {
                tracing::error!(error = %source, "schema download failed, keeping current generation");
                Err(LifecycleError::Download {
                    namespace: event.namespace.clone(),
                    key: event.storage_key.clone(),
                    source,
                })
            }
            Err(_) => {
                tracing::error!(
                    timeout = ?self.download_timeout,
                    "schema download timed out, keeping current generation"
                );
                Err(LifecycleError::DownloadTimeout {
                    namespace: event.namespace.clone(),
                    key: event.storage_key.clone(),
                    timeout: self.download_timeout,
                })
            }
        }
    }

    /// Schema parsing is CPU bound, so it runs on the blocking pool.
    async fn feed_engine(&self, namespace: &str, bytes: Bytes) -> Result<bool, LifecycleError> {
        let engine = self.engine.clone();
        let ns = namespace.to_string();

        let unchanged = tokio::task::spawn_blocking(move || engine.update(&ns, &bytes))
            .await
            .map_err(|_| LifecycleError::FeedAborted(namespace.to_string()))??;

        Ok(unchanged)
    }

    async fn read_cache(&self, namespace: &str) -> Result<Option<Bytes>, LifecycleError> {
        self.cache
            .read(namespace, ResourceType::Descriptor)
            .await
            .map_err(|source| LifecycleError::CacheRead {
                namespace: namespace.to_string(),
                source,
            })
    }

    fn set_state(&self, namespace: &str, state: FeedState) {
        let mut states = self.states.lock();
        if state == FeedState::Idle {
            states.remove(namespace);
        } else {
            states.insert(namespace.to_string(), state);
        }
    }
}

impl std::fmt::Debug for DescriptorLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorLifecycle")
            .field("cache", &self.cache)
            .field("download_timeout", &self.download_timeout)
            .finish_non_exhaustive()
    }
}
