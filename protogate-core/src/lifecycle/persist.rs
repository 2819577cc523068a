//! Bounded background persistence of downloaded blobs.
//!
//! Events never wait on disk writes unless the queue is full, in which case the
//! producer waits for room instead of dropping the entry.
use super::{ResourceType, cache::DiskCache};
use crate::config::LifecycleConfig;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// A blob always gets at least one retry, whatever the configuration says.
const MIN_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct PersistEntry {
    pub namespace: String,
    pub resource_type: ResourceType,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub written: u64,
    pub failed: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("Persistence worker is gone")]
pub struct PersistClosed;

#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistEntry>,
}

impl PersistQueue {
    /// Starts the single writer task. It stops once every queue handle is dropped
    /// and the remaining entries are written.
    pub fn spawn(cache: DiskCache, config: &LifecycleConfig) -> (Self, JoinHandle<PersistStats>) {
        let (tx, rx) = mpsc::channel(config.persist_queue_capacity.max(1));
        let worker = Worker {
            cache,
            attempts: config.persist_attempts.max(MIN_ATTEMPTS),
            backoff: config.persist_retry_backoff,
        };
        (Self { tx }, tokio::spawn(worker.run(rx)))
    }

    pub async fn enqueue(&self, entry: PersistEntry) -> Result<(), PersistClosed> {
        match self.tx.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(entry)) => {
                tracing::debug!(namespace = %entry.namespace, "persist queue full, waiting");
                self.tx.send(entry).await.map_err(|_| PersistClosed)
            }
            Err(TrySendError::Closed(_)) => Err(PersistClosed),
        }
    }
}

struct Worker {
    cache: DiskCache,
    attempts: usize,
    backoff: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<PersistEntry>) -> PersistStats {
        let mut stats = PersistStats::default();
        while let Some(entry) = rx.recv().await {
            if self.write(&entry).await {
                stats.written += 1;
            } else {
                stats.failed += 1;
            }
        }
        tracing::debug!(?stats, "persist worker stopped");
        stats
    }

    async fn write(&self, entry: &PersistEntry) -> bool {
        for attempt in 1..=self.attempts {
            match self
                .cache
                .write(&entry.namespace, entry.resource_type, &entry.bytes)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        namespace = %entry.namespace,
                        resource_type = entry.resource_type.as_str(),
                        bytes = entry.bytes.len(),
                        "persisted blob to local cache"
                    );
                    return true;
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(
                        namespace = %entry.namespace,
                        attempt,
                        error = %e,
                        "failed to persist blob, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        namespace = %entry.namespace,
                        attempts = self.attempts,
                        error = %e,
                        "giving up persisting blob"
                    );
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn entry(namespace: &str, bytes: &'static [u8]) -> PersistEntry {
        PersistEntry {
            namespace: namespace.to_string(),
            resource_type: ResourceType::Descriptor,
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn writes_everything_before_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let config = LifecycleConfig {
            persist_queue_capacity: 1,
            ..Default::default()
        };
        let (queue, worker) = PersistQueue::spawn(cache.clone(), &config);

        for ns in ["a", "b", "c"] {
            queue.enqueue(entry(ns, b"blob")).await.unwrap();
        }
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, PersistStats { written: 3, failed: 0 });
        for ns in ["a", "b", "c"] {
            assert!(cache.read(ns, ResourceType::Descriptor).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be makes every write fail.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let config = LifecycleConfig {
            persist_attempts: 2,
            persist_retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let (queue, worker) = PersistQueue::spawn(DiskCache::new(&blocker), &config);

        queue.enqueue(entry("a", b"blob")).await.unwrap();
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, PersistStats { written: 0, failed: 1 });
    }

    #[tokio::test]
    #[traced_test]
    async fn retries_even_when_configured_for_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("cache");
        std::fs::write(&blocker, b"").unwrap();

        let config = LifecycleConfig {
            persist_attempts: 1,
            persist_retry_backoff: Duration::from_millis(300),
            ..Default::default()
        };
        let cache = DiskCache::new(&blocker);
        let (queue, worker) = PersistQueue::spawn(cache.clone(), &config);

        queue.enqueue(entry("a", b"blob")).await.unwrap();

        // Unblock the cache directory while the worker waits to retry.
        while !logs_contain("failed to persist blob, retrying") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        std::fs::remove_file(&blocker).unwrap();
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, PersistStats { written: 1, failed: 0 });
        assert!(cache.read("a", ResourceType::Descriptor).await.unwrap().is_some());
    }
}
