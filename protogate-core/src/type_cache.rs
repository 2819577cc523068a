//! # Type Cache
//!
//! Bounded least-recently-used map from `service/method` to a resolved
//! [`MethodHandle`], so hot methods skip the descriptor graph walk.
use crate::controller::MethodHandle;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub struct TypeCache {
    entries: Mutex<LruCache<String, Arc<MethodHandle>>>,
    capacity: NonZeroUsize,
}

impl TypeCache {
    /// A capacity of zero is clamped to one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    /// Looks up a handle, marking it as most recently used on a hit.
    pub fn get(&self, service: &str, method: &str) -> Option<Arc<MethodHandle>> {
        self.entries.lock().get(&cache_key(service, method)).cloned()
    }

    /// Inserts a handle, evicting the least recently used one when full.
    pub fn put(&self, service: &str, method: &str, handle: Arc<MethodHandle>) {
        if let Some((evicted, _)) = self
            .entries
            .lock()
            .push(cache_key(service, method), handle)
            .filter(|(key, _)| *key != cache_key(service, method))
        {
            tracing::trace!(method = %evicted, "evicted method handle");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl std::fmt::Debug for TypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn cache_key(service: &str, method: &str) -> String {
    format!("{service}/{method}")
}
