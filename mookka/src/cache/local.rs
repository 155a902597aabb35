use crate::domain::{CacheEntry, GetOptions, SetOptions};
use crate::ports::PersistentBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::now_ms;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the object store holding cache entries
pub const ENTRIES_STORE: &str = "cache_entries";

/// Best-effort durable cache of JSON-encoded entries.
///
/// Every storage failure is logged and reported to the caller as a miss;
/// this cache is never a correctness boundary.
#[derive(Clone)]
pub struct LocalPersistentCache {
    backend: Option<Arc<dyn PersistentBackend>>,
}

impl LocalPersistentCache {
    pub fn new(backend: Arc<dyn PersistentBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A cache whose backend could not be opened. Every read misses and writes are dropped.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn set<T: Serialize>(&self, key: &str, data: &T, options: SetOptions) {
        let Some(backend) = &self.backend else {
            return;
        };

        let entry = CacheEntry::new(data, options.ttl);
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode cache entry '{}': {}", key, e);
                return;
            }
        };

        if let Err(e) = backend.put(ENTRIES_STORE, bytes, key).await {
            warn!("Failed to persist cache entry '{}': {}", key, e);
        }
    }

    /// `None` when missing, expired, or when a refresh is forced
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: GetOptions) -> Option<T> {
        if options.force_refresh {
            return None;
        }

        let entry = self.peek::<T>(key).await?;
        if entry.is_expired_at(now_ms()) {
            debug!("Persistent entry '{}' expired", key);
            return None;
        }
        Some(entry.data)
    }

    /// Reads the raw entry whether or not it has expired
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let backend = self.backend.as_ref()?;

        let bytes = match backend.get(ENTRIES_STORE, key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read cache entry '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Discarding undecodable cache entry '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(ENTRIES_STORE, key).await {
                warn!("Failed to delete cache entry '{}': {}", key, e);
            }
        }
    }

    pub async fn clear(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.clear(ENTRIES_STORE).await {
                warn!("Failed to clear persistent cache: {}", e);
            }
        }
    }

    pub async fn flush(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.flush().await {
                warn!("Failed to flush persistent cache: {}", e);
            }
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        backend.all_keys(ENTRIES_STORE).await.unwrap_or_else(|e| {
            warn!("Failed to list persistent cache keys: {}", e);
            Vec::new()
        })
    }

    /// Removes entries that have expired and returns how many were removed.
    /// Undecodable entries are removed as well.
    pub async fn clear_expired(&self) -> usize {
        let now = now_ms();
        let mut removed = 0;

        for key in self.keys().await {
            let expired = match self.peek::<serde_json::Value>(&key).await {
                Some(entry) => entry.is_expired_at(now),
                None => true,
            };
            if expired {
                self.delete(&key).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} expired persistent entries", removed);
        }
        removed
    }
}

impl std::fmt::Debug for LocalPersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPersistentCache")
            .field("available", &self.is_available())
            .finish()
    }
}
