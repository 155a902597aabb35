use crate::cache::local::LocalPersistentCache;
use crate::domain::{CacheEntry, CacheOptions, SetOptions, SyncStatus};
use crate::ports::CacheStore;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{Result, TtlMs, now_ms};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a cache service read was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Cached and within `max_age`
    Fresh,
    /// Cached but older than `max_age`; a background revalidation was started
    Stale,
    /// Fetched in the foreground
    Network,
    /// Fetch failed, served the existing cached value
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub source: CacheSource,
}

impl<T> Cached<T> {
    fn new(value: T, source: CacheSource) -> Self {
        Self { value, source }
    }
}

/// Unifies the memory and persistent caches behind a stale-while-revalidate read path.
///
/// Values are stored as JSON; each call site picks its concrete type.
#[derive(Clone)]
pub struct CacheService {
    memory: Arc<dyn CacheStore<Value>>,
    persistent: LocalPersistentCache,
    // keys whose next read must bypass the fresh-hit path, with the mark generation
    invalidated: Arc<DashMap<String, u64>>,
    generation: Arc<AtomicU64>,
    revalidating: Arc<DashSet<String>>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl CacheService {
    pub fn new(memory: Arc<dyn CacheStore<Value>>, persistent: LocalPersistentCache) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            memory,
            persistent,
            invalidated: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            revalidating: Arc::new(DashSet::new()),
            status: Arc::new(status),
        }
    }

    pub fn persistent(&self) -> &LocalPersistentCache {
        &self.persistent
    }

    /// Read-only view of the sync status
    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: SyncStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!("Sync status changed to {}", next);
        }
    }

    pub async fn get<T, F, Fut>(&self, key: &str, fetch: F, options: CacheOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_with_source(key, fetch, options)
            .await
            .map(|cached| cached.value)
    }

    pub async fn get_with_source<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        options: CacheOptions,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let now = now_ms();
        // a mark placed while the fetch is in flight must survive it
        let mark = self.invalidated.get(key).map(|generation| *generation);
        let invalidated = mark.is_some();
        let max_age = options.max_age.as_millis() as u64;

        let cached = match self.lookup::<T>(key).await {
            Some(entry) if !invalidated => {
                if entry.age_at(now) <= max_age {
                    debug!("Fresh hit for '{}'", key);
                    return Ok(Cached::new(entry.data, CacheSource::Fresh));
                }
                if options.stale_while_revalidate {
                    debug!("Stale hit for '{}', revalidating in background", key);
                    self.spawn_revalidation(key, fetch, options.ttl);
                    return Ok(Cached::new(entry.data, CacheSource::Stale));
                }
                Some(entry)
            }
            other => other,
        };

        match fetch().await {
            Ok(value) => {
                if let Some(json) = encode(key, &value) {
                    self.store_json(key, json, options.ttl).await;
                }
                self.invalidated
                    .remove_if(key, |_, generation| Some(*generation) == mark);
                self.set_status(SyncStatus::Synced);
                Ok(Cached::new(value, CacheSource::Network))
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!("Fetch for '{}' failed, serving cached value: {}", key, e);
                    self.set_status(SyncStatus::Local);
                    Ok(Cached::new(entry.data, CacheSource::Fallback))
                }
                None => {
                    if e.is_network() {
                        self.set_status(SyncStatus::Offline);
                    }
                    Err(e)
                }
            },
        }
    }

    fn spawn_revalidation<T, F, Fut>(&self, key: &str, fetch: F, ttl: TtlMs)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.revalidating.insert(key.to_string()) {
            debug!("Revalidation of '{}' already in flight", key);
            return;
        }

        let service = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            match fetch().await {
                Ok(value) => {
                    if let Some(json) = encode(&key, &value) {
                        service.store_json(&key, json, ttl).await;
                    }
                    service.set_status(SyncStatus::Synced);
                    debug!("Revalidated '{}'", key);
                }
                Err(e) => warn!("Background revalidation of '{}' failed: {}", key, e),
            }
            service.revalidating.remove(&key);
        });
    }

    /// Memory first; a memory miss promotes the persistent entry, expired or not
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let entry = match self.memory.get(key).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => None,
            Err(e) => {
                warn!("Memory cache read for '{}' failed: {}", key, e);
                None
            }
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let entry = self.persistent.peek::<Value>(key).await?;
                if let Err(e) = self.memory.put(key.to_string(), entry.clone()).await {
                    warn!("Failed to promote '{}' into memory: {}", key, e);
                }
                entry
            }
        };

        let CacheEntry {
            data,
            timestamp,
            expires_at,
        } = entry;
        match serde_json::from_value::<T>(data) {
            Ok(data) => Some(CacheEntry {
                data,
                timestamp,
                expires_at,
            }),
            Err(e) => {
                warn!("Cached value for '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    async fn store_json(&self, key: &str, json: Value, ttl: TtlMs) {
        self.persistent.set(key, &json, SetOptions { ttl }).await;
        if let Err(e) = self.memory.put(key.to_string(), CacheEntry::new(json, ttl)).await {
            warn!("Memory cache write for '{}' failed: {}", key, e);
        }
    }

    /// Writes a value to both caches. Last write wins.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: TtlMs) {
        if let Some(json) = encode(key, value) {
            self.store_json(key, json, ttl).await;
        }
        self.invalidated.remove(key);
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.memory.delete(key).await {
            warn!("Memory cache delete for '{}' failed: {}", key, e);
        }
        self.persistent.delete(key).await;
        self.invalidated.remove(key);
    }

    /// Marks a key so that the next read refetches instead of serving a fresh hit.
    pub fn invalidate(&self, key: &str) {
        debug!("Invalidated '{}'", key);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.invalidated.insert(key.to_string(), generation);
    }

    pub fn is_invalidated(&self, key: &str) -> bool {
        self.invalidated.contains_key(key)
    }

    /// Invalidates every cached key equal to `prefix` or nested under it (`prefix:...`).
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let nested = format!("{}:", prefix);
        let mut count = 0;
        for key in self.known_keys().await {
            if key == prefix || key.starts_with(&nested) {
                self.invalidate(&key);
                count += 1;
            }
        }
        count
    }

    async fn known_keys(&self) -> HashSet<String> {
        let mut keys: HashSet<String> = self
            .memory
            .keys()
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to list memory cache keys: {}", e);
                Vec::new()
            })
            .into_iter()
            .collect();
        keys.extend(self.persistent.keys().await);
        keys
    }

    /// Drops expired entries from both caches and forgets marks on keys that are gone.
    pub async fn sweep(&self) -> usize {
        let from_memory = self.memory.sweep(now_ms()).await.unwrap_or_else(|e| {
            warn!("Memory cache sweep failed: {}", e);
            0
        });
        let from_disk = self.persistent.clear_expired().await;

        let live = self.known_keys().await;
        self.invalidated.retain(|key, _| live.contains(key));

        from_memory + from_disk
    }

    pub fn spawn_housekeeping(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = service.sweep().await;
                        if removed > 0 {
                            info!("Housekeeping removed {} expired cache entries", removed);
                        }
                    }
                }
            }
            debug!("Cache housekeeping stopped");
        })
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Not caching '{}', value does not serialize: {}", key, e);
            None
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("persistent", &self.persistent)
            .field("status", &self.current_status())
            .finish()
    }
}
