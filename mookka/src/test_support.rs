//! In-memory fakes for the ports, shared by unit tests.

use crate::domain::CacheEntry;
use crate::network::{NetRequest, NetResponse};
use crate::ports::{CacheStorage, CacheStore, Fetcher, PersistentBackend};
use async_trait::async_trait;
use shared::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MapBackend {
    stores: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    flushes: AtomicUsize,
}

impl MapBackend {
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistentBackend for MapBackend {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let stores = self.stores.lock().unwrap();
        Ok(stores.get(store).and_then(|s| s.get(key).cloned()))
    }

    async fn put(&self, store: &str, value: Vec<u8>, key: &str) -> Result<()> {
        let mut stores = self.stores.lock().unwrap();
        stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        let mut stores = self.stores.lock().unwrap();
        if let Some(s) = stores.get_mut(store) {
            s.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, store: &str) -> Result<()> {
        self.stores.lock().unwrap().remove(store);
        Ok(())
    }

    async fn all_keys(&self, store: &str) -> Result<Vec<String>> {
        let stores = self.stores.lock().unwrap();
        Ok(stores
            .get(store)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend whose every operation fails, as when storage cannot be opened
pub struct FailingBackend;

#[async_trait]
impl PersistentBackend for FailingBackend {
    async fn get(&self, _store: &str, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    async fn put(&self, _store: &str, _value: Vec<u8>, _key: &str) -> Result<()> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    async fn delete(&self, _store: &str, _key: &str) -> Result<()> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    async fn clear(&self, _store: &str) -> Result<()> {
        Err(Error::Storage("backend unavailable".to_string()))
    }

    async fn all_keys(&self, _store: &str) -> Result<Vec<String>> {
        Err(Error::Storage("backend unavailable".to_string()))
    }
}

pub struct MapStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for MapStore<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for MapStore<V> {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: String, entry: CacheEntry<V>) -> Result<()> {
        self.entries.lock().unwrap().insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }

    async fn sweep(&self, now: u64) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(before - entries.len())
    }
}

/// Fetcher serving canned responses by url; `offline` makes every fetch fail.
#[derive(Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, NetResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn route(&self, url: &str, response: NetResponse) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| NetResponse::new(404, "not found")))
    }
}

#[derive(Default)]
pub struct MapCacheStorage {
    caches: Mutex<BTreeMap<String, HashMap<String, NetResponse>>>,
}

impl MapCacheStorage {
    pub fn open(&self, name: &str) {
        self.caches
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }
}

#[async_trait]
impl CacheStorage for MapCacheStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        Ok(self.caches.lock().unwrap().keys().cloned().collect())
    }

    async fn delete_cache(&self, name: &str) -> Result<bool> {
        Ok(self.caches.lock().unwrap().remove(name).is_some())
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<NetResponse>> {
        Ok(self
            .caches
            .lock()
            .unwrap()
            .get(name)
            .and_then(|cache| cache.get(url).cloned()))
    }

    async fn put(&self, name: &str, url: &str, response: NetResponse) -> Result<()> {
        self.caches
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(url.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(String, NetResponse)>) -> Result<()> {
        let mut caches = self.caches.lock().unwrap();
        let cache = caches.entry(name.to_string()).or_default();
        cache.extend(entries);
        Ok(())
    }
}
