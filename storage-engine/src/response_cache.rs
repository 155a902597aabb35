use async_trait::async_trait;
use dashmap::DashMap;
use mookka::network::NetResponse;
use mookka::ports::CacheStorage;
use shared::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

const TREE_PREFIX: &str = "responses:";

/// Named response caches stored as sled trees, one tree per cache.
#[derive(Clone)]
pub struct SledCacheStorage {
    db: sled::Db,
}

impl SledCacheStorage {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    fn tree_name(name: &str) -> String {
        format!("{}{}", TREE_PREFIX, name)
    }

    fn has_cache(&self, name: &str) -> bool {
        let tree_name = Self::tree_name(name);
        self.db
            .tree_names()
            .iter()
            .any(|existing| &existing[..] == tree_name.as_bytes())
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(Self::tree_name(name))
            .map_err(|e| Error::Storage(format!("Failed to open cache '{}': {}", name, e)))
    }

    fn encode(response: &NetResponse) -> Result<Vec<u8>> {
        serde_json::to_vec(response)
            .map_err(|e| Error::Serialization(format!("Failed to serialize response: {}", e)))
    }
}

#[async_trait]
impl CacheStorage for SledCacheStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .iter()
            .filter_map(|name| {
                std::str::from_utf8(name)
                    .ok()
                    .and_then(|name| name.strip_prefix(TREE_PREFIX))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, name: &str) -> Result<bool> {
        self.db
            .drop_tree(Self::tree_name(name))
            .map_err(|e| Error::Storage(format!("Failed to delete cache '{}': {}", name, e)))
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<NetResponse>> {
        // looking up must not create the cache
        if !self.has_cache(name) {
            return Ok(None);
        }

        let value = self
            .tree(name)?
            .get(url.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read '{}': {}", url, e)))?;

        match value {
            Some(bytes) => {
                let response = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Serialization(format!("Failed to deserialize response: {}", e))
                })?;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, url: &str, response: NetResponse) -> Result<()> {
        let tree = self.tree(name)?;
        tree.insert(url.as_bytes(), Self::encode(&response)?)
            .map_err(|e| Error::Storage(format!("Failed to cache '{}': {}", url, e)))?;
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(String, NetResponse)>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (url, response) in &entries {
            batch.insert(url.as_bytes(), Self::encode(response)?);
        }

        let tree = self.tree(name)?;
        tree.apply_batch(batch)
            .map_err(|e| Error::Storage(format!("Failed to write cache '{}': {}", name, e)))?;
        tree.flush()
            .map_err(|e| Error::Storage(format!("Failed to flush cache '{}': {}", name, e)))?;

        debug!("Stored {} responses in '{}'", entries.len(), name);
        Ok(())
    }
}

impl std::fmt::Debug for SledCacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCacheStorage").finish()
    }
}

/// Named response caches held in memory; used when no data directory is usable.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: DashMap<String, HashMap<String, NetResponse>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.iter().map(|cache| cache.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, name: &str) -> Result<bool> {
        Ok(self.caches.remove(name).is_some())
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<NetResponse>> {
        Ok(self
            .caches
            .get(name)
            .and_then(|cache| cache.get(url).cloned()))
    }

    async fn put(&self, name: &str, url: &str, response: NetResponse) -> Result<()> {
        self.caches
            .entry(name.to_string())
            .or_default()
            .insert(url.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(String, NetResponse)>) -> Result<()> {
        // one shard guard for the whole batch
        self.caches
            .entry(name.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }
}
