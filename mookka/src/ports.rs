#![deny(clippy::all)]

use crate::domain::CacheEntry;
use crate::events::ChangeEvent;
use crate::network::{NetRequest, NetResponse};
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::Result;

// Ports are the pluggable extension points for storage, network and feed implementations

/// Port for the in-session memory cache (e.g. Moka)
/// Expired entries remain readable until `sweep` removes them
#[async_trait]
pub trait CacheStore<V>: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>>;
    async fn put(&self, key: String, entry: CacheEntry<V>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys(&self) -> Result<Vec<String>>;
    /// Remove every entry expired at `now`, returning how many were removed
    async fn sweep(&self, now: u64) -> Result<usize>;
}

/// Port for the durable key/value store behind the local persistent cache (e.g. Sled)
#[async_trait]
pub trait PersistentBackend: Send + Sync + 'static {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, store: &str, value: Vec<u8>, key: &str) -> Result<()>;
    async fn delete(&self, store: &str, key: &str) -> Result<()>;
    async fn clear(&self, store: &str) -> Result<()>;
    async fn all_keys(&self, store: &str) -> Result<Vec<String>>;

    /// Make buffered writes durable. Write-through backends have nothing to do.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub type ChangeStream = BoxStream<'static, Result<ChangeEvent>>;

/// Port for the backend's realtime change feed
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    /// Open a stream of changes for the given tables. The stream ending means disconnect.
    async fn connect(&self, tables: &[String]) -> Result<ChangeStream>;
}

/// Port for plain HTTP fetches against the origin
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Any response, including non-2xx, is `Ok`; only transport failures are errors
    async fn fetch(&self, request: &NetRequest) -> Result<NetResponse>;
}

/// Port for named HTTP response caches
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    async fn cache_names(&self) -> Result<Vec<String>>;
    async fn delete_cache(&self, name: &str) -> Result<bool>;
    async fn match_in(&self, name: &str, url: &str) -> Result<Option<NetResponse>>;
    async fn put(&self, name: &str, url: &str, response: NetResponse) -> Result<()>;

    /// Write all entries into `name`, or none of them
    async fn put_all(&self, name: &str, entries: Vec<(String, NetResponse)>) -> Result<()>;

    /// First match across every named cache
    async fn match_any(&self, url: &str) -> Result<Option<NetResponse>> {
        for name in self.cache_names().await? {
            if let Some(response) = self.match_in(&name, url).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
