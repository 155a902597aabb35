use async_trait::async_trait;
use moka::future::Cache;
use mookka::domain::CacheEntry;
use mookka::ports::CacheStore;
use shared::Result;

/// Moka-based session cache.
/// Entries carry their own expiry and stay readable after it until swept, so no moka TTL is set.
pub struct MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<String, CacheEntry<V>>,
}

impl<V> MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an unbounded Moka cache
    pub fn new_unbounded() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// Create a Moka cache evicting past `max_entries`
    pub fn new_bounded(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub fn new(name: &str, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name(name);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: String, entry: CacheEntry<V>) -> Result<()> {
        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.cache.iter().map(|(key, _)| (*key).clone()).collect())
    }

    async fn sweep(&self, now: u64) -> Result<usize> {
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &expired {
            self.cache.invalidate(key).await;
        }
        Ok(expired.len())
    }
}

impl<V> std::fmt::Debug for MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCache")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
