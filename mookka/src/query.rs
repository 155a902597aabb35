use crate::cache::{CacheService, CacheSource, Cached};
use crate::domain::{CacheOptions, QueryKey};
use crate::events::EventFilter;
use crate::realtime::{Subscription, SubscriptionRegistry};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

type QueryFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Cache service and subscription registry, shared by every mounted query.
#[derive(Clone, Debug)]
pub struct QueryClient {
    cache: CacheService,
    registry: SubscriptionRegistry,
}

impl QueryClient {
    pub fn new(cache: CacheService, registry: SubscriptionRegistry) -> Self {
        Self { cache, registry }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub cache: CacheOptions,
    /// Skip the cache seed on mount and bypass fresh hits on every read
    pub force_refresh: bool,
    /// Change feed subscriptions held while the query is mounted
    pub watch: Vec<(String, EventFilter)>,
}

impl QueryOptions {
    pub fn watching(mut self, table: impl Into<String>, event: EventFilter) -> Self {
        self.watch.push((table.into(), event));
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

#[derive(Clone, Debug)]
pub enum QueryState<T> {
    Cold,
    /// Seeded from cache, possibly stale
    CacheHit(T),
    Loading,
    Fresh(T),
    Error(Arc<Error>),
    /// Fetch failed, showing the last cached value
    StaleFallback(T),
}

impl<T> QueryState<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            QueryState::CacheHit(data) | QueryState::Fresh(data) | QueryState::StaleFallback(data) => {
                Some(data)
            }
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn label(&self) -> &'static str {
        match self {
            QueryState::Cold => "cold",
            QueryState::CacheHit(_) => "cache_hit",
            QueryState::Loading => "loading",
            QueryState::Fresh(_) => "fresh",
            QueryState::Error(_) => "error",
            QueryState::StaleFallback(_) => "stale_fallback",
        }
    }
}

impl<T> From<Result<Cached<T>>> for QueryState<T> {
    fn from(result: Result<Cached<T>>) -> Self {
        match result {
            Ok(Cached { value, source }) => match source {
                CacheSource::Fresh | CacheSource::Network => QueryState::Fresh(value),
                CacheSource::Stale => QueryState::CacheHit(value),
                CacheSource::Fallback => QueryState::StaleFallback(value),
            },
            Err(e) => QueryState::Error(Arc::new(e)),
        }
    }
}

/// A query bound to one key. Holds its feed subscriptions until dropped.
pub struct CachedQuery<T> {
    key: QueryKey,
    cache_key: String,
    client: QueryClient,
    fetch: QueryFn<T>,
    options: QueryOptions,
    state: watch::Sender<QueryState<T>>,
    // invalidations not yet answered by a successful read
    invalidated: Arc<AtomicU64>,
    subscriptions: Vec<Subscription>,
}

impl<T> CachedQuery<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Subscribes to the watched tables and seeds the state from the persistent cache.
    pub async fn mount<F, Fut>(
        client: &QueryClient,
        key: impl Into<QueryKey>,
        fetch: F,
        options: QueryOptions,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let cache_key = key.cache_key();
        let invalidated = Arc::new(AtomicU64::new(0));

        let subscriptions = options
            .watch
            .iter()
            .map(|(table, event)| {
                let flag = invalidated.clone();
                let cache = client.cache.clone();
                let cache_key = cache_key.clone();
                client.registry.subscribe(table.clone(), *event, move |change| {
                    debug!(
                        "{} on '{}' invalidated query '{}'",
                        change.event_type, change.table, cache_key
                    );
                    flag.fetch_add(1, Ordering::AcqRel);
                    cache.invalidate(&cache_key);
                })
            })
            .collect();

        let (state, _) = watch::channel(QueryState::Cold);
        if !options.force_refresh {
            // expired entries seed too; the next read decides freshness
            if let Some(entry) = client.cache.persistent().peek::<T>(&cache_key).await {
                state.send_replace(QueryState::CacheHit(entry.data));
            }
        }

        Self {
            key,
            cache_key,
            client: client.clone(),
            fetch: Arc::new(move || fetch().boxed()),
            options,
            state,
            invalidated,
            subscriptions,
        }
    }

    pub async fn read(&self) -> QueryState<T> {
        self.state.send_replace(QueryState::Loading);
        let seen = self.invalidated.load(Ordering::Acquire);
        if self.options.force_refresh {
            self.client.cache.invalidate(&self.cache_key);
        }

        let fetch = self.fetch.clone();
        let next = QueryState::from(
            self.client
                .cache
                .get_with_source::<T, _, _>(&self.cache_key, move || fetch(), self.options.cache)
                .await,
        );

        if matches!(next, QueryState::Fresh(_) | QueryState::CacheHit(_)) {
            // only clear what this read answered; later marks stay pending
            let _ = self.invalidated.compare_exchange(
                seen,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        self.state.send_replace(next.clone());
        next
    }
}

impl<T> CachedQuery<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T>
    where
        T: Clone,
    {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.state.subscribe()
    }

    pub fn invalidate(&self) {
        self.invalidated.fetch_add(1, Ordering::AcqRel);
        self.client.cache.invalidate(&self.cache_key);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire) > 0
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl<T> std::fmt::Debug for CachedQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedQuery")
            .field("key", &self.key)
            .field("state", &self.state.borrow().label())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
