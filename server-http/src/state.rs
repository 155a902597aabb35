use mookka::cache::LocalPersistentCache;
use mookka::context::{AppContext, ContextSettings};
use mookka::domain::CacheOptions;
use mookka::events::EventFilter;
use mookka::network::{NetworkCache, NetworkCacheConfig};
use mookka::ports::{CacheStorage, Fetcher};
use mookka::realtime::{BroadcastFeed, ReconnectConfig, Subscription};
use serde_json::Value;
use shared::TtlMs;
use shared::config::Config;
use std::sync::Arc;
use std::time::Duration;
use storage_engine::{MemoryCacheStorage, MokaCache, SledBackend, SledCacheStorage};
use tracing::{debug, info, warn};

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub context: Arc<AppContext>,
    pub network: NetworkCache,
    /// In-process change feed; `/changes` publishes, `/events` and the context listen
    pub changes: BroadcastFeed,
    pub upstream: Arc<dyn Fetcher>,
    pub cache_options: CacheOptions,
    // standing invalidation subscriptions, released with the last clone
    _watches: Arc<Vec<Subscription>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, upstream: Arc<dyn Fetcher>) -> Self {
        // Try to initialize with persistence, fall back to in-memory if it fails
        let (persistent, responses) = match Self::init_with_persistence(&config) {
            Ok(parts) => {
                info!("Persistent caches enabled under {}", config.data_dir);
                parts
            }
            Err(e) => {
                warn!(
                    "Failed to initialize persistence: {}. Running in-memory mode.",
                    e
                );
                let responses: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::new());
                (LocalPersistentCache::disabled(), responses)
            }
        };

        Self::with_storage(config, upstream, persistent, responses)
    }

    pub fn with_storage(
        config: Arc<Config>,
        upstream: Arc<dyn Fetcher>,
        persistent: LocalPersistentCache,
        responses: Arc<dyn CacheStorage>,
    ) -> Self {
        let memory = Arc::new(MokaCache::<Value>::new(
            "session",
            Some(config.memory_entries),
        ));
        let context = Arc::new(AppContext::new(memory, persistent));

        let network = NetworkCache::new(
            NetworkCacheConfig {
                version: config.cache_version.clone(),
                precache: config.precache.clone(),
                api_prefixes: config.api_prefixes.clone(),
                offline_fallback: "/".to_string(),
            },
            upstream.clone(),
            responses,
        );

        let cache_options = CacheOptions {
            max_age: Duration::from_millis(config.max_age_ms),
            stale_while_revalidate: true,
            ttl: TtlMs(config.default_ttl_ms),
        };

        let watches = Arc::new(watch_invalidations(&context, &config));

        Self {
            config,
            context,
            network,
            changes: BroadcastFeed::default(),
            upstream,
            cache_options,
            _watches: watches,
        }
    }

    fn init_with_persistence(
        config: &Config,
    ) -> shared::Result<(LocalPersistentCache, Arc<dyn CacheStorage>)> {
        let path = std::path::Path::new(&config.data_dir).join("mookka.sled");
        let backend = SledBackend::open(path)?;
        let responses: Arc<dyn CacheStorage> = Arc::new(SledCacheStorage::new(backend.db().clone()));

        Ok((LocalPersistentCache::new(Arc::new(backend)), responses))
    }

    pub fn context_settings(&self) -> ContextSettings {
        ContextSettings {
            sweep_interval: Duration::from_secs(self.config.sweep_interval_secs),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// One subscription per watch rule: any change on the table invalidates every
/// cached key under the rule's root.
fn watch_invalidations(context: &AppContext, config: &Config) -> Vec<Subscription> {
    config
        .watch
        .iter()
        .map(|rule| {
            let cache = context.cache().clone();
            let root = rule.key_root.clone();
            context
                .registry()
                .subscribe(rule.table.clone(), EventFilter::All, move |change| {
                    let cache = cache.clone();
                    let root = root.clone();
                    let table = change.table.clone();
                    tokio::spawn(async move {
                        let removed = cache.invalidate_prefix(&root).await;
                        debug!(
                            "Change on '{}' invalidated {} key(s) under '{}'",
                            table, removed, root
                        );
                    });
                })
        })
        .collect()
}
