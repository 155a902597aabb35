use crate::cache::{CacheService, LocalPersistentCache};
use crate::ports::{CacheStore, ChangeFeed};
use crate::query::QueryClient;
use crate::realtime::{FeedListener, ReconnectConfig, SubscriptionRegistry};
use serde_json::Value;
use shared::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct ContextSettings {
    pub sweep_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            reconnect: ReconnectConfig::default(),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the cache service, the subscription registry and their background tasks.
pub struct AppContext {
    cache: CacheService,
    registry: SubscriptionRegistry,
    client: QueryClient,
    running: Mutex<Option<Running>>,
}

impl AppContext {
    pub fn new(memory: Arc<dyn CacheStore<Value>>, persistent: LocalPersistentCache) -> Self {
        let cache = CacheService::new(memory, persistent);
        let registry = SubscriptionRegistry::new();
        let client = QueryClient::new(cache.clone(), registry.clone());
        Self {
            cache,
            registry,
            client,
            running: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Sweeps expired entries once, then starts housekeeping and, given a feed, the feed listener.
    pub async fn initialize(
        &self,
        feed: Option<Arc<dyn ChangeFeed>>,
        settings: ContextSettings,
    ) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::InvalidState("context already initialized".to_string()));
        }

        let removed = self.cache.sweep().await;
        info!("Startup sweep removed {} expired cache entries", removed);

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            self.cache
                .spawn_housekeeping(settings.sweep_interval, cancel.child_token()),
        ];

        match feed {
            Some(feed) => tasks.push(FeedListener::spawn(
                feed,
                self.registry.clone(),
                settings.reconnect,
                cancel.child_token(),
            )),
            None => info!("No change feed configured, realtime invalidation disabled"),
        }

        *running = Some(Running { cancel, tasks });
        info!("Context initialized");
        Ok(())
    }

    /// Stops background tasks and flushes the persistent cache. Safe to call when not running.
    pub async fn cleanup(&self) {
        let running = self.running.lock().await.take();
        if let Some(Running { cancel, tasks }) = running {
            cancel.cancel();
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Background task failed during shutdown: {}", e);
                }
            }
        }
        self.cache.persistent().flush().await;
        info!("Context cleaned up");
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .finish()
    }
}
