use crate::network::http::{NetRequest, NetResponse, RequestMode};
use crate::ports::{CacheStorage, Fetcher};
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const CACHE_PREFIX: &str = "mookka-";

#[derive(Clone, Debug)]
pub struct NetworkCacheConfig {
    pub version: String,
    /// Assets fetched and stored at install time
    pub precache: Vec<String>,
    /// Path prefixes that always go straight to the network
    pub api_prefixes: Vec<String>,
    /// Served to navigations when both network and cache miss
    pub offline_fallback: String,
}

impl NetworkCacheConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            precache: vec!["/".to_string(), "/index.html".to_string()],
            api_prefixes: vec!["/api/".to_string()],
            offline_fallback: "/".to_string(),
        }
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}static-{}", CACHE_PREFIX, self.version)
    }

    pub fn runtime_cache_name(&self) -> String {
        format!("{}runtime-{}", CACHE_PREFIX, self.version)
    }

    /// Every cache that belongs to the current generation
    pub fn current_cache_names(&self) -> [String; 2] {
        [self.static_cache_name(), self.runtime_cache_name()]
    }

    fn is_api(&self, request: &NetRequest) -> bool {
        let path = request.path();
        self.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to take over
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Messages posted by pages to the worker
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    SkipWaiting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServedFrom {
    Network,
    Cache,
    Passthrough,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Network => "network",
            ServedFrom::Cache => "cache",
            ServedFrom::Passthrough => "passthrough",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Served {
    pub response: NetResponse,
    pub from: ServedFrom,
}

impl Served {
    fn new(response: NetResponse, from: ServedFrom) -> Self {
        Self { response, from }
    }
}

/// HTTP response cache with the install/activate lifecycle of a service worker.
#[derive(Clone)]
pub struct NetworkCache {
    config: Arc<NetworkCacheConfig>,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn CacheStorage>,
    state: Arc<watch::Sender<WorkerState>>,
}

impl NetworkCache {
    pub fn new(
        config: NetworkCacheConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Parsed);
        Self {
            config: Arc::new(config),
            fetcher,
            storage,
            state: Arc::new(state),
        }
    }

    pub fn config(&self) -> &NetworkCacheConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Worker {} state: {:?} -> {:?}", self.config.version, previous, next);
        }
    }

    /// Fetches the whole precache manifest, then stores it in one write.
    /// Any failed or non-cacheable asset aborts the install and nothing is stored.
    pub async fn install(&self) -> Result<()> {
        let settled = matches!(self.state(), WorkerState::Installed | WorkerState::Activated);
        if !settled {
            self.transition(WorkerState::Installing);
        }

        let mut fetched = Vec::with_capacity(self.config.precache.len());
        for asset in &self.config.precache {
            let reason = match self.fetcher.fetch(&NetRequest::get(asset.clone())).await {
                Ok(response) if response.is_cacheable() => {
                    fetched.push((asset.clone(), response));
                    continue;
                }
                Ok(response) => format!("status {} ({:?})", response.status, response.kind),
                Err(e) => e.to_string(),
            };

            error!("Install of {} aborted on '{}': {}", self.config.version, asset, reason);
            if !settled {
                self.transition(WorkerState::Redundant);
            }
            return Err(Error::InstallFailed {
                asset: asset.clone(),
                reason,
            });
        }

        if let Err(e) = self
            .storage
            .put_all(&self.config.static_cache_name(), fetched)
            .await
        {
            if !settled {
                self.transition(WorkerState::Redundant);
            }
            return Err(e);
        }

        info!(
            "Precached {} asset(s) into {}",
            self.config.precache.len(),
            self.config.static_cache_name()
        );
        if !settled {
            self.transition(WorkerState::Installed);
        }
        Ok(())
    }

    /// Deletes every cache outside the current generation. Returns how many were deleted.
    pub async fn activate(&self) -> Result<usize> {
        let previous = self.state();
        match previous {
            WorkerState::Installed | WorkerState::Activated => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot activate a worker in state {:?}",
                    other
                )));
            }
        }

        self.transition(WorkerState::Activating);
        match self.purge_old_generations().await {
            Ok(deleted) => {
                self.transition(WorkerState::Activated);
                Ok(deleted)
            }
            Err(e) => {
                self.transition(previous);
                Err(e)
            }
        }
    }

    async fn purge_old_generations(&self) -> Result<usize> {
        let keep = self.config.current_cache_names();
        let mut deleted = 0;
        for name in self.storage.cache_names().await? {
            if keep.contains(&name) {
                continue;
            }
            if self.storage.delete_cache(&name).await? {
                info!("Deleted stale cache {}", name);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Installs, then activates right away unless another generation is still live.
    pub async fn start(&self) -> Result<WorkerState> {
        self.install().await?;

        let keep = self.config.current_cache_names();
        let others = self
            .storage
            .cache_names()
            .await?
            .into_iter()
            .filter(|name| !keep.contains(name))
            .count();

        if others == 0 {
            self.activate().await?;
        } else {
            info!(
                "Worker {} installed, waiting for SKIP_WAITING ({} older cache(s) live)",
                self.config.version, others
            );
        }
        Ok(self.state())
    }

    pub async fn post_message(&self, message: WorkerMessage) -> Result<WorkerState> {
        match message {
            WorkerMessage::SkipWaiting => match self.state() {
                WorkerState::Installed => {
                    info!("SKIP_WAITING received, activating {}", self.config.version);
                    self.activate().await?;
                }
                WorkerState::Activated => debug!("SKIP_WAITING ignored, already active"),
                other => {
                    return Err(Error::InvalidState(format!(
                        "no waiting worker to activate (state {:?})",
                        other
                    )));
                }
            },
        }
        Ok(self.state())
    }

    pub async fn handle(&self, request: &NetRequest) -> Result<Served> {
        if self.state() != WorkerState::Activated
            || !request.is_get()
            || self.config.is_api(request)
        {
            let response = self.fetcher.fetch(request).await?;
            return Ok(Served::new(response, ServedFrom::Passthrough));
        }

        match request.mode {
            RequestMode::Navigate => self.network_first(request).await,
            RequestMode::Asset => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &NetRequest) -> Result<Served> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store(&request.url, response.clone()).await;
                }
                Ok(Served::new(response, ServedFrom::Network))
            }
            Err(e) => {
                warn!("Navigation to '{}' failed, trying cache: {}", request.url, e);
                if let Some(cached) = self.lookup(&request.url).await {
                    return Ok(Served::new(cached, ServedFrom::Cache));
                }
                if let Some(shell) = self.lookup(&self.config.offline_fallback).await {
                    return Ok(Served::new(shell, ServedFrom::Cache));
                }
                Err(e)
            }
        }
    }

    async fn cache_first(&self, request: &NetRequest) -> Result<Served> {
        if let Some(cached) = self.lookup(&request.url).await {
            self.spawn_refresh(request.clone());
            return Ok(Served::new(cached, ServedFrom::Cache));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_cacheable() {
            self.store(&request.url, response.clone()).await;
        }
        Ok(Served::new(response, ServedFrom::Network))
    }

    fn spawn_refresh(&self, request: NetRequest) {
        let worker = self.clone();
        tokio::spawn(async move {
            match worker.fetcher.fetch(&request).await {
                Ok(response) if response.is_cacheable() => {
                    worker.store(&request.url, response).await;
                    debug!("Refreshed cached '{}'", request.url);
                }
                Ok(response) => debug!(
                    "Not refreshing '{}', status {} is not cacheable",
                    request.url, response.status
                ),
                Err(e) => debug!("Background refresh of '{}' failed: {}", request.url, e),
            }
        });
    }

    /// Runtime cache first so refreshed copies win over the install-time ones
    async fn lookup(&self, url: &str) -> Option<NetResponse> {
        for name in [self.config.runtime_cache_name(), self.config.static_cache_name()] {
            match self.storage.match_in(&name, url).await {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => warn!("Cache lookup of '{}' in {} failed: {}", url, name, e),
            }
        }
        None
    }

    async fn store(&self, url: &str, response: NetResponse) {
        let name = self.config.runtime_cache_name();
        if let Err(e) = self.storage.put(&name, url, response).await {
            warn!("Failed to cache '{}' in {}: {}", url, name, e);
        }
    }
}

impl std::fmt::Debug for NetworkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCache")
            .field("version", &self.config.version)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::http::ResponseKind;
    use crate::test_support::{MapCacheStorage, StubFetcher};
    use tokio::time::{Duration, sleep};

    struct Harness {
        fetcher: Arc<StubFetcher>,
        storage: Arc<MapCacheStorage>,
        worker: NetworkCache,
    }

    fn harness(version: &str) -> Harness {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.route("/", NetResponse::new(200, "<html>shell</html>"));
        fetcher.route("/index.html", NetResponse::new(200, "<html>index</html>"));
        fetcher.route("/app.js", NetResponse::new(200, "console.log(1)"));

        let storage = Arc::new(MapCacheStorage::default());
        let worker = NetworkCache::new(
            NetworkCacheConfig::new(version),
            fetcher.clone(),
            storage.clone(),
        );
        Harness {
            fetcher,
            storage,
            worker,
        }
    }

    async fn active(version: &str) -> Harness {
        let h = harness(version);
        assert_eq!(h.worker.start().await.unwrap(), WorkerState::Activated);
        h
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let h = harness("v1");
        h.worker.install().await.unwrap();

        assert_eq!(h.worker.state(), WorkerState::Installed);
        let cached = h
            .storage
            .match_in("mookka-static-v1", "/index.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, "<html>index</html>");
    }

    #[tokio::test]
    async fn test_install_aborts_when_an_asset_fails() {
        let h = harness("v1");
        h.fetcher.route("/index.html", NetResponse::new(503, "busy"));

        let err = h.worker.install().await.unwrap_err();

        match err {
            Error::InstallFailed { asset, .. } => assert_eq!(asset, "/index.html"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(h.worker.state(), WorkerState::Redundant);
        assert!(h.storage.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_aborts_when_offline() {
        let h = harness("v1");
        h.fetcher.set_offline(true);

        assert!(matches!(
            h.worker.install().await,
            Err(Error::InstallFailed { .. })
        ));
        assert!(h.storage.match_in("mookka-static-v1", "/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activate_leaves_only_current_generation() {
        let h = harness("v2");
        h.storage.open("mookka-static-v1");
        h.storage.open("mookka-runtime-v1");
        h.storage.open("unrelated");
        h.storage.open("mookka-runtime-v2");

        h.worker.install().await.unwrap();
        let deleted = h.worker.activate().await.unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(
            h.storage.cache_names().await.unwrap(),
            vec!["mookka-runtime-v2".to_string(), "mookka-static-v2".to_string()]
        );

        // idempotent
        assert_eq!(h.worker.activate().await.unwrap(), 0);
        assert_eq!(h.worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let h = harness("v1");
        assert!(matches!(h.worker.activate().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_new_version_waits_until_skip_waiting() {
        let h = harness("v2");
        h.storage.open("mookka-static-v1");

        assert_eq!(h.worker.start().await.unwrap(), WorkerState::Installed);
        assert!(h.storage.cache_names().await.unwrap().contains(&"mookka-static-v1".to_string()));

        let state = h.worker.post_message(WorkerMessage::SkipWaiting).await.unwrap();
        assert_eq!(state, WorkerState::Activated);
        assert!(!h.storage.cache_names().await.unwrap().contains(&"mookka-static-v1".to_string()));
    }

    #[tokio::test]
    async fn test_skip_waiting_message_decodes() {
        let message: WorkerMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(message, WorkerMessage::SkipWaiting);
    }

    #[tokio::test]
    async fn test_requests_pass_through_before_activation() {
        let h = harness("v1");
        let served = h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();

        assert_eq!(served.from, ServedFrom::Passthrough);
        assert!(h.storage.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_requests_are_never_cached() {
        let h = active("v1").await;
        h.fetcher.route("/api/media?id=1", NetResponse::new(200, "[]"));

        let served = h.worker.handle(&NetRequest::get("/api/media?id=1")).await.unwrap();
        assert_eq!(served.from, ServedFrom::Passthrough);
        assert!(h
            .storage
            .match_in("mookka-runtime-v1", "/api/media?id=1")
            .await
            .unwrap()
            .is_none());

        h.fetcher.set_offline(true);
        assert!(h.worker.handle(&NetRequest::get("/api/media?id=1")).await.is_err());
    }

    #[tokio::test]
    async fn test_navigation_is_network_first_with_offline_fallback() {
        let h = active("v1").await;
        h.fetcher.route("/library", NetResponse::new(200, "<html>library v1</html>"));

        let online = h.worker.handle(&NetRequest::navigate("/library")).await.unwrap();
        assert_eq!(online.from, ServedFrom::Network);

        h.fetcher.route("/library", NetResponse::new(200, "<html>library v2</html>"));
        let fresh = h.worker.handle(&NetRequest::navigate("/library")).await.unwrap();
        assert_eq!(fresh.response.body, "<html>library v2</html>");

        h.fetcher.set_offline(true);
        let offline = h.worker.handle(&NetRequest::navigate("/library")).await.unwrap();
        assert_eq!(offline.from, ServedFrom::Cache);
        assert_eq!(offline.response.body, "<html>library v2</html>");

        let shell = h.worker.handle(&NetRequest::navigate("/never-seen")).await.unwrap();
        assert_eq!(shell.response.body, "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_asset_is_cache_first_with_background_refresh() {
        let h = active("v1").await;

        let miss = h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();
        assert_eq!(miss.from, ServedFrom::Network);

        h.fetcher.route("/app.js", NetResponse::new(200, "console.log(2)"));
        let hit = h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();
        assert_eq!(hit.from, ServedFrom::Cache);
        assert_eq!(hit.response.body, "console.log(1)");

        sleep(Duration::from_millis(20)).await;
        let refreshed = h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();
        assert_eq!(refreshed.response.body, "console.log(2)");
    }

    #[tokio::test]
    async fn test_cached_asset_survives_going_offline() {
        let h = active("v1").await;
        h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();

        h.fetcher.set_offline(true);
        let served = h.worker.handle(&NetRequest::get("/app.js")).await.unwrap();
        assert_eq!(served.from, ServedFrom::Cache);

        assert!(h.worker.handle(&NetRequest::get("/missing.css")).await.is_err());
    }

    #[tokio::test]
    async fn test_non_basic_responses_are_not_cached() {
        let h = active("v1").await;
        h.fetcher.route(
            "/cdn/font.woff2",
            NetResponse::new(200, "font").with_kind(ResponseKind::Opaque),
        );

        h.worker.handle(&NetRequest::get("/cdn/font.woff2")).await.unwrap();
        let calls = h.fetcher.calls();
        let again = h.worker.handle(&NetRequest::get("/cdn/font.woff2")).await.unwrap();

        assert_eq!(again.from, ServedFrom::Network);
        assert_eq!(h.fetcher.calls(), calls + 1);
    }
}
