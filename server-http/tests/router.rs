use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use mookka::cache::LocalPersistentCache;
use mookka::network::{NetRequest, NetResponse, WorkerState};
use mookka::ports::{ChangeFeed, Fetcher};
use serde_json::{Value, json};
use server_http::{AppState, build_router};
use shared::config::Config;
use shared::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use storage_engine::{MemoryCacheStorage, SledBackend};
use tower::ServiceExt;

#[derive(Default)]
struct StubOrigin {
    routes: Mutex<HashMap<String, (u16, String)>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl StubOrigin {
    fn serve(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubOrigin {
    async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        let routes = self.routes.lock().unwrap();
        Ok(match routes.get(request.path()) {
            Some((status, body)) => NetResponse::new(*status, body.clone()),
            None => NetResponse::new(404, "not found"),
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::from_env();
    config.api_base = "api".to_string();
    config.cache_version = "v1".to_string();
    config.precache = vec!["/".to_string(), "/index.html".to_string()];
    config.api_prefixes = vec!["/api/".to_string()];
    config.allowed_origins = vec!["*".to_string()];
    config.watch = shared::config::parse_watch_rules("media:user_media");
    config
}

fn app(origin: Arc<StubOrigin>, persistent: LocalPersistentCache) -> AppState {
    AppState::with_storage(
        Arc::new(test_config()),
        origin,
        persistent,
        Arc::new(MemoryCacheStorage::new()),
    )
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let state = app(Arc::new(StubOrigin::default()), LocalPersistentCache::disabled());
    let (status, body) = send(&build_router(state), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "OK" }));
}

#[tokio::test]
async fn test_query_is_fetched_once_then_served_from_cache() {
    let origin = Arc::new(StubOrigin::default());
    origin.serve("/api/media/film/42", 200, r#"{"title":"Dune"}"#);
    let router = build_router(app(origin.clone(), LocalPersistentCache::disabled()));

    let (status, first) = send(&router, get("/query/media/film/42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["key"], "media:film:42");
    assert_eq!(first["state"], "fresh");
    assert_eq!(first["data"], json!({ "title": "Dune" }));
    assert_eq!(first["sync_status"], "synced");

    let (_, second) = send(&router, get("/query/media/film/42")).await;
    assert_eq!(second["data"], json!({ "title": "Dune" }));
    assert_eq!(origin.calls(), 1);

    let (_, forced) = send(&router, get("/query/media/film/42?refresh=true")).await;
    assert_eq!(forced["state"], "fresh");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_query_errors_map_to_status_codes() {
    let origin = Arc::new(StubOrigin::default());
    origin.serve("/api/broken", 500, "boom");
    let router = build_router(app(origin.clone(), LocalPersistentCache::disabled()));

    let (status, _) = send(&router, get("/query/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, get("/query/broken")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    origin.offline.store(true, Ordering::SeqCst);
    let (status, body) = send(&router, get("/query/anything")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));

    let (_, sync) = send(&router, get("/sync/status")).await;
    assert_eq!(sync["sync_status"], "offline");
}

#[tokio::test]
async fn test_change_invalidates_and_offline_read_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SledBackend::open(dir.path().join("cache.sled")).unwrap();
    let origin = Arc::new(StubOrigin::default());
    origin.serve("/api/media/library", 200, r#"["Dune","Hades"]"#);

    let state = app(origin.clone(), LocalPersistentCache::new(Arc::new(backend)));
    let feed: Arc<dyn ChangeFeed> = Arc::new(state.changes.clone());
    state
        .context
        .initialize(Some(feed), state.context_settings())
        .await
        .unwrap();
    let router = build_router(state.clone());

    send(&router, get("/query/media/library")).await;
    assert_eq!(origin.calls(), 1);

    // the context listener connects asynchronously
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.changes.listeners() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (status, accepted) = send(
        &router,
        post_json(
            "/changes",
            json!({ "table": "user_media", "eventType": "UPDATE", "new": { "id": 1 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(accepted["delivered"].as_u64().unwrap() >= 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.context.cache().is_invalidated("media:library") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    origin.offline.store(true, Ordering::SeqCst);
    let (status, fallback) = send(&router, get("/query/media/library")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback["state"], "stale_fallback");
    assert_eq!(fallback["data"], json!(["Dune", "Hades"]));
    assert_eq!(fallback["sync_status"], "local");
    assert_eq!(origin.calls(), 2);

    state.context.cleanup().await;
}

#[tokio::test]
async fn test_sync_status_reports_worker_and_watched_tables() {
    let origin = Arc::new(StubOrigin::default());
    let state = app(origin, LocalPersistentCache::disabled());
    let (status, body) = send(&build_router(state), get("/sync/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["worker_state"], "parsed");
    assert_eq!(body["cache_version"], "v1");
    assert_eq!(body["watched_tables"], json!(["user_media"]));
}

#[tokio::test]
async fn test_worker_messages() {
    let origin = Arc::new(StubOrigin::default());
    let state = app(origin, LocalPersistentCache::disabled());
    let router = build_router(state);

    let (status, _) = send(&router, post_json("/sw/message", json!({ "type": "CLAIM" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // nothing installed yet
    let (status, _) = send(&router, post_json("/sw/message", json!({ "type": "SKIP_WAITING" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_proxy_serves_shell_from_cache_when_origin_is_down() {
    let origin = Arc::new(StubOrigin::default());
    origin.serve("/", 200, "<html>shell</html>");
    origin.serve("/index.html", 200, "<html>shell</html>");
    origin.serve("/api/me", 200, r#"{"id":1}"#);

    let state = app(origin.clone(), LocalPersistentCache::disabled());
    assert_eq!(state.network.start().await.unwrap(), WorkerState::Activated);
    let router = build_router(state);

    let response = router.clone().oneshot(get("/index.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-mookka-cache"], "cache");

    let response = router.clone().oneshot(get("/api/me")).await.unwrap();
    assert_eq!(response.headers()["x-mookka-cache"], "passthrough");

    origin.offline.store(true, Ordering::SeqCst);
    let navigation = Request::builder()
        .uri("/library/films")
        .header("sec-fetch-mode", "navigate")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(navigation).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-mookka-cache"], "cache");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"<html>shell</html>");

    let (status, _) = send(&router, get("/api/me")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
