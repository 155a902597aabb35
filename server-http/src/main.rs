use mookka::ports::{ChangeFeed, Fetcher};
use server_http::upstream::{HttpFetcher, SseChangeFeed, spawn_relay};
use server_http::{AppState, build_router};
use shared::config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Mookka edge server...");

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Arc::new(Config::from_env());

    if let Err(e) = run(config).await {
        error!("Server stopped with error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Arc<Config>) -> shared::Result<()> {
    let fetcher = HttpFetcher::new(config.upstream_url.clone())?;
    let upstream: Arc<dyn Fetcher> = Arc::new(fetcher);
    info!("Proxying origin {}", config.upstream_url);

    let state = AppState::new(config.clone(), upstream);

    let feed: Arc<dyn ChangeFeed> = Arc::new(state.changes.clone());
    state
        .context
        .initialize(Some(feed), state.context_settings())
        .await?;

    match state.network.start().await {
        Ok(worker_state) => info!(
            "Network cache {} is {:?}",
            config.cache_version, worker_state
        ),
        Err(e) => warn!("Network cache install failed, proxying without it: {}", e),
    }

    let shutdown = CancellationToken::new();
    let relay = match &config.feed_url {
        Some(url) => {
            let client = reqwest::Client::new();
            let upstream_feed: Arc<dyn ChangeFeed> = Arc::new(SseChangeFeed::new(client, url.clone()));
            let tables = config.watch.iter().map(|rule| rule.table.clone()).collect();
            Some(spawn_relay(
                upstream_feed,
                tables,
                state.changes.clone(),
                state.context_settings().reconnect,
                shutdown.child_token(),
            ))
        }
        None => {
            info!("MOOKKA_FEED_URL not set, only POST /changes feeds invalidation");
            None
        }
    };

    let context = state.context.clone();
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| shared::Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    info!("Mookka edge listening on http://{}", addr);
    info!("Try: curl http://localhost:{}/health", config.http_port);

    // Graceful shutdown handler
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown.cancel();
    if let Some(relay) = relay {
        if let Err(e) = relay.await {
            error!("Change relay task failed: {}", e);
        }
    }
    context.cleanup().await;
    info!("Server shutdown complete");

    served.map_err(|e| shared::Error::Internal(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
