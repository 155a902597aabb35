use crate::events::ChangeEvent;
use crate::ports::{ChangeFeed, ChangeStream};
use crate::realtime::registry::SubscriptionRegistry;
use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use shared::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exponential backoff applied between change feed connection attempts
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    /// How often a live connection checks for newly watched tables
    pub resync_every: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
            resync_every: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    pub fn next_backoff(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier) as u64;
        next.min(self.max_ms).max(self.initial_ms)
    }

    fn jittered(&self, base_ms: u64) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.jitter_ms)
        };
        Duration::from_millis(base_ms.saturating_add(jitter))
    }
}

enum Disconnect {
    Lost,
    Resync,
    Cancelled,
}

/// Keeps the registry fed from a change feed, reconnecting with backoff.
pub struct FeedListener;

impl FeedListener {
    pub fn spawn(
        feed: Arc<dyn ChangeFeed>,
        registry: SubscriptionRegistry,
        config: ReconnectConfig,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = config.initial_ms;
            // set once a live connection is lost; changes in the gap are unknown
            let mut gap = false;

            loop {
                // every reconnect resubscribes whatever is watched right now
                let tables = registry.watched_tables();

                let connected = tokio::select! {
                    _ = cancel.cancelled() => break,
                    connected = feed.connect(&tables) => connected,
                };

                match connected {
                    Ok(stream) => {
                        info!("Connected to change feed for {} table(s)", tables.len());
                        backoff = config.initial_ms;
                        if std::mem::take(&mut gap) {
                            let notified = registry.resync();
                            info!("Resynced {} subscriber(s) after reconnecting", notified);
                        }

                        match Self::pump(stream, &registry, &tables, &config, &cancel).await {
                            Disconnect::Cancelled => break,
                            Disconnect::Resync => {
                                info!("Watched tables changed, resubscribing");
                                continue;
                            }
                            Disconnect::Lost => {
                                warn!("Change feed disconnected");
                                gap = true;
                            }
                        }
                    }
                    Err(e) => warn!("Failed to connect to change feed: {}", e),
                }

                let delay = config.jittered(backoff);
                debug!("Reconnecting to change feed in {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                backoff = config.next_backoff(backoff);
            }

            info!("Change feed listener stopped");
        })
    }

    async fn pump(
        mut stream: ChangeStream,
        registry: &SubscriptionRegistry,
        tables: &[String],
        config: &ReconnectConfig,
        cancel: &CancellationToken,
    ) -> Disconnect {
        let connected_tables: HashSet<&String> = tables.iter().collect();
        let mut resync = tokio::time::interval(config.resync_every);
        resync.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Disconnect::Cancelled,
                _ = resync.tick() => {
                    let watched = registry.watched_tables();
                    if watched.iter().any(|table| !connected_tables.contains(table)) {
                        return Disconnect::Resync;
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(change)) => {
                        registry.dispatch(&change);
                    }
                    Some(Err(e)) => {
                        warn!("Change feed error: {}", e);
                        return Disconnect::Lost;
                    }
                    None => return Disconnect::Lost,
                },
            }
        }
    }
}

/// In-process change feed over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change, returning the number of connected streams
    pub fn publish(&self, change: ChangeEvent) -> usize {
        match self.sender.send(change) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(change)) => {
                debug!("No listeners for {} on '{}'", change.event_type, change.table);
                0
            }
        }
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Raw receiver, for consumers that want every change unfiltered
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastFeed {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl ChangeFeed for BroadcastFeed {
    async fn connect(&self, tables: &[String]) -> Result<ChangeStream> {
        let tables: HashSet<String> = tables.iter().cloned().collect();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let forwarded = match item {
                Ok(change) if tables.is_empty() || tables.contains(&change.table) => {
                    Some(Ok(change))
                }
                Ok(_) => None,
                // dropped changes end the stream so the listener reconnects and resyncs
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(Error::Network(format!(
                    "change feed lagged by {} events",
                    n
                )))),
            };
            futures::future::ready(forwarded)
        });
        Ok(stream.boxed())
    }
}
