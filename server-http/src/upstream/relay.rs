use mookka::events::EventFilter;
use mookka::ports::ChangeFeed;
use mookka::realtime::{BroadcastFeed, FeedListener, ReconnectConfig, SubscriptionRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Republishes every change of `tables` from an upstream feed into the local hub.
/// Runs until `cancel` fires; reconnects are handled by the feed listener.
pub fn spawn_relay(
    upstream: Arc<dyn ChangeFeed>,
    tables: Vec<String>,
    hub: BroadcastFeed,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let registry = SubscriptionRegistry::new();
    let subscriptions: Vec<_> = tables
        .iter()
        .map(|table| {
            let hub = hub.clone();
            registry.subscribe(table.clone(), EventFilter::All, move |change| {
                hub.publish(change.clone());
            })
        })
        .collect();

    info!("Relaying upstream changes for {:?}", tables);
    let listener = FeedListener::spawn(upstream, registry, reconnect, cancel);

    tokio::spawn(async move {
        // held for as long as the listener runs
        let _subscriptions = subscriptions;
        if let Err(e) = listener.await {
            error!("Change relay stopped abnormally: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mookka::events::{ChangeEvent, ChangeKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_relay_forwards_watched_tables_only() {
        let upstream = BroadcastFeed::default();
        let hub = BroadcastFeed::default();
        let mut local = hub.receiver();
        let cancel = CancellationToken::new();

        let relay = spawn_relay(
            Arc::new(upstream.clone()),
            vec!["user_media".to_string()],
            hub,
            ReconnectConfig::default(),
            cancel.clone(),
        );

        // wait for the listener to connect
        tokio::time::timeout(Duration::from_secs(2), async {
            while upstream.listeners() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        upstream.publish(ChangeEvent::new("profiles", ChangeKind::Update));
        upstream.publish(ChangeEvent::new("user_media", ChangeKind::Insert));

        let relayed = tokio::time::timeout(Duration::from_secs(2), local.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relayed.table, "user_media");
        assert_eq!(relayed.event_type, ChangeKind::Insert);

        cancel.cancel();
        relay.await.unwrap();
    }
}
