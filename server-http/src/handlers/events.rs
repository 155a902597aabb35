use crate::state::AppState;
use axum::{
    extract::State,
    http::Uri,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use mookka::events::{ChangeEvent, EventFilter};
use std::convert::Infallible;
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

#[derive(Clone, Debug, Default)]
pub struct StreamFilter {
    table: Vec<String>,
    event_type: Vec<EventFilter>,
}

impl StreamFilter {
    /// Parse query string with CSV support for multiple values
    /// Examples: ?table=user_media,collections&type=insert,update
    fn from_query_string(query: &str) -> Self {
        let mut filter = Self::default();

        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let values = value.split(',').map(str::trim).filter(|v| !v.is_empty());
                match key {
                    "table" => filter.table.extend(values.map(str::to_string)),
                    "type" => {
                        for raw in values {
                            match EventFilter::from_str(raw) {
                                Ok(event) => filter.event_type.push(event),
                                Err(e) => warn!("Ignoring event filter: {}", e),
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        filter
    }
}

/// SSE endpoint that streams change events to clients
pub async fn stream_events(
    State(state): State<AppState>,
    uri: Uri,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = uri
        .query()
        .map(StreamFilter::from_query_string)
        .unwrap_or_default();

    tracing::info!(
        "New SSE client connected. Filters: table={:?}, type={:?}",
        filter.table,
        filter.event_type
    );

    let stream = BroadcastStream::new(state.changes.receiver());

    let filtered_stream = stream.filter_map(move |result| {
        let filter_clone = filter.clone();
        async move {
            match result {
                Ok(change) => {
                    let should_send_event = should_send(&change, &filter_clone);
                    tracing::debug!(
                        "Received change: table={}, type={}, should_send={}",
                        change.table,
                        change.event_type,
                        should_send_event
                    );
                    if should_send_event {
                        Some(Ok(to_sse_event(&change)))
                    } else {
                        None
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Ok(Event::default()
                    .event("error")
                    .data(format!("Lagged by {} events", n)))),
            }
        }
    });

    Sse::new(filtered_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Check if a change should be sent based on the filter criteria
fn should_send(change: &ChangeEvent, filter: &StreamFilter) -> bool {
    // Filter by table (only if filter is specified)
    if !filter.table.is_empty() && !filter.table.iter().any(|t| *t == change.table) {
        return false;
    }

    // Filter by event type (only if filter is specified)
    filter.event_type.is_empty()
        || filter
            .event_type
            .iter()
            .any(|event| event.matches(change.event_type))
}

fn to_sse_event(change: &ChangeEvent) -> Event {
    match Event::default().event("change").json_data(change) {
        Ok(event) => event,
        Err(e) => Event::default()
            .event("error")
            .data(format!("Failed to encode change: {}", e)),
    }
}
