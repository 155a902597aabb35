use crate::api::responses::ChangeAcceptedResponse;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use mookka::events::ChangeEvent;
use tracing::info;

/// Ingest a change into the in-process feed. Invalidation and `/events`
/// streams pick it up from there.
pub async fn ingest_change(
    State(state): State<AppState>,
    Json(change): Json<ChangeEvent>,
) -> (StatusCode, Json<ChangeAcceptedResponse>) {
    info!("POST: {} on '{}'", change.event_type, change.table);

    let delivered = state.changes.publish(change);
    (StatusCode::ACCEPTED, Json(ChangeAcceptedResponse { delivered }))
}
