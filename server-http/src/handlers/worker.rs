use super::{ApiError, api_error, status_for};
use crate::api::responses::WorkerStateResponse;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use mookka::network::WorkerMessage;
use serde_json::Value;
use tracing::info;

pub async fn post_worker_message(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<WorkerStateResponse>, ApiError> {
    let message: WorkerMessage = serde_json::from_value(body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Unsupported worker message: {}", e),
        )
    })?;
    info!("POST: worker message {:?}", message);

    let worker_state = state
        .network
        .post_message(message)
        .await
        .map_err(|e| api_error(status_for(&e), e.to_string()))?;

    Ok(Json(WorkerStateResponse {
        state: worker_state,
    }))
}
