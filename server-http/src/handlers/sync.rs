use crate::api::responses::SyncStatusResponse;
use crate::state::AppState;
use axum::{Json, extract::State};

pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse {
        sync_status: state.context.cache().current_status(),
        worker_state: state.network.state(),
        cache_version: state.config.cache_version.clone(),
        watched_tables: state.context.registry().watched_tables(),
    })
}
