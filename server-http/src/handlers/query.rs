use super::{ApiError, api_error, status_for};
use crate::api::requests::QueryParams;
use crate::api::responses::QueryResponse;
use crate::state::AppState;
use crate::upstream::fetch_json;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use mookka::domain::QueryKey;
use mookka::query::{CachedQuery, QueryOptions, QueryState};
use serde_json::Value;
use tracing::{info, warn};

/// Cached read of `{api_base}/{key}` from the origin.
/// Served from the caches when fresh, revalidated in the background when stale,
/// and from the last stored copy when the origin is unreachable.
pub async fn get_query(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>, ApiError> {
    info!("GET: query {}", raw_key);

    let key = QueryKey::from_path(&raw_key);
    if key.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Query key must not be empty"));
    }

    let mut options = QueryOptions {
        cache: state.cache_options,
        ..Default::default()
    };
    if params.refresh {
        options = options.force_refresh();
    }

    let upstream = state.upstream.clone();
    let path = upstream_path(&state.config.api_base, &key);
    let query = CachedQuery::<Value>::mount(
        state.context.client(),
        key.clone(),
        move || {
            let upstream = upstream.clone();
            let path = path.clone();
            async move { fetch_json(upstream.as_ref(), &path).await }
        },
        options,
    )
    .await;

    match query.read().await {
        QueryState::Error(e) => {
            warn!("Query '{}' failed: {}", key, e);
            Err(api_error(status_for(&e), e.to_string()))
        }
        outcome => Ok(Json(QueryResponse {
            key: key.cache_key(),
            state: outcome.label(),
            data: outcome.data().cloned().unwrap_or(Value::Null),
            sync_status: state.context.cache().current_status(),
        })),
    }
}

fn upstream_path(api_base: &str, key: &QueryKey) -> String {
    let resource = key.segments().join("/");
    if api_base.is_empty() {
        format!("/{}", resource)
    } else {
        format!("/{}/{}", api_base, resource)
    }
}
