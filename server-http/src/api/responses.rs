use mookka::domain::SyncStatus;
use mookka::network::WorkerState;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct HealthResponse {
    pub message: String,
}

// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub sync_status: SyncStatus,
    pub worker_state: WorkerState,
    pub cache_version: String,
    pub watched_tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub key: String,
    /// `fresh`, `cache_hit` or `stale_fallback`
    pub state: &'static str,
    pub data: Value,
    pub sync_status: SyncStatus,
}

#[derive(Debug, Serialize)]
pub struct ChangeAcceptedResponse {
    /// Number of live streams the change was handed to
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct WorkerStateResponse {
    pub state: WorkerState,
}
