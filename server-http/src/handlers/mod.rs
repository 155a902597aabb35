pub mod changes;
pub mod events;
pub mod health;
pub mod proxy;
pub mod query;
pub mod sync;
pub mod worker;

pub use changes::ingest_change;
pub use events::stream_events;
pub use health::health_check;
pub use proxy::proxy;
pub use query::get_query;
pub use sync::sync_status;
pub use worker::post_worker_message;

use crate::api::responses::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use shared::Error;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

/// Status code reported to clients for a failed cache or upstream operation
pub(crate) fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::NotFound | Error::Fetch { status: 404 } => StatusCode::NOT_FOUND,
        Error::Fetch { .. } | Error::Serialization(_) | Error::InstallFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
