use crate::api::responses::ErrorResponse;
use crate::state::AppState;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mookka::network::{NetRequest, RequestMode, Served};
use shared::Error;
use tracing::{debug, error, warn};

/// Header telling clients where a proxied response came from
pub const CACHE_HEADER: &str = "x-mookka-cache";

/// Response headers recomputed by the server rather than copied
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
];

/// Everything not routed elsewhere goes through the network cache to the origin.
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = to_net_request(&method, &uri, &headers, body);
    debug!("{} {} ({:?})", request.method, request.url, request.mode);

    match state.network.handle(&request).await {
        Ok(served) => into_response(served),
        Err(e) => {
            warn!("{} {} failed: {}", request.method, request.url, e);
            error_response(&e)
        }
    }
}

fn to_net_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> NetRequest {
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = NetRequest::get(url).with_method(method.as_str()).with_body(body);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if is_navigation(method, headers) {
        request.mode = RequestMode::Navigate;
    }
    request
}

/// Browsers mark document loads with `sec-fetch-mode: navigate`; older clients
/// only show it through an HTML `accept`.
fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    let header_str = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    match header_str("sec-fetch-mode") {
        Some(mode) => mode.eq_ignore_ascii_case("navigate"),
        None => {
            *method == Method::GET
                && header_str(header::ACCEPT.as_str()).is_some_and(|accept| accept.contains("text/html"))
        }
    }
}

fn into_response(served: Served) -> Response {
    let Served { response, from } = served;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|skip| name.eq_ignore_ascii_case(skip))
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .header(CACHE_HEADER, from.as_str())
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            error!("Failed to build proxied response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

fn error_response(error: &Error) -> Response {
    (super::status_for(error), Json(ErrorResponse::new(error.to_string()))).into_response()
}
