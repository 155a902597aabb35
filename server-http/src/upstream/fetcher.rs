use async_trait::async_trait;
use mookka::network::{NetRequest, NetResponse, ResponseKind};
use mookka::ports::Fetcher;
use reqwest::Method;
use serde_json::Value;
use shared::{Error, Result};
use std::time::Duration;

/// Request headers never forwarded upstream
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

/// Fetches from the upstream origin; request urls are origin-relative.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Internal(format!("Invalid method '{}': {}", request.method, e)))?;

        let mut builder = self.client.request(method, self.url_for(&request.url));
        for (name, value) in &request.headers {
            if SKIPPED_REQUEST_HEADERS.iter().any(|skip| name.eq_ignore_ascii_case(skip)) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {}: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", request.url, e)))?;

        let mut fetched = NetResponse::new(status, body).with_kind(ResponseKind::Basic);
        fetched.headers = headers;
        Ok(fetched)
    }
}

/// GET `path` through `fetcher` and decode a JSON body; non-2xx is `Error::Fetch`.
pub async fn fetch_json(fetcher: &dyn Fetcher, path: &str) -> Result<Value> {
    let request = NetRequest::get(path).with_header("accept", "application/json");
    let response = fetcher.fetch(&request).await?;

    if !response.is_success() {
        return Err(Error::Fetch {
            status: response.status,
        });
    }

    serde_json::from_slice(&response.body)
        .map_err(|e| Error::Serialization(format!("Invalid JSON from {}: {}", path, e)))
}
