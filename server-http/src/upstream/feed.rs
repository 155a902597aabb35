use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use mookka::events::ChangeEvent;
use mookka::ports::{ChangeFeed, ChangeStream};
use shared::{Error, Result};
use tracing::{debug, warn};

/// Change feed read from an upstream `text/event-stream` endpoint.
/// Every `data:` payload is a JSON `ChangeEvent`.
#[derive(Clone, Debug)]
pub struct SseChangeFeed {
    client: reqwest::Client,
    url: String,
}

impl SseChangeFeed {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ChangeFeed for SseChangeFeed {
    async fn connect(&self, tables: &[String]) -> Result<ChangeStream> {
        let mut request = self
            .client
            .get(&self.url)
            .header("accept", "text/event-stream");
        if !tables.is_empty() {
            request = request.query(&[("table", tables.join(","))]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to connect to change feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Fetch {
                status: response.status().as_u16(),
            });
        }

        debug!("Change feed stream opened at {}", self.url);

        let events = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let decoded = match chunk {
                    Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(Error::Network(format!("Change feed read failed: {}", e)))],
                };
                future::ready(Some(decoded))
            })
            .flat_map(stream::iter);

        Ok(events.boxed())
    }
}

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    // raw bytes; a chunk may end inside a multi-byte character
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk of the stream, returning every change completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChangeEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let bytes: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // comments, event names and ids carry nothing we need
        }
        events
    }

    fn dispatch(&mut self) -> Option<ChangeEvent> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        match serde_json::from_str(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping undecodable change event: {}", e);
                None
            }
        }
    }
}
