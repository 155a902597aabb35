pub mod feed;
pub mod fetcher;
pub mod relay;

pub use feed::{SseChangeFeed, SseDecoder};
pub use fetcher::{HttpFetcher, fetch_json};
pub use relay::spawn_relay;
