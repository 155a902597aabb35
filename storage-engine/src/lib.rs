pub mod moka_cache;
pub mod response_cache;
pub mod sled_backend;

pub use moka_cache::MokaCache;
pub use response_cache::{MemoryCacheStorage, SledCacheStorage};
pub use sled_backend::{SCHEMA_VERSION, SledBackend, clear_all_trees};
