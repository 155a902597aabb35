pub mod local;
pub mod service;

pub use local::LocalPersistentCache;
pub use service::{CacheService, CacheSource, Cached};
