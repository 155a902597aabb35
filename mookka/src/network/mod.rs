pub mod http;
pub mod worker;

pub use http::{NetRequest, NetResponse, RequestMode, ResponseKind};
pub use worker::{
    NetworkCache, NetworkCacheConfig, Served, ServedFrom, WorkerMessage, WorkerState, CACHE_PREFIX,
};
