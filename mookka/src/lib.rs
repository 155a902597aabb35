pub mod cache;
pub mod context;
pub mod domain;
pub mod events;
pub mod network;
pub mod ports;
pub mod query;
pub mod realtime;

#[cfg(test)]
pub(crate) mod test_support;
