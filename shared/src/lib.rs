// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("network: {0}")]
    Network(String),
    #[error("upstream responded with status {status}")]
    Fetch { status: u16 },
    #[error("install failed on '{asset}': {reason}")]
    InstallFailed { asset: String, reason: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure means the origin could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlMs(pub u64);

impl TtlMs {
    /// 24 hours
    pub const DEFAULT: TtlMs = TtlMs(24 * 60 * 60 * 1000);

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Default for TtlMs {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Duration> for TtlMs {
    fn from(value: Duration) -> Self {
        TtlMs(value.as_millis() as u64)
    }
}

/// Milliseconds since the UNIX epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub mod config;
