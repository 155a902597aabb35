use serde::{Deserialize, Serialize};
use shared::{TtlMs, now_ms};
use std::fmt;
use std::time::Duration;

/// A cached value with its write time and expiry, both in epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    pub expires_at: u64,
}

impl<T> CacheEntry<T> {
    /// Stamps `data` now. A zero ttl is clamped to 1ms so `expires_at > timestamp` holds.
    pub fn new(data: T, ttl: TtlMs) -> Self {
        Self::at(data, now_ms(), ttl)
    }

    pub fn at(data: T, timestamp: u64, ttl: TtlMs) -> Self {
        Self {
            data,
            timestamp,
            expires_at: timestamp.saturating_add(ttl.0.max(1)),
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    pub fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            data: f(self.data),
            timestamp: self.timestamp,
            expires_at: self.expires_at,
        }
    }
}

/// Identifies a logical data request, e.g. `["media", "film", "42"]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub const SEPARATOR: char = ':';

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Splits a `/`-separated path into a key, dropping empty segments
    pub fn from_path(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn root(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The string used as the cache key
    pub fn cache_key(&self) -> String {
        self.0.join(&Self::SEPARATOR.to_string())
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

impl<S: Into<String>> From<Vec<S>> for QueryKey {
    fn from(value: Vec<S>) -> Self {
        Self::new(value)
    }
}

/// Where the last successful read came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Local,
    Offline,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Local => "local",
            SyncStatus::Offline => "offline",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    pub ttl: TtlMs,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GetOptions {
    pub force_refresh: bool,
}

/// Freshness policy for a cache service read
#[derive(Clone, Copy, Debug)]
pub struct CacheOptions {
    pub max_age: Duration,
    pub stale_while_revalidate: bool,
    pub ttl: TtlMs,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(5 * 60),
            stale_while_revalidate: true,
            ttl: TtlMs::DEFAULT,
        }
    }
}
