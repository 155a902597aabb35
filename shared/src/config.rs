use std::str::FromStr;
use tracing::warn;

/// Maps the first segment of a query key to the table whose changes invalidate it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchRule {
    pub key_root: String,
    pub table: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub data_dir: String,
    pub upstream_url: String,
    pub api_base: String,
    pub feed_url: Option<String>,
    pub cache_version: String,
    pub precache: Vec<String>,
    pub api_prefixes: Vec<String>,
    pub default_ttl_ms: u64,
    pub max_age_ms: u64,
    pub sweep_interval_secs: u64,
    pub memory_entries: u64,
    pub watch: Vec<WatchRule>,
    pub allowed_origins: Vec<String>,
}

impl Config {
    const DEFAULT_HOST: &str = "0.0.0.0";
    const DEFAULT_HTTP_PORT: u16 = 8080;
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_UPSTREAM_URL: &str = "http://localhost:3000";
    const DEFAULT_API_BASE: &str = "api";
    const DEFAULT_CACHE_VERSION: &str = "v1";
    const DEFAULT_PRECACHE: &str = "/,/index.html,/manifest.json";
    const DEFAULT_API_PREFIXES: &str = "/api/,/rest/,/auth/,/realtime/";
    const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;
    const DEFAULT_MAX_AGE_MS: u64 = 5 * 60 * 1000;
    const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
    const DEFAULT_MEMORY_ENTRIES: u64 = 10_000;
    const DEFAULT_WATCH: &str =
        "media:user_media,collections:collections,activity:activities,profiles:profiles";

    pub fn from_env() -> Self {
        Self {
            host: std::env::var("MOOKKA_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string()),
            http_port: parse_or("MOOKKA_HTTP_PORT", Self::DEFAULT_HTTP_PORT),
            data_dir: std::env::var("MOOKKA_DATA_DIR")
                .unwrap_or_else(|_| Self::DEFAULT_DATA_DIR.to_string()),
            upstream_url: std::env::var("MOOKKA_UPSTREAM_URL")
                .unwrap_or_else(|_| Self::DEFAULT_UPSTREAM_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_base: std::env::var("MOOKKA_API_BASE")
                .unwrap_or_else(|_| Self::DEFAULT_API_BASE.to_string())
                .trim_matches('/')
                .to_string(),
            feed_url: std::env::var("MOOKKA_FEED_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            cache_version: std::env::var("MOOKKA_CACHE_VERSION")
                .unwrap_or_else(|_| Self::DEFAULT_CACHE_VERSION.to_string()),
            precache: split_csv(
                &std::env::var("MOOKKA_PRECACHE").unwrap_or_else(|_| Self::DEFAULT_PRECACHE.to_string()),
            ),
            api_prefixes: split_csv(
                &std::env::var("MOOKKA_API_PREFIXES")
                    .unwrap_or_else(|_| Self::DEFAULT_API_PREFIXES.to_string()),
            ),
            default_ttl_ms: parse_or("MOOKKA_DEFAULT_TTL_MS", Self::DEFAULT_TTL_MS),
            max_age_ms: parse_or("MOOKKA_MAX_AGE_MS", Self::DEFAULT_MAX_AGE_MS),
            sweep_interval_secs: parse_or(
                "MOOKKA_SWEEP_INTERVAL_SECS",
                Self::DEFAULT_SWEEP_INTERVAL_SECS,
            ),
            memory_entries: parse_or("MOOKKA_MEMORY_ENTRIES", Self::DEFAULT_MEMORY_ENTRIES),
            watch: parse_watch_rules(
                &std::env::var("MOOKKA_WATCH").unwrap_or_else(|_| Self::DEFAULT_WATCH.to_string()),
            ),
            allowed_origins: split_csv(
                &std::env::var("MOOKKA_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),
        }
    }

    /// Table watched for the given query key root, if any
    pub fn table_for(&self, key_root: &str) -> Option<&str> {
        self.watch
            .iter()
            .find(|rule| rule.key_root == key_root)
            .map(|rule| rule.table.as_str())
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses `root:table,root:table`; malformed pairs are skipped.
pub fn parse_watch_rules(raw: &str) -> Vec<WatchRule> {
    split_csv(raw)
        .into_iter()
        .filter_map(|pair| match pair.split_once(':') {
            Some((root, table)) if !root.trim().is_empty() && !table.trim().is_empty() => {
                Some(WatchRule {
                    key_root: root.trim().to_string(),
                    table: table.trim().to_string(),
                })
            }
            _ => {
                warn!("Ignoring malformed watch rule '{}'", pair);
                None
            }
        })
        .collect()
}
