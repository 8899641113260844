//! Ingestor Configuration
//!
//! Loads runtime settings from the environment (after an optional `.env`), with
//! defaults for every value.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address};
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::store::DEFAULT_RECORDS_KEY;

/// Default feed endpoint (local Anvil IPC socket)
pub const DEFAULT_FEED_ENDPOINT: &str = "/tmp/anvil.ipc";

/// USDT contract address on BSC
pub const BSC_USDT: Address = address!("55d398326f99059fF775485246999027B3197955");

/// BSC chain ID
pub const BSC_CHAIN_ID: u64 = 56;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

pub const DEFAULT_PORT: u16 = 3000;

pub const DEFAULT_WORKER_COUNT: usize = 32;

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

/// Timeout applied to each network call (fetch, metadata, persist)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of consecutive reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors that can occur while loading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid feed endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Where pending-transaction notifications come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEndpoint {
    /// WebSocket URL (`ws://` or `wss://`)
    Ws(String),
    /// Unix IPC socket path, `~` already expanded
    Ipc(String),
}

impl FeedEndpoint {
    /// Parse an endpoint string; anything that is not a WebSocket URL is treated as an IPC path
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::InvalidEndpoint("endpoint cannot be empty".to_string()));
        }
        if raw.starts_with("ws://") || raw.starts_with("wss://") {
            return Ok(FeedEndpoint::Ws(raw.to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(format!(
                "{raw} does not support subscriptions, use a ws:// or IPC endpoint"
            )));
        }
        Ok(FeedEndpoint::Ipc(expand_path(raw)))
    }
}

impl std::fmt::Display for FeedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedEndpoint::Ws(url) => write!(f, "{url}"),
            FeedEndpoint::Ipc(path) => write!(f, "ipc://{path}"),
        }
    }
}

/// Configuration for the feed connection
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub endpoint: FeedEndpoint,
    /// Maximum consecutive reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: FeedEndpoint::Ipc(DEFAULT_FEED_ENDPOINT.to_string()),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl FeedConfig {
    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms.saturating_mul(2u64.pow(attempt.min(10)));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Record store backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Redis { url: String, key: String },
    Memory,
}

/// Full runtime configuration
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub feed: FeedConfig,
    pub tracked_token: Address,
    pub chain_id: u64,
    pub store: StoreBackend,
    pub listen_addr: SocketAddr,
    pub workers: usize,
    pub queue_capacity: usize,
    pub dedup_capacity: usize,
    pub fetch_timeout: Duration,
    pub metadata_timeout: Duration,
    pub persist_timeout: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            tracked_token: BSC_USDT,
            chain_id: BSC_CHAIN_ID,
            store: StoreBackend::Redis {
                url: DEFAULT_REDIS_URL.to_string(),
                key: DEFAULT_RECORDS_KEY.to_string(),
            },
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            workers: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            fetch_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            metadata_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            persist_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl IngestorConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = match lookup("FEED_URL").or_else(|| lookup("QUICKNODE_URL")) {
            Some(raw) => FeedEndpoint::parse(&raw)?,
            None => defaults.feed.endpoint,
        };

        let feed = FeedConfig {
            endpoint,
            max_reconnect_attempts: parse_var(&lookup, "MAX_RECONNECT_ATTEMPTS", MAX_RECONNECT_ATTEMPTS)?,
            initial_backoff_ms: parse_var(&lookup, "INITIAL_BACKOFF_MS", INITIAL_BACKOFF_MS)?,
            max_backoff_ms: parse_var(&lookup, "MAX_BACKOFF_MS", MAX_BACKOFF_MS)?,
        };

        let store = match lookup("RECORD_STORE").as_deref().map(str::trim) {
            None | Some("redis") => StoreBackend::Redis {
                url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
                key: lookup("RECORDS_KEY").unwrap_or_else(|| DEFAULT_RECORDS_KEY.to_string()),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "RECORD_STORE",
                    value: other.to_string(),
                })
            }
        };

        let host: IpAddr = parse_var(&lookup, "BIND_HOST", defaults.listen_addr.ip())?;
        let port: u16 = parse_var(&lookup, "PORT", DEFAULT_PORT)?;

        let workers: usize = parse_var(&lookup, "WORKER_COUNT", DEFAULT_WORKER_COUNT)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_COUNT",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            feed,
            tracked_token: parse_var(&lookup, "TRACKED_TOKEN", BSC_USDT)?,
            chain_id: parse_var(&lookup, "CHAIN_ID", BSC_CHAIN_ID)?,
            store,
            listen_addr: SocketAddr::new(host, port),
            workers,
            queue_capacity: parse_var(&lookup, "QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?.max(1),
            dedup_capacity: parse_var(&lookup, "DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?,
            fetch_timeout: parse_millis(&lookup, "FETCH_TIMEOUT_MS")?,
            metadata_timeout: parse_millis(&lookup, "METADATA_TIMEOUT_MS")?,
            persist_timeout: parse_millis(&lookup, "PERSIST_TIMEOUT_MS")?,
        })
    }

    /// Settings consumed by the ingestion pipeline
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            tracked_token: self.tracked_token,
            chain_id: self.chain_id,
            workers: self.workers,
            dedup_capacity: self.dedup_capacity,
            fetch_timeout: self.fetch_timeout,
            persist_timeout: self.persist_timeout,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key, DEFAULT_TIMEOUT_MS).map(Duration::from_millis)
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    let expanded = expand_path(path);
    Path::new(&expanded).exists()
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
