//! Token Metadata Resolution
//!
//! Resolves ERC20 `symbol()`/`name()` for a token address and caches the result for
//! the life of the process. Failures are never cached so the next lookup retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace};

/// Default timeout for a metadata lookup
pub const DEFAULT_METADATA_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur while resolving metadata
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("{method}() call on {token} failed: {reason}")]
    Call {
        token: Address,
        method: &'static str,
        reason: String,
    },

    #[error("Metadata lookup for {0} timed out after {1}ms")]
    Timeout(Address, u64),
}

/// Token symbol and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
}

/// Read-only ERC20 metadata calls against a token contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn symbol(&self, token: Address) -> Result<String, MetadataError>;

    async fn name(&self, token: Address) -> Result<String, MetadataError>;
}

/// Caching metadata resolver
///
/// Keys are the raw 20-byte address, which is equivalent to keying by the
/// lower-cased hex string.
pub struct MetadataResolver {
    source: Arc<dyn TokenMetadataSource>,
    cache: RwLock<HashMap<Address, TokenMetadata>>,
    timeout: Duration,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn TokenMetadataSource>, timeout: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn with_default_timeout(source: Arc<dyn TokenMetadataSource>) -> Self {
        Self::new(source, Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS))
    }

    /// Resolve metadata, using the cache if available
    pub async fn resolve(&self, token: Address) -> Result<TokenMetadata, MetadataError> {
        if let Some(metadata) = self.cached(token) {
            trace!(token = %token, "Metadata cache hit");
            return Ok(metadata);
        }

        let metadata = tokio::time::timeout(self.timeout, self.fetch(token))
            .await
            .map_err(|_| MetadataError::Timeout(token, self.timeout.as_millis() as u64))??;

        // Racing lookups for the same token: the last write wins
        self.cache.write().insert(token, metadata.clone());

        debug!(token = %token, symbol = %metadata.symbol, "Metadata cached");
        Ok(metadata)
    }

    async fn fetch(&self, token: Address) -> Result<TokenMetadata, MetadataError> {
        let (symbol, name) = tokio::try_join!(self.source.symbol(token), self.source.name(token))?;
        Ok(TokenMetadata { symbol, name })
    }

    /// Get a cached entry without touching the network
    pub fn cached(&self, token: Address) -> Option<TokenMetadata> {
        self.cache.read().get(&token).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}
