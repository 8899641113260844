//! Transaction Record Store
//!
//! Append-only persistence for classified swaps. The Redis backend keeps records as
//! JSON strings in a list, so listing returns them in insertion order.

use alloy::primitives::TxHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{Action, ClassifiedEvent};
use crate::metadata::TokenMetadata;

/// Default Redis list holding persisted records
pub const DEFAULT_RECORDS_KEY: &str = "swapscope:transactions";

/// Errors that can occur while persisting or listing records
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),
}

/// Persisted record format
///
/// This is the JSON structure stored in Redis and served by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub chain_id: u64,
    pub token_symbol: String,
    pub token_name: String,
    pub action: Action,
    /// Counter-token address, lower-case hex with 0x prefix
    pub token_address: String,
    #[serde(rename = "amountUSDT")]
    pub amount_usdt: f64,
    pub amount_token: f64,
    pub block_number: Option<u64>,
    pub tx_hash: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build a record from a classified swap and its resolved token metadata
    pub fn new(
        chain_id: u64,
        hash: TxHash,
        block_number: Option<u64>,
        event: &ClassifiedEvent,
        metadata: TokenMetadata,
    ) -> Self {
        Self {
            chain_id,
            token_symbol: metadata.symbol,
            token_name: metadata.name,
            action: event.action,
            token_address: format!("{:#x}", event.token_address),
            amount_usdt: event.amount_usdt,
            amount_token: event.amount_token,
            block_number,
            tx_hash: format!("{:#x}", hash),
            created_at: Utc::now(),
        }
    }

    /// Serialize the record to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a record from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Durable collection of processed transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn find_all(&self) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Redis list-backed record store
#[derive(Clone)]
pub struct RedisRecordStore {
    connection: MultiplexedConnection,
    key: String,
}

impl RedisRecordStore {
    /// Create a store over an established Redis multiplexed connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `key` - The list key records are appended to
    pub fn new(connection: MultiplexedConnection, key: impl Into<String>) -> Self {
        Self {
            connection,
            key: key.into(),
        }
    }

    /// Open a connection to `url` and wrap it
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, key))
    }

    /// Get the list key
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let json = record.to_json()?;
        let mut connection = self.connection.clone();
        let _: i64 = connection.rpush(&self.key, json).await?;
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Vec<String> = connection.lrange(&self.key, 0, -1).await?;
        raw.iter()
            .map(|json| TransactionRecord::from_json(json).map_err(StoreError::from))
            .collect()
    }
}

/// In-process record store
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }
}
