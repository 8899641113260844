//! Chain Read Interface
//!
//! Transaction lookups and ERC20 metadata calls against the node, behind traits so the
//! pipeline can run against fakes in tests.

use alloy::consensus::Transaction as ConsensusTx;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::Transaction;
use alloy::sol;
use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::{MetadataError, TokenMetadataSource};

sol! {
    #[sol(rpc)]
    interface IERC20Metadata {
        function symbol() external view returns (string);
        function name() external view returns (string);
    }
}

/// Errors that can occur while fetching a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transaction fetch timed out after {0}ms")]
    Timeout(u64),
}

/// The fields of a pending transaction the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Transaction value in wei
    pub value: U256,
    /// Transaction input data (calldata)
    pub input: Bytes,
    /// Block number, None while pending
    pub block_number: Option<u64>,
}

impl RawTransaction {
    fn from_rpc(hash: TxHash, tx: &Transaction) -> Self {
        Self {
            hash,
            to: ConsensusTx::to(tx),
            value: ConsensusTx::value(tx),
            input: Bytes::copy_from_slice(&ConsensusTx::input(tx)[..]),
            block_number: TransactionResponse::block_number(tx),
        }
    }
}

/// Transaction lookups by hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fetch a transaction; `Ok(None)` when the node no longer knows the hash
    async fn get_transaction(&self, hash: TxHash) -> Result<Option<RawTransaction>, FetchError>;
}

/// Node client backed by an alloy pub-sub provider
#[derive(Clone)]
pub struct AlloyChain {
    provider: RootProvider<PubSubFrontend>,
}

impl AlloyChain {
    pub fn new(provider: RootProvider<PubSubFrontend>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &RootProvider<PubSubFrontend> {
        &self.provider
    }
}

#[async_trait]
impl ChainReader for AlloyChain {
    async fn get_transaction(&self, hash: TxHash) -> Result<Option<RawTransaction>, FetchError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| FetchError::Provider(e.to_string()))?;

        Ok(tx.map(|tx| RawTransaction::from_rpc(hash, &tx)))
    }
}

#[async_trait]
impl TokenMetadataSource for AlloyChain {
    async fn symbol(&self, token: Address) -> Result<String, MetadataError> {
        let contract = IERC20Metadata::new(token, self.provider.clone());
        let result = contract.symbol().call().await.map_err(|e| MetadataError::Call {
            token,
            method: "symbol",
            reason: e.to_string(),
        })?;
        Ok(result._0)
    }

    async fn name(&self, token: Address) -> Result<String, MetadataError> {
        let contract = IERC20Metadata::new(token, self.provider.clone());
        let result = contract.name().call().await.map_err(|e| MetadataError::Call {
            token,
            method: "name",
            reason: e.to_string(),
        })?;
        Ok(result._0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_erc20_selectors() {
        assert_eq!(IERC20Metadata::symbolCall::SELECTOR, [0x95, 0xd8, 0x9b, 0x41]);
        assert_eq!(IERC20Metadata::nameCall::SELECTOR, [0x06, 0xfd, 0xde, 0x03]);
    }

    #[test]
    fn test_fetch_error_display() {
        assert!(FetchError::Timeout(5000).to_string().contains("5000"));
        assert!(FetchError::Provider("connection reset".into()).to_string().contains("connection reset"));
    }
}
