//! SwapScope Ingestor Library
//!
//! This crate provides components for watching pending transactions sent to a tracked
//! token contract, decoding router swap calldata, classifying buys and sells, enriching
//! them with token metadata, and persisting the results for the listing API.

pub mod api;
pub mod chain;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod feed;
pub mod filter;
pub mod metadata;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use chain::{AlloyChain, ChainReader, RawTransaction};
pub use classifier::{classify, Action, ClassifiedEvent};
pub use config::IngestorConfig;
pub use decoder::{decode_swap, DecodeError, SwapIntent};
pub use metadata::{MetadataResolver, TokenMetadata, TokenMetadataSource};
pub use pipeline::{Outcome, Pipeline, PipelineConfig};
pub use store::{MemoryRecordStore, RecordStore, RedisRecordStore, TransactionRecord};
