//! Ingestion Pipeline
//!
//! Drives each pending hash through fetch → destination filter → decode → classify →
//! metadata → persist. Every hash is processed independently; a failure at any stage
//! drops that hash only.
//!
//! Hashes are pulled from a bounded queue by at most `workers` concurrent tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, trace, warn, Instrument};

use crate::chain::{ChainReader, FetchError};
use crate::classifier::classify;
use crate::config::{BSC_CHAIN_ID, BSC_USDT, DEFAULT_DEDUP_CAPACITY, DEFAULT_TIMEOUT_MS, DEFAULT_WORKER_COUNT};
use crate::decoder::{decode_swap, DecodeError};
use crate::filter::{is_tracked_destination, method_label};
use crate::metadata::{MetadataError, MetadataResolver};
use crate::store::{RecordStore, StoreError, TransactionRecord};

/// Settings for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tracked_token: Address,
    pub chain_id: u64,
    /// Maximum hashes processed concurrently
    pub workers: usize,
    /// Recently seen hashes remembered for duplicate suppression (0 disables)
    pub dedup_capacity: usize,
    pub fetch_timeout: Duration,
    pub persist_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tracked_token: BSC_USDT,
            chain_id: BSC_CHAIN_ID,
            workers: DEFAULT_WORKER_COUNT,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            fetch_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            persist_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Why a hash produced no record
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Duplicate,
    NotFound,
    FetchFailed(FetchError),
    NoDestination,
    NotTracked,
    Decode(DecodeError),
    Metadata(MetadataError),
    Persist(String),
}

impl DropReason {
    /// Transient failures release the hash so a redelivery is processed again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DropReason::FetchFailed(_) | DropReason::Metadata(_) | DropReason::Persist(_)
        )
    }
}

/// Result of one pass over a hash
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Persisted(TransactionRecord),
    Dropped(DropReason),
}

impl Outcome {
    pub fn record(&self) -> Option<&TransactionRecord> {
        match self {
            Outcome::Persisted(record) => Some(record),
            Outcome::Dropped(_) => None,
        }
    }
}

/// Per-stage counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    duplicates: AtomicU64,
    not_found: AtomicU64,
    fetch_failures: AtomicU64,
    no_destination: AtomicU64,
    filtered_out: AtomicU64,
    decode_attempts: AtomicU64,
    decode_failures: AtomicU64,
    metadata_failures: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub received: u64,
    pub duplicates: u64,
    pub not_found: u64,
    pub fetch_failures: u64,
    pub no_destination: u64,
    pub filtered_out: u64,
    pub decode_attempts: u64,
    pub decode_failures: u64,
    pub metadata_failures: u64,
    pub persisted: u64,
    pub persist_failures: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            duplicates: load(&self.duplicates),
            not_found: load(&self.not_found),
            fetch_failures: load(&self.fetch_failures),
            no_destination: load(&self.no_destination),
            filtered_out: load(&self.filtered_out),
            decode_attempts: load(&self.decode_attempts),
            decode_failures: load(&self.decode_failures),
            metadata_failures: load(&self.metadata_failures),
            persisted: load(&self.persisted),
            persist_failures: load(&self.persist_failures),
        }
    }
}

/// Bounded FIFO set of recently seen hashes
///
/// Best effort: once more than `capacity` hashes have been seen the oldest are forgotten.
/// Released hashes leave a stale slot in the eviction queue that is skipped when popped.
pub struct SeenHashes {
    capacity: usize,
    inner: Mutex<SeenInner>,
}

#[derive(Default)]
struct SeenInner {
    /// Live hash -> insertion sequence
    live: HashMap<TxHash, u64>,
    order: VecDeque<(TxHash, u64)>,
    next_seq: u64,
}

impl SeenInner {
    fn is_live(&self, hash: &TxHash, seq: u64) -> bool {
        self.live.get(hash) == Some(&seq)
    }
}

impl SeenHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(SeenInner::default()),
        }
    }

    /// Record `hash`; returns false if it was already present
    pub fn insert(&self, hash: TxHash) -> bool {
        if self.capacity == 0 {
            return true;
        }

        let mut inner = self.inner.lock();
        if inner.live.contains_key(&hash) {
            return false;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.live.insert(hash, seq);
        inner.order.push_back((hash, seq));

        while inner.live.len() > self.capacity {
            let Some((oldest, seq)) = inner.order.pop_front() else {
                break;
            };
            if inner.is_live(&oldest, seq) {
                inner.live.remove(&oldest);
            }
        }

        // Stale slots only pile up under heavy release traffic; compact occasionally
        if inner.order.len() > self.capacity.saturating_mul(2) {
            let SeenInner { live, order, .. } = &mut *inner;
            order.retain(|(h, seq)| live.get(h) == Some(seq));
        }
        true
    }

    /// Forget `hash` so it can be processed again
    pub fn release(&self, hash: TxHash) {
        self.inner.lock().live.remove(&hash);
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner.lock().live.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transaction ingestion service
pub struct Pipeline {
    chain: Arc<dyn ChainReader>,
    resolver: Arc<MetadataResolver>,
    store: Arc<dyn RecordStore>,
    config: PipelineConfig,
    seen: SeenHashes,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        resolver: Arc<MetadataResolver>,
        store: Arc<dyn RecordStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            chain,
            resolver,
            store,
            seen: SeenHashes::new(config.dedup_capacity),
            stats: Arc::new(PipelineStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared handle to the counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run one hash through every stage
    pub async fn process(&self, hash: TxHash) -> Outcome {
        PipelineStats::bump(&self.stats.received);

        if !self.seen.insert(hash) {
            PipelineStats::bump(&self.stats.duplicates);
            debug!(%hash, "Duplicate hash dropped");
            return Outcome::Dropped(DropReason::Duplicate);
        }

        let outcome = self.run_stages(hash).await;

        if let Outcome::Dropped(reason) = &outcome {
            if reason.is_transient() {
                self.seen.release(hash);
            }
        }
        outcome
    }

    async fn run_stages(&self, hash: TxHash) -> Outcome {
        let tracked = self.config.tracked_token;

        let fetched = match timeout(self.config.fetch_timeout, self.chain.get_transaction(hash)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.config.fetch_timeout.as_millis() as u64)),
        };

        let tx = match fetched {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                PipelineStats::bump(&self.stats.not_found);
                debug!(%hash, "Transaction not found");
                return Outcome::Dropped(DropReason::NotFound);
            }
            Err(e) => {
                PipelineStats::bump(&self.stats.fetch_failures);
                warn!(%hash, error = %e, "Transaction fetch failed");
                return Outcome::Dropped(DropReason::FetchFailed(e));
            }
        };

        if tx.to.is_none() {
            PipelineStats::bump(&self.stats.no_destination);
            debug!(%hash, "Transaction has no destination");
            return Outcome::Dropped(DropReason::NoDestination);
        }

        if !is_tracked_destination(tx.to, tracked) {
            PipelineStats::bump(&self.stats.filtered_out);
            trace!(%hash, "Destination not tracked");
            return Outcome::Dropped(DropReason::NotTracked);
        }

        PipelineStats::bump(&self.stats.decode_attempts);
        let method = method_label(&tx.input);

        let intent = match decode_swap(&tx.input) {
            Ok(intent) => intent,
            Err(e) => {
                PipelineStats::bump(&self.stats.decode_failures);
                debug!(%hash, method, error = %e, "Calldata is not a swap");
                return Outcome::Dropped(DropReason::Decode(e));
            }
        };

        let event = classify(intent, tx.value, tracked);

        let metadata = match self.resolver.resolve(event.token_address).await {
            Ok(metadata) => metadata,
            Err(e) => {
                PipelineStats::bump(&self.stats.metadata_failures);
                warn!(%hash, token = %event.token_address, error = %e, "Token metadata lookup failed");
                return Outcome::Dropped(DropReason::Metadata(e));
            }
        };

        let record = TransactionRecord::new(self.config.chain_id, hash, tx.block_number, &event, metadata);

        let persisted = match timeout(self.config.persist_timeout, self.store.insert(&record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.persist_timeout.as_millis() as u64)),
        };

        if let Err(e) = persisted {
            PipelineStats::bump(&self.stats.persist_failures);
            error!(%hash, error = %e, "Failed to persist transaction");
            return Outcome::Dropped(DropReason::Persist(e.to_string()));
        }

        PipelineStats::bump(&self.stats.persisted);
        info!(
            %hash,
            method,
            action = %record.action,
            token = %record.token_symbol,
            amount_usdt = record.amount_usdt,
            amount_token = record.amount_token,
            "Swap persisted"
        );
        Outcome::Persisted(record)
    }

    /// Consume `queue` with at most `workers` hashes in flight
    ///
    /// Returns when the queue closes (after in-flight work finishes) or when `cancel`
    /// fires (in-flight work is abandoned).
    pub async fn run(self: Arc<Self>, mut queue: mpsc::Receiver<TxHash>, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        info!(workers = self.config.workers, tracked = %self.config.tracked_token, "Pipeline started");

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let hash = tokio::select! {
                _ = cancel.cancelled() => break,
                hash = queue.recv() => match hash {
                    Some(hash) => hash,
                    None => break,
                },
            };

            let pipeline = self.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    pipeline.process(hash).await
                }
                .instrument(debug_span!("tx", %hash)),
            );

            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }
        }

        if cancel.is_cancelled() {
            info!(in_flight = tasks.len(), "Pipeline cancelled");
            tasks.abort_all();
        } else {
            info!("Pipeline queue closed, draining in-flight work");
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
        }
    }
}

fn log_join_error(joined: Result<Outcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Worker panicked");
        }
    }
}
