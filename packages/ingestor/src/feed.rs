//! Pending Transaction Feed
//!
//! Connects to a node over WebSocket or Unix IPC, subscribes to pending transaction
//! hashes and forwards them into the pipeline queue. Subscription loss is handled by
//! resubscribing with exponential backoff; a node outage never stops the feed.

use alloy::primitives::TxHash;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::{PubSubFrontend, Subscription};
use alloy::transports::ipc::IpcConnect;
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{socket_exists, FeedConfig, FeedEndpoint};

/// Errors that can occur on the feed connection
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Dial the endpoint once
pub async fn connect(endpoint: &FeedEndpoint) -> Result<RootProvider<PubSubFrontend>, FeedError> {
    match endpoint {
        FeedEndpoint::Ws(url) => {
            info!("Connecting to WebSocket endpoint at {}", url);
            ProviderBuilder::new()
                .on_ws(WsConnect::new(url.clone()))
                .await
                .map_err(|e| FeedError::ConnectionFailed(e.to_string()))
        }
        FeedEndpoint::Ipc(path) => {
            if !socket_exists(path) {
                return Err(FeedError::SocketNotFound(path.clone()));
            }

            info!("Connecting to IPC socket at {}", path);
            let ipc: IpcConnect<String> = IpcConnect::new(path.clone());
            ProviderBuilder::new()
                .on_ipc(ipc)
                .await
                .map_err(|e| FeedError::ConnectionFailed(e.to_string()))
        }
    }
}

/// Dial the endpoint, retrying with exponential backoff
pub async fn connect_with_retry(config: &FeedConfig) -> Result<RootProvider<PubSubFrontend>, FeedError> {
    let mut attempts = 0;

    loop {
        match connect(&config.endpoint).await {
            Ok(provider) => {
                info!("Connected to {}", config.endpoint);
                return Ok(provider);
            }
            Err(e) if attempts + 1 >= config.max_reconnect_attempts => {
                error!("Connection attempt {} failed: {}", attempts + 1, e);
                return Err(FeedError::MaxReconnectAttemptsExceeded(config.max_reconnect_attempts));
            }
            Err(e) => {
                let delay = config.backoff_delay(attempts);
                warn!(
                    "Connection attempt {}/{} failed: {}, retrying in {:?}",
                    attempts + 1,
                    config.max_reconnect_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                attempts += 1;
            }
        }
    }
}

/// A live stream of pending transaction hashes
#[async_trait]
pub trait HashStream: Send {
    /// Next hash; `Closed` means the subscription is gone
    async fn recv(&mut self) -> Result<TxHash, RecvError>;
}

/// Something that can open pending transaction subscriptions
#[async_trait]
pub trait PendingSource: Send + Sync {
    async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError>;

    /// Re-establish the underlying connection after repeated subscribe failures
    async fn reconnect(&self) -> Result<(), FeedError> {
        Ok(())
    }
}

#[async_trait]
impl HashStream for Subscription<TxHash> {
    async fn recv(&mut self) -> Result<TxHash, RecvError> {
        Subscription::recv(self).await
    }
}

#[async_trait]
impl PendingSource for RootProvider<PubSubFrontend> {
    async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError> {
        let subscription = self
            .subscribe_pending_transactions()
            .await
            .map_err(|e| FeedError::SubscriptionFailed(e.to_string()))?;
        Ok(Box::new(subscription))
    }
}

/// Pub-sub provider that is re-dialed when subscriptions keep failing
pub struct DialedProvider {
    config: FeedConfig,
    provider: RwLock<RootProvider<PubSubFrontend>>,
}

impl DialedProvider {
    pub fn new(provider: RootProvider<PubSubFrontend>, config: FeedConfig) -> Self {
        Self {
            config,
            provider: RwLock::new(provider),
        }
    }

    /// Current connection
    pub fn provider(&self) -> RootProvider<PubSubFrontend> {
        self.provider.read().clone()
    }
}

#[async_trait]
impl PendingSource for DialedProvider {
    async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError> {
        let provider = self.provider();
        provider.subscribe_hashes().await
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        let provider = connect_with_retry(&self.config).await?;
        *self.provider.write() = provider;
        info!("Re-dialed {}", self.config.endpoint);
        Ok(())
    }
}

/// Why a subscription stopped forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    Cancelled,
    QueueClosed,
}

/// Long-lived subscriber feeding the pipeline queue
pub struct PendingFeed<S> {
    source: S,
    config: FeedConfig,
}

impl<S: PendingSource> PendingFeed<S> {
    pub fn new(source: S, config: FeedConfig) -> Self {
        Self { source, config }
    }

    /// Forward hashes into `queue` until cancelled or the queue closes
    ///
    /// Awaits when the queue is full. Resubscribes whenever the stream ends and keeps
    /// retrying with capped backoff through any outage; every `max_reconnect_attempts`
    /// consecutive subscribe failures the source is re-dialed.
    pub async fn run(self, queue: mpsc::Sender<TxHash>, cancel: CancellationToken) {
        let threshold = self.config.max_reconnect_attempts.max(1);
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let stream = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.source.subscribe_hashes() => result,
            };

            match stream {
                Ok(stream) => {
                    if failures >= threshold {
                        info!("Feed recovered after {} failed attempts", failures);
                    }
                    info!("Subscribed to pending transactions");
                    failures = 0;
                    match forward(stream, &queue, &cancel).await {
                        StreamEnd::Cancelled => return,
                        StreamEnd::QueueClosed => {
                            info!("Pipeline queue closed, stopping feed");
                            return;
                        }
                        StreamEnd::Closed => {
                            warn!("Pending transaction subscription ended, resubscribing");
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);

                    if failures % threshold == 0 {
                        if failures == threshold {
                            error!("Feed unavailable after {} attempts: {}, re-dialing", failures, e);
                        } else {
                            warn!("Feed still unavailable after {} attempts, re-dialing", failures);
                        }

                        let redialed = tokio::select! {
                            _ = cancel.cancelled() => return,
                            result = self.source.reconnect() => result,
                        };
                        if let Err(e) = redialed {
                            warn!("Re-dial failed: {}", e);
                        }
                    }

                    let delay = self.config.backoff_delay(failures - 1);
                    warn!("Resubscribe attempt {} failed: {}, waiting {:?}", failures, e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

async fn forward(
    mut stream: Box<dyn HashStream>,
    queue: &mpsc::Sender<TxHash>,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = stream.recv() => next,
        };

        match next {
            Ok(hash) => {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return StreamEnd::Cancelled,
                    sent = queue.send(hash) => sent,
                };
                if sent.is_err() {
                    return StreamEnd::QueueClosed;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Feed consumer lagged, notifications dropped");
            }
            Err(RecvError::Closed) => {
                debug!("Subscription stream closed");
                return StreamEnd::Closed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct ReceiverStream(broadcast::Receiver<TxHash>);

    #[async_trait]
    impl HashStream for ReceiverStream {
        async fn recv(&mut self) -> Result<TxHash, RecvError> {
            self.0.recv().await
        }
    }

    /// Hands out pre-filled subscriptions, then fails every further subscribe
    struct ScriptedSource {
        batches: parking_lot::Mutex<VecDeque<Vec<TxHash>>>,
        subscribes: Arc<AtomicUsize>,
        reconnects: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<TxHash>>) -> Self {
            Self {
                batches: parking_lot::Mutex::new(batches.into()),
                subscribes: Arc::new(AtomicUsize::new(0)),
                reconnects: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PendingSource for ScriptedSource {
        async fn reconnect(&self) -> Result<(), FeedError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Err(FeedError::ConnectionFailed("connection refused".to_string()))
        }

        async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let batch = self
                .batches
                .lock()
                .pop_front()
                .ok_or_else(|| FeedError::SubscriptionFailed("node unavailable".to_string()))?;

            let (tx, rx) = broadcast::channel(batch.len().max(1));
            for hash in batch {
                tx.send(hash).unwrap();
            }
            // Dropping the sender closes the stream once drained
            Ok(Box::new(ReceiverStream(rx)))
        }
    }

    fn fast_config(max_reconnect_attempts: u32) -> FeedConfig {
        FeedConfig {
            max_reconnect_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            ..Default::default()
        }
    }

    fn hash(n: u8) -> TxHash {
        TxHash::repeat_byte(n)
    }

    // ==================== PendingFeed tests ====================

    #[tokio::test]
    async fn test_feed_keeps_retrying_through_outage() {
        let source = ScriptedSource::new(vec![vec![hash(1), hash(2)], vec![hash(3)]]);
        let subscribes = source.subscribes.clone();
        let reconnects = source.reconnects.clone();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(PendingFeed::new(source, fast_config(3)).run(tx, cancel.clone()));

        // Two successful subscriptions, then well past the reconnect threshold
        tokio::time::timeout(Duration::from_secs(5), async {
            while subscribes.load(Ordering::SeqCst) < 12 {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("feed kept resubscribing");

        assert!(!handle.is_finished());
        assert!(reconnects.load(Ordering::SeqCst) >= 3);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        let mut received = Vec::new();
        while let Ok(h) = rx.try_recv() {
            received.push(h);
        }
        assert_eq!(received, vec![hash(1), hash(2), hash(3)]);
    }

    #[tokio::test]
    async fn test_feed_recovers_after_failures() {
        /// Fails the first `fail_first` subscribes, then serves one batch per call
        struct FlakySource {
            fail_first: usize,
            subscribes: AtomicUsize,
        }

        #[async_trait]
        impl PendingSource for FlakySource {
            async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError> {
                let call = self.subscribes.fetch_add(1, Ordering::SeqCst);
                if call < self.fail_first {
                    return Err(FeedError::SubscriptionFailed("node unavailable".to_string()));
                }
                let (tx, rx) = broadcast::channel(1);
                tx.send(hash(call as u8)).unwrap();
                Ok(Box::new(ReceiverStream(rx)))
            }
        }

        let source = FlakySource {
            fail_first: 7,
            subscribes: AtomicUsize::new(0),
        };
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(PendingFeed::new(source, fast_config(3)).run(tx, cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first, Some(hash(7)));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_feed_stops_on_cancel() {
        struct PendingForever;

        #[async_trait]
        impl HashStream for PendingForever {
            async fn recv(&mut self) -> Result<TxHash, RecvError> {
                std::future::pending().await
            }
        }

        struct IdleSource;

        #[async_trait]
        impl PendingSource for IdleSource {
            async fn subscribe_hashes(&self) -> Result<Box<dyn HashStream>, FeedError> {
                Ok(Box::new(PendingForever))
            }
        }

        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(PendingFeed::new(IdleSource, fast_config(3)).run(tx, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_feed_stops_when_queue_closed() {
        let source = ScriptedSource::new(vec![vec![hash(1), hash(2)]]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(
            Duration::from_secs(1),
            PendingFeed::new(source, fast_config(3)).run(tx, CancellationToken::new()),
        )
        .await
        .expect("feed stops once the queue is gone");
    }

    #[tokio::test]
    async fn test_forward_skips_lag_and_continues() {
        let (tx, rx) = broadcast::channel(2);
        for n in 1..=4 {
            tx.send(hash(n)).unwrap();
        }
        drop(tx);

        let (queue_tx, mut queue_rx) = mpsc::channel(8);
        let end = forward(Box::new(ReceiverStream(rx)), &queue_tx, &CancellationToken::new()).await;

        assert_eq!(end, StreamEnd::Closed);
        // Capacity 2 keeps only the newest two notifications
        assert_eq!(queue_rx.recv().await, Some(hash(3)));
        assert_eq!(queue_rx.recv().await, Some(hash(4)));
    }

    // ==================== connect tests ====================

    #[tokio::test]
    async fn test_connect_to_missing_socket_fails() {
        let endpoint = FeedEndpoint::Ipc("/nonexistent/path.ipc".to_string());
        let result = connect(&endpoint).await;
        assert!(matches!(result, Err(FeedError::SocketNotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let config = FeedConfig {
            endpoint: FeedEndpoint::Ipc("/nonexistent/path.ipc".to_string()),
            ..fast_config(2)
        };
        let result = connect_with_retry(&config).await;
        assert!(matches!(result, Err(FeedError::MaxReconnectAttemptsExceeded(2))));
    }

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::SocketNotFound("/tmp/test.ipc".to_string());
        assert!(err.to_string().contains("/tmp/test.ipc"));

        let err = FeedError::MaxReconnectAttemptsExceeded(10);
        assert!(err.to_string().contains("10"));
    }
}
