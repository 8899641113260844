use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swapscope_ingestor::api::{self, ApiState};
use swapscope_ingestor::config::{IngestorConfig, StoreBackend};
use swapscope_ingestor::feed::{connect_with_retry, DialedProvider, PendingFeed};
use swapscope_ingestor::{AlloyChain, MemoryRecordStore, MetadataResolver, Pipeline, RecordStore, RedisRecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = IngestorConfig::from_env().context("Configuration error")?;
    info!(
        feed = %config.feed.endpoint,
        tracked = %config.tracked_token,
        chain_id = config.chain_id,
        "Starting swapscope ingestor"
    );

    let store: Arc<dyn RecordStore> = match &config.store {
        StoreBackend::Redis { url, key } => {
            let store = RedisRecordStore::connect(url, key.clone())
                .await
                .context("Failed to connect to Redis")?;
            info!(key = store.key(), "Using Redis record store");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            info!("Using in-memory record store");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let provider = connect_with_retry(&config.feed).await?;
    let chain = AlloyChain::new(provider.clone());

    let resolver = Arc::new(MetadataResolver::new(Arc::new(chain.clone()), config.metadata_timeout));
    let pipeline = Arc::new(Pipeline::new(Arc::new(chain), resolver, store.clone(), config.pipeline()));
    let stats = pipeline.stats();

    let cancel = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

    let feed = PendingFeed::new(DialedProvider::new(provider, config.feed.clone()), config.feed.clone());
    let feed_task = tokio::spawn(feed.run(queue_tx, cancel.clone()));

    let pipeline_task = tokio::spawn(pipeline.run(queue_rx, cancel.clone()));

    let router = api::router(ApiState {
        store,
        stats: stats.clone(),
    });
    let api_cancel = cancel.clone();
    let addr = config.listen_addr;
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::serve(addr, router, api_cancel.clone()).await {
            error!("Listing service failed: {}", e);
            api_cancel.cancel();
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    let (feed_joined, pipeline_joined, api_joined) = tokio::join!(feed_task, pipeline_task, api_task);
    for (task, joined) in [("feed", feed_joined), ("pipeline", pipeline_joined), ("api", api_joined)] {
        report_join(task, joined);
    }

    let snapshot = stats.snapshot();
    info!(
        received = snapshot.received,
        duplicates = snapshot.duplicates,
        not_found = snapshot.not_found,
        fetch_failures = snapshot.fetch_failures,
        filtered_out = snapshot.filtered_out,
        decode_failures = snapshot.decode_failures,
        metadata_failures = snapshot.metadata_failures,
        persisted = snapshot.persisted,
        persist_failures = snapshot.persist_failures,
        "Ingestor stopped"
    );

    Ok(())
}

/// Log a background task that panicked or was aborted; returns true if it did
fn report_join(task: &str, joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => false,
        Err(e) => {
            error!(task, error = %e, panicked = e.is_panic(), "Task did not finish cleanly");
            true
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swapscope_ingestor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
