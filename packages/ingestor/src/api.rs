//! Listing Service
//!
//! Read-only HTTP surface over the record store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pipeline::{PipelineStats, StatsSnapshot};
use crate::store::{RecordStore, StoreError, TransactionRecord};

/// Errors surfaced by API handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Server Error").into_response()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub stats: Arc<PipelineStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/transactions", get(list_transactions))
        .route("/stats", get(stats))
        .with_state(state)
}

/// GET /transactions
async fn list_transactions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let records = state.store.find_all().await?;
    Ok(Json(records))
}

/// GET /stats
async fn stats(State(state): State<ApiState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Serve `router` on `addr` until `cancel` fires
pub async fn serve(addr: SocketAddr, router: Router, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listing service listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
