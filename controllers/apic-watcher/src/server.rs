//! Probe and intent snapshot endpoint.
//!
//! Routes:
//! - `GET /healthz`: liveness
//! - `GET /intent`: the IntentDB as JSON

use crate::intent_db::IntentDb;
use crate::watcher::ApicWatcher;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Serialize)]
struct IntentSnapshot {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    intent: IntentDb,
}

pub fn router(watcher: Arc<ApicWatcher>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/intent", get(intent_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(watcher)
}

/// Serve until `token` is cancelled
pub async fn serve(addr: SocketAddr, app: Router, token: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Intent server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn intent_handler(State(watcher): State<Arc<ApicWatcher>>) -> impl IntoResponse {
    Json(IntentSnapshot {
        generated_at: Utc::now(),
        intent: watcher.snapshot(),
    })
}
