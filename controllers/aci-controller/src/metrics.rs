//! Prometheus metrics and the probe endpoint.
//!
//! Routes:
//! - `GET /healthz`: liveness
//! - `GET /metrics`: Prometheus text format
//! - `POST /resync`: re-enqueue every watched object

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Controller metrics
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Reconciliations by queue kind and result ("done", "requeue", "error")
    pub reconciliations: IntCounterVec,
    /// Fabric writes by operation ("write", "clear")
    pub fabric_writes: IntCounterVec,
    pub registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("aci_controller_reconciliations_total", "Reconciliations by kind and result"),
            &["kind", "result"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let fabric_writes = IntCounterVec::new(
            Opts::new("aci_controller_fabric_writes_total", "Label-key writes sent to the fabric"),
            &["operation"],
        )?;
        registry.register(Box::new(fabric_writes.clone()))?;

        Ok(Self {
            reconciliations,
            fabric_writes,
            registry: Arc::new(registry),
        })
    }

    pub fn record_reconcile(&self, kind: &str, result: &str) {
        self.reconciliations.with_label_values(&[kind, result]).inc();
    }

    pub fn record_fabric_write(&self, operation: &str) {
        self.fabric_writes.with_label_values(&[operation]).inc();
    }
}

/// Callback behind `POST /resync`
pub type ResyncFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct ServerState {
    metrics: Metrics,
    resync: ResyncFn,
}

pub fn router(metrics: Metrics, resync: ResyncFn) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/resync", post(resync_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { metrics, resync })
}

/// Serve until `token` is cancelled
pub async fn serve(addr: SocketAddr, app: Router, token: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, [("content-type", encoder.format_type().to_string())], buffer).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn resync_handler(State(state): State<ServerState>) -> impl IntoResponse {
    info!("Full resync requested");
    (state.resync)();
    StatusCode::ACCEPTED
}
