//! HTTP server for Prometheus metrics and gateway health
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus metrics
//! - `GET /health` - Gateway state and publish queue depth as JSON
//!
//! # Example
//!
//! ```ignore
//! use pubgate_gateway::metrics_server::MetricsServer;
//!
//! let gateway = Arc::new(gateway);
//! let metrics_handle = MetricsServer::start(config.metrics_addr, Some(Arc::clone(&gateway)));
//! ```

use crate::gateway::{Gateway, LifecycleState};
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared state for the metrics server
#[derive(Clone)]
struct AppState {
    gateway: Option<Arc<Gateway>>,
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on `addr`
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(addr: SocketAddr, gateway: Option<Arc<Gateway>>) -> JoinHandle<()> {
        let state = AppState { gateway };

        tokio::spawn(async move {
            let app = router(state);

            info!(addr = %addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, addr = %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[derive(serde::Serialize)]
struct HealthSummary {
    status: &'static str,
    state: &'static str,
    connected: bool,
    pending_publishes: usize,
    queue_depth: f64,
}

fn state_name(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Created => "created",
        LifecycleState::Connected => "connected",
        LifecycleState::Draining => "draining",
        LifecycleState::Closed => "closed",
    }
}

/// Handler for /health endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(gateway) = state.gateway else {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response();
    };

    let lifecycle = gateway.state();
    let connected = gateway.is_connected();
    let status = match lifecycle {
        LifecycleState::Connected if connected => "healthy",
        LifecycleState::Connected => "degraded",
        LifecycleState::Draining => "draining",
        LifecycleState::Created | LifecycleState::Closed => "unhealthy",
    };

    let summary = HealthSummary {
        status,
        state: state_name(lifecycle),
        connected,
        pending_publishes: gateway.pending_publishes(),
        queue_depth: crate::metrics::Metrics::get()
            .map(|m| m.publish_queue_depth.get())
            .unwrap_or_default(),
    };

    let code = match status {
        "healthy" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    (code, Json(summary)).into_response()
}
