//! pubgate runtime: process wiring for a gateway
//!
//! Provides [`run()`] for zero-boilerplate startup, and [`RuntimeBuilder`]
//! for users who need control over the metrics server or the failure sink.
//!
//! # Quick start
//!
//! ```ignore
//! use pubgate_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     pubgate_runtime::run(Arc::new(MemoryBroker::default()), |gateway| async move {
//!         gateway.subscribe::<serde_json::Value, _>("samples", |v| println!("{v}")).await?;
//!         Ok(())
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use pubgate_core::BrokerConnector;
use pubgate_gateway::config::{GatewayConfig, LogFormat};
use pubgate_gateway::failure::FailureSink;
use pubgate_gateway::gateway::Gateway;
use pubgate_gateway::metrics::Metrics;
use pubgate_gateway::metrics_server::MetricsServer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run a gateway with default settings.
///
/// Loads configuration from `PUBGATE_*` environment variables, initialises
/// tracing and metrics, connects, calls your closure to set up
/// subscriptions and publishers, then waits for SIGINT/SIGTERM and shuts
/// the gateway down, draining the publish queue.
///
/// # Example
///
/// ```ignore
/// pubgate_runtime::run(connector, |gateway| async move {
///     gateway
///         .subscribe::<Sample, _>("samples.created", |s: Sample| println!("{s:?}"))
///         .await?;
///     Ok(())
/// }).await
/// ```
pub async fn run<F, Fut>(connector: Arc<dyn BrokerConnector>, configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<Gateway>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    RuntimeBuilder::new().configure(connector, configure).await
}

/// Power-user builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// RuntimeBuilder::new()
///     .metrics_addr("127.0.0.1:9191".parse()?)
///     .failure_sink(Arc::new(MemoryFailureSink::new(1_000)))
///     .configure(connector, |gateway| async move { Ok(()) })
///     .await
/// ```
pub struct RuntimeBuilder {
    metrics_addr: Option<SocketAddr>,
    metrics_enabled: bool,
    failure_sink: Option<Arc<dyn FailureSink>>,
}

impl RuntimeBuilder {
    /// Create a new builder with defaults from environment variables.
    pub fn new() -> Self {
        Self {
            metrics_addr: None,
            metrics_enabled: true,
            failure_sink: None,
        }
    }

    /// Override the metrics HTTP server address.
    ///
    /// Default: loaded from `PUBGATE_METRICS_ADDR` env var, or `0.0.0.0:9090`.
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Do not start the metrics HTTP server.
    pub fn disable_metrics(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Record failed publishes in `sink` instead of the failure file.
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Connect, let the closure set up the gateway, and run until shutdown.
    ///
    /// This is the terminal method — it blocks until a shutdown signal
    /// arrives and the publish queue has drained.
    pub async fn configure<F, Fut>(
        self,
        connector: Arc<dyn BrokerConnector>,
        configure: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(Arc<Gateway>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        // ── 1. Load config from env ──────────────────────────────
        let config = GatewayConfig::from_env()?;

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&config);

        let metrics_addr = self.metrics_addr.unwrap_or(config.metrics_addr);
        info!(
            protocol = connector.protocol(),
            url = %config.url,
            client_id = %config.client_id,
            failures_path = %config.failures_path.display(),
            "Starting pubgate"
        );

        // ── 3. Init metrics ──────────────────────────────────────
        Metrics::init()?;

        // ── 4. Build and connect the gateway ─────────────────────
        let mut gateway = Gateway::new(config, connector);
        if let Some(sink) = self.failure_sink {
            gateway = gateway.with_failure_sink(sink);
        }
        let gateway = Arc::new(gateway);
        gateway.connect().await?;

        // ── 5. Metrics HTTP server ───────────────────────────────
        let metrics_handle = self
            .metrics_enabled
            .then(|| MetricsServer::start(metrics_addr, Some(Arc::clone(&gateway))));

        // ── 6. User configures the gateway ───────────────────────
        if let Err(e) = configure(Arc::clone(&gateway)).await {
            tracing::error!(error = %e, "Gateway setup failed, shutting down");
            gateway.shutdown().await?;
            return Err(e);
        }

        // ── 7. Wait for a shutdown signal ────────────────────────
        shutdown_signal().await;

        // ── 8. Drain and close ───────────────────────────────────
        let report = gateway.shutdown().await?;
        if let Some(handle) = metrics_handle {
            handle.abort();
        }
        info!(
            sent = report.sent,
            failed = report.failed,
            unrecorded = report.unrecorded,
            dropped = report.dropped,
            "pubgate shutdown complete"
        );

        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialise the tracing subscriber based on config.
fn init_tracing(config: &GatewayConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
