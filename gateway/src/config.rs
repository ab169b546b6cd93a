//! Gateway configuration
//!
//! Loaded from `PUBGATE_*` environment variables or built in code.

use crate::error::{GatewayError, Result};
use pubgate_core::SessionOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_URL: &str = "nats://localhost:4222";
const DEFAULT_CLIENT_ID: &str = "pubgate";
const DEFAULT_FAILURES_PATH: &str = "publishing_failures.tsv";
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human readable
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(GatewayError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Broker URL
    pub url: String,
    /// Client identity; also the suffix of every durable subscription name
    pub client_id: String,
    /// Cluster id for protocols that need one
    pub cluster_id: Option<String>,
    /// Open sessions over TLS
    pub tls: bool,
    /// Tab-separated file receiving failed publishes
    pub failures_path: PathBuf,
    /// How long the publisher worker waits on an empty queue before
    /// re-checking for shutdown
    pub poll_interval: Duration,
    /// Upper bound on a single broker write; `None` waits forever
    pub write_timeout: Option<Duration>,
    /// Default tracing filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Metrics HTTP listen address
    pub metrics_addr: SocketAddr,
}

impl GatewayConfig {
    /// Configuration for `url` and `client_id` with every other field defaulted
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let url = lookup("PUBGATE_URL").unwrap_or(defaults.url);
        let client_id = lookup("PUBGATE_CLIENT_ID").unwrap_or(defaults.client_id);
        let cluster_id = lookup("PUBGATE_CLUSTER_ID").filter(|v| !v.is_empty());
        let tls = lookup("PUBGATE_TLS")
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let failures_path = lookup("PUBGATE_PUBLISH_FAILURES_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.failures_path);
        let poll_interval = match lookup("PUBGATE_POLL_INTERVAL_MS") {
            Some(value) => Duration::from_millis(parse_u64("PUBGATE_POLL_INTERVAL_MS", &value)?),
            None => defaults.poll_interval,
        };
        let write_timeout = match lookup("PUBGATE_WRITE_TIMEOUT_MS") {
            Some(value) => match parse_u64("PUBGATE_WRITE_TIMEOUT_MS", &value)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            None => defaults.write_timeout,
        };
        let log_level = lookup("PUBGATE_LOG_LEVEL").unwrap_or(defaults.log_level);
        let log_format = match lookup("PUBGATE_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => defaults.log_format,
        };
        let metrics_addr = match lookup("PUBGATE_METRICS_ADDR") {
            Some(value) => value.parse().map_err(|e| {
                GatewayError::Config(format!("invalid PUBGATE_METRICS_ADDR '{value}': {e}"))
            })?,
            None => defaults.metrics_addr,
        };

        let config = Self {
            url,
            client_id,
            cluster_id,
            tls,
            failures_path,
            poll_interval,
            write_timeout,
            log_level,
            log_format,
            metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the gateway relies on
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(GatewayError::Config("broker url must not be empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(GatewayError::Config("client id must not be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(GatewayError::Config(
                "publisher poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Set the failure file path
    pub fn with_failures_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.failures_path = path.into();
        self
    }

    /// Set the publisher worker poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set (or clear) the broker write timeout
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Session options for the subscriber session
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            url: self.url.clone(),
            client_id: self.client_id.clone(),
            cluster_id: self.cluster_id.clone(),
            tls: self.tls,
        }
    }

    /// Durable subscription name for `topic`
    pub fn durable_name(&self, topic: &str) -> String {
        format!("{}-{}", topic, self.client_id)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            cluster_id: None,
            tls: false,
            failures_path: PathBuf::from(DEFAULT_FAILURES_PATH),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            write_timeout: Some(Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS)),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| GatewayError::Config(format!("invalid {key} '{value}': {e}")))
}
