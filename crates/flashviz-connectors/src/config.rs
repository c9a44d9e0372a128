//! Connector configuration from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::ConnectorError;

/// Transport timeouts and sampling bounds shared by every connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// TCP/TLS connect timeout for HTTP clients.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for HTTP clients.
    pub request_timeout_secs: u64,
    /// Server-side statement timeout, also the longest we poll for a result.
    pub statement_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Hard cap on any sample request, whatever limit the caller asks for.
    pub max_sample_rows: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            statement_timeout_secs: 300,
            poll_interval_ms: 500,
            max_sample_rows: 10_000,
        }
    }
}

impl ConnectorConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            connect_timeout_secs: std::env::var("FLASHVIZ_CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid FLASHVIZ_CONNECT_TIMEOUT_SECS")?,
            request_timeout_secs: std::env::var("FLASHVIZ_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("Invalid FLASHVIZ_REQUEST_TIMEOUT_SECS")?,
            statement_timeout_secs: std::env::var("FLASHVIZ_STATEMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid FLASHVIZ_STATEMENT_TIMEOUT_SECS")?,
            poll_interval_ms: std::env::var("FLASHVIZ_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("Invalid FLASHVIZ_POLL_INTERVAL_MS")?,
            max_sample_rows: std::env::var("FLASHVIZ_MAX_SAMPLE_ROWS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("Invalid FLASHVIZ_MAX_SAMPLE_ROWS")?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    /// Clamp a requested sample size to the configured cap.
    pub fn sample_limit(&self, requested: usize) -> usize {
        requested.min(self.max_sample_rows)
    }

    /// HTTP client with this config's timeouts. Built at `connect` time.
    pub fn http_client(&self) -> std::result::Result<reqwest::Client, ConnectorError> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .user_agent(concat!("flashviz/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::Unreachable(format!("failed to build HTTP client: {}", e)))
    }
}
