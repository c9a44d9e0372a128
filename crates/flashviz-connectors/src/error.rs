//! Typed errors for the connectors crate.

use flashviz_core::EngineError;
use thiserror::Error;

use crate::lifecycle::ConnectionState;
use crate::validator::Rejection;

/// Errors that can occur in data source connectors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Credentials are missing, malformed, expired or refused by the backend.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The backend could not be reached (DNS, connect, timeout, missing file).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// An operation was attempted before `connect` or after `close`.
    #[error("not connected: cannot {0} before connect or after close")]
    NotConnected(&'static str),

    /// The factory was asked for a backend token nobody registered.
    #[error("unknown connector type: {0}")]
    UnknownConnector(String),

    /// The query safety validator refused the query.
    #[error("query rejected: {0}")]
    ValidationRejected(#[from] Rejection),

    /// The backend rejected or failed to run an admitted query.
    /// Carries the backend's diagnostic text verbatim.
    #[error("query failed: {0}")]
    Query(String),

    /// Lifecycle misuse, e.g. reconnecting a closed or failed connector.
    #[error("cannot {operation} a connector in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// A local source exists but could not be parsed.
    #[error("failed to load source: {0}")]
    SourceLoad(String),
}

impl ConnectorError {
    /// True when the validator, not the backend, refused the query.
    /// Callers regenerate the query in that case instead of reporting a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ConnectorError::ValidationRejected(_))
    }
}

impl From<EngineError> for ConnectorError {
    fn from(e: EngineError) -> Self {
        ConnectorError::Query(e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            ConnectorError::Unreachable(e.to_string())
        } else {
            ConnectorError::Query(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
