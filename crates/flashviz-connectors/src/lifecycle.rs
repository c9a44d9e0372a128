//! Connection lifecycle shared by every adapter.
//!
//! `Uninitialized → Connecting → Connected → Closed`, with
//! `Connecting → Failed` on authentication or network errors. `Failed` and
//! `Closed` are terminal: retrying means building a new connector.

use std::fmt;

use tracing::debug;

use crate::error::{ConnectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State machine embedded in each adapter.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Uninitialized → Connecting`. Any other starting state is misuse.
    pub fn begin_connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Uninitialized {
            return Err(ConnectorError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Settle a connect attempt: `Connected` on success, `Failed` otherwise.
    pub fn finish_connect<T>(&mut self, outcome: Result<T>) -> Result<T> {
        self.state = match outcome {
            Ok(_) => ConnectionState::Connected,
            Err(_) => ConnectionState::Failed,
        };
        debug!("connector state -> {}", self.state);
        outcome
    }

    pub fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            _ => Err(ConnectorError::NotConnected(operation)),
        }
    }

    /// `Connected → Closed`. Returns whether resources need releasing; from
    /// any other state this is a no-op.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Closed;
            true
        } else {
            false
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_connected("list catalogs").is_err());
        lifecycle.begin_connect().unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        lifecycle.finish_connect(Ok(())).unwrap();
        assert!(lifecycle.ensure_connected("list catalogs").is_ok());
        assert!(lifecycle.close());
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(!lifecycle.close());
        assert!(matches!(
            lifecycle.ensure_connected("execute"),
            Err(ConnectorError::NotConnected("execute"))
        ));
    }

    #[test]
    fn failed_connect_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_connect().unwrap();
        let outcome: Result<()> =
            lifecycle.finish_connect(Err(ConnectorError::Unreachable("dns".into())));
        assert!(outcome.is_err());
        assert_eq!(lifecycle.state(), ConnectionState::Failed);
        assert!(matches!(
            lifecycle.begin_connect(),
            Err(ConnectorError::InvalidState {
                state: ConnectionState::Failed,
                ..
            })
        ));
    }

    #[test]
    fn closed_cannot_reconnect() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_connect().unwrap();
        lifecycle.finish_connect(Ok(())).unwrap();
        lifecycle.close();
        assert!(lifecycle.begin_connect().is_err());
    }

    #[test]
    fn close_before_connect_is_noop() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.close());
        assert_eq!(lifecycle.state(), ConnectionState::Uninitialized);
    }
}
