//! Connector factory: pluggable backend registration by type token.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::{
    BigQueryConnector, Connector, DatabricksConnector, GoogleSheetsConnector, LocalFileConnector,
    SnowflakeConnector,
};

/// Built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    LocalFile,
    GoogleSheets,
    BigQuery,
    Snowflake,
    Databricks,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 5] = [
        ConnectorKind::BigQuery,
        ConnectorKind::Snowflake,
        ConnectorKind::Databricks,
        ConnectorKind::LocalFile,
        ConnectorKind::GoogleSheets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::LocalFile => "local_file",
            ConnectorKind::GoogleSheets => "google_sheets",
            ConnectorKind::BigQuery => "bigquery",
            ConnectorKind::Snowflake => "snowflake",
            ConnectorKind::Databricks => "databricks",
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            ConnectorKind::LocalFile => Dialect::DuckDb,
            ConnectorKind::GoogleSheets => Dialect::Sheets,
            ConnectorKind::BigQuery => Dialect::BigQuery,
            ConnectorKind::Snowflake => Dialect::Snowflake,
            ConnectorKind::Databricks => Dialect::Databricks,
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_ascii_lowercase();
        ConnectorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == token)
            .ok_or_else(|| ConnectorError::UnknownConnector(s.to_string()))
    }
}

/// Stable SQL dialect identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    DuckDb,
    Sheets,
    BigQuery,
    Snowflake,
    Databricks,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::DuckDb => "duckdb",
            Dialect::Sheets => "sheets",
            Dialect::BigQuery => "bigquery",
            Dialect::Snowflake => "snowflake",
            Dialect::Databricks => "databricks",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-argument connector constructor.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Registry from backend token to constructor. The single extension point
/// for new backends: register a constructor and callers pick it up by token.
#[derive(Clone)]
pub struct ConnectorFactory {
    constructors: Vec<(String, Constructor)>,
}

impl ConnectorFactory {
    /// Factory with the five built-in backends, each capturing `config`.
    pub fn new(config: ConnectorConfig) -> Self {
        let mut factory = Self::empty();
        for kind in ConnectorKind::ALL {
            let config = config.clone();
            let ctor: Constructor = match kind {
                ConnectorKind::LocalFile => Arc::new(move || {
                    Box::new(LocalFileConnector::new(config.clone())) as Box<dyn Connector>
                }),
                ConnectorKind::GoogleSheets => Arc::new(move || {
                    Box::new(GoogleSheetsConnector::new(config.clone())) as Box<dyn Connector>
                }),
                ConnectorKind::BigQuery => Arc::new(move || {
                    Box::new(BigQueryConnector::new(config.clone())) as Box<dyn Connector>
                }),
                ConnectorKind::Snowflake => Arc::new(move || {
                    Box::new(SnowflakeConnector::new(config.clone())) as Box<dyn Connector>
                }),
                ConnectorKind::Databricks => Arc::new(move || {
                    Box::new(DatabricksConnector::new(config.clone())) as Box<dyn Connector>
                }),
            };
            factory.register(kind.as_str(), ctor);
        }
        factory
    }

    /// Factory with no backends registered.
    pub fn empty() -> Self {
        Self {
            constructors: Vec::new(),
        }
    }

    /// Register (or replace) a backend under `token`. Tokens are
    /// case-insensitive.
    pub fn register(&mut self, token: &str, ctor: Constructor) {
        let token = token.trim().to_ascii_lowercase();
        debug!("Registering connector '{}'", token);
        if let Some(entry) = self.constructors.iter_mut().find(|(t, _)| *t == token) {
            entry.1 = ctor;
        } else {
            self.constructors.push((token, ctor));
        }
    }

    /// Build a fresh, disconnected connector for `token`.
    pub fn create(&self, token: &str) -> Result<Box<dyn Connector>> {
        let wanted = token.trim().to_ascii_lowercase();
        let (_, ctor) = self
            .constructors
            .iter()
            .find(|(t, _)| *t == wanted)
            .ok_or_else(|| ConnectorError::UnknownConnector(token.to_string()))?;
        info!("Creating connector '{}'", wanted);
        Ok(ctor())
    }

    /// Registered tokens in registration order.
    pub fn available(&self) -> Vec<&str> {
        self.constructors.iter().map(|(t, _)| t.as_str()).collect()
    }
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::new(ConnectorConfig::default())
    }
}

impl fmt::Debug for ConnectorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorFactory")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ConnectionState;
    use crate::{Credential, TableRef};

    #[test]
    fn builtins_report_expected_dialects() {
        let factory = ConnectorFactory::default();
        let expected = [
            ("bigquery", "bigquery"),
            ("snowflake", "snowflake"),
            ("databricks", "databricks"),
            ("local_file", "duckdb"),
            ("google_sheets", "sheets"),
        ];
        for (token, dialect) in expected {
            let connector = factory.create(token).unwrap();
            assert_eq!(connector.dialect().as_str(), dialect);
            assert_eq!(connector.kind(), token);
            assert_eq!(connector.state(), ConnectionState::Uninitialized);
        }
    }

    #[test]
    fn tokens_are_case_insensitive() {
        let factory = ConnectorFactory::default();
        assert!(factory.create("Snowflake").is_ok());
        assert!(factory.create(" LOCAL_FILE ").is_ok());
        assert_eq!("BigQuery".parse::<ConnectorKind>().unwrap(), ConnectorKind::BigQuery);
    }

    #[test]
    fn unknown_token_fails() {
        let factory = ConnectorFactory::default();
        for token in ["postgres", "", "mcp"] {
            match factory.create(token) {
                Err(ConnectorError::UnknownConnector(t)) => assert_eq!(t, token),
                Err(other) => panic!("unexpected error: {}", other),
                Ok(_) => panic!("'{}' should not resolve", token),
            }
        }
    }

    #[test]
    fn available_lists_registration_order() {
        let factory = ConnectorFactory::default();
        assert_eq!(
            factory.available(),
            vec!["bigquery", "snowflake", "databricks", "local_file", "google_sheets"]
        );
    }

    struct Echo {
        state: ConnectionState,
    }

    #[async_trait::async_trait]
    impl Connector for Echo {
        fn kind(&self) -> &'static str {
            "echo"
        }
        fn dialect(&self) -> Dialect {
            Dialect::DuckDb
        }
        fn state(&self) -> ConnectionState {
            self.state
        }
        async fn connect(&mut self, _credential: &Credential) -> Result<()> {
            self.state = ConnectionState::Connected;
            Ok(())
        }
        async fn list_catalogs(&mut self) -> Result<Vec<String>> {
            self.ensure_connected("list catalogs")?;
            Ok(vec!["echo".into()])
        }
        async fn list_tables(&mut self, _c: &str, _s: Option<&str>) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn sample_rows(
            &mut self,
            _t: &TableRef,
            _limit: usize,
        ) -> Result<flashviz_core::ResultTable> {
            Ok(flashviz_core::ResultTable::empty())
        }
        async fn table_schema(&mut self, _t: &TableRef) -> Result<flashviz_core::TableSchema> {
            Ok(flashviz_core::TableSchema::default())
        }
        async fn execute(&mut self, _sql: &str) -> Result<flashviz_core::ResultTable> {
            Ok(flashviz_core::ResultTable::empty())
        }
        async fn close(&mut self) -> Result<()> {
            self.state = ConnectionState::Closed;
            Ok(())
        }
    }

    #[tokio::test]
    async fn custom_backend_registers_without_caller_changes() {
        let mut factory = ConnectorFactory::empty();
        factory.register(
            "Echo",
            Arc::new(|| {
                Box::new(Echo {
                    state: ConnectionState::Uninitialized,
                }) as Box<dyn Connector>
            }),
        );
        let mut connector = factory.create("echo").unwrap();
        assert!(connector.list_catalogs().await.is_err());
        connector.connect(&Credential::new()).await.unwrap();
        assert_eq!(connector.list_catalogs().await.unwrap(), vec!["echo"]);
        assert!(connector.list_schemas("echo").await.unwrap().is_empty());
    }
}
