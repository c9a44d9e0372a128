//! FlashViz Connectors - Data source adapters
//!
//! This crate provides one [`Connector`] contract over heterogeneous
//! analytical backends:
//! - Local files (CSV, TSV, Parquet, Excel) served by the embedded engine
//! - Google Sheets (Sheets REST API, embedded engine for SQL)
//! - BigQuery (REST API)
//! - Snowflake (SQL API v2, key-pair JWT)
//! - Databricks (SQL Statement Execution API)
//!
//! plus the [`ConnectorFactory`] registry and the query safety
//! [`validator`] that gates untrusted SQL before `execute`.

pub mod bigquery;
pub mod config;
pub mod credential;
pub mod databricks;
pub mod error;
pub mod factory;
pub mod google_auth;
pub mod google_sheets;
mod http;
pub mod lifecycle;
pub mod local_file;
pub mod snowflake;
pub mod validator;

pub use bigquery::BigQueryConnector;
pub use config::ConnectorConfig;
pub use credential::Credential;
pub use databricks::DatabricksConnector;
pub use error::{ConnectorError, Result};
pub use factory::{ConnectorFactory, ConnectorKind, Dialect};
pub use google_sheets::GoogleSheetsConnector;
pub use lifecycle::{ConnectionState, Lifecycle};
pub use local_file::LocalFileConnector;
pub use snowflake::SnowflakeConnector;
pub use validator::{check_query, run_guarded, validate_query, Rejection, Verdict};

use async_trait::async_trait;
use flashviz_core::{ResultTable, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default row count for [`Connector::sample_rows`] previews.
pub const DEFAULT_SAMPLE_LIMIT: usize = 1000;

/// Variable-depth table reference. Depth is backend-defined: file-backed
/// sources ignore `schema`, BigQuery uses `catalog` as the dataset, and
/// three-level backends resolve a missing `schema` to their own default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub catalog: String,
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(catalog: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}.{}", self.catalog, schema, self.table),
            None => write!(f, "{}.{}", self.catalog, self.table),
        }
    }
}

/// Contract every backend adapter implements.
///
/// All operations except `kind`, `dialect`, `state`, `connect` and `close`
/// require the connected state and fail with `NotConnected` otherwise.
/// Methods take `&mut self`: an instance serves one caller at a time, and
/// concurrent work needs one connector per caller.
#[async_trait]
pub trait Connector: Send {
    /// Factory token of this backend.
    fn kind(&self) -> &'static str;

    /// SQL dialect upstream prompt construction should target.
    fn dialect(&self) -> Dialect;

    fn state(&self) -> ConnectionState;

    /// Establish the backend session. A failed connect is terminal for this
    /// instance.
    async fn connect(&mut self, credential: &Credential) -> Result<()>;

    /// Top-level units: databases, datasets, a workbook or a file.
    async fn list_catalogs(&mut self) -> Result<Vec<String>>;

    /// Schemas under `catalog`. Backends without a schema level return an
    /// empty list.
    async fn list_schemas(&mut self, catalog: &str) -> Result<Vec<String>> {
        let _ = catalog;
        self.ensure_connected("list schemas")?;
        Ok(Vec::new())
    }

    async fn list_tables(&mut self, catalog: &str, schema: Option<&str>) -> Result<Vec<String>>;

    /// At most `limit` rows (further capped by config) without side effects.
    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable>;

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema>;

    /// Run caller-supplied SQL verbatim. Callers holding untrusted text go
    /// through [`run_guarded`] instead.
    async fn execute(&mut self, sql: &str) -> Result<ResultTable>;

    /// Release the session. Idempotent.
    async fn close(&mut self) -> Result<()>;

    fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            _ => Err(ConnectorError::NotConnected(operation)),
        }
    }
}
