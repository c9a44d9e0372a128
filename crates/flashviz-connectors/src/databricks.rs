//! Databricks SQL warehouse connector over the Statement Execution API.
//!
//! Tables are addressed as `catalog.schema.table` (Unity Catalog). Each
//! statement is submitted with the tracked catalog and schema; `USE CATALOG`
//! and `USE SCHEMA` validate a name before the context changes.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flashviz_core::{ResultTable, SchemaField, TableSchema, TypeTag, Value};

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::http::{base_url, read_json, text_table};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{Connector, TableRef};

const DEFAULT_SCHEMA: &str = "default";

// ---------------------------------------------------------------------------
// Statement Execution API wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    warehouse_id: &'a str,
    statement: &'a str,
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    format: &'static str,
    disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: StatementStatus,
    manifest: Option<Manifest>,
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    schema: ManifestSchema,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
struct ColumnInfo {
    name: String,
    type_text: Option<String>,
    type_name: Option<String>,
}

impl ColumnInfo {
    fn type_tag(&self) -> TypeTag {
        let native = self
            .type_text
            .as_deref()
            .or(self.type_name.as_deref())
            .unwrap_or("STRING");
        TypeTag::from_native(native)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    next_chunk_internal_link: Option<String>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct DatabricksSession {
    http: reqwest::Client,
    base: String,
    token: String,
    warehouse_id: String,
    catalog: Option<String>,
    schema: Option<String>,
}

impl DatabricksSession {
    async fn run(&self, sql: &str, config: &ConnectorConfig) -> Result<ResultTable> {
        debug!("Databricks submitting: {}", sql);
        let request = StatementRequest {
            warehouse_id: &self.warehouse_id,
            statement: sql,
            wait_timeout: "50s",
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: "INLINE",
            catalog: self.catalog.as_deref(),
            schema: self.schema.as_deref(),
        };
        let response = self
            .http
            .post(format!("{}/api/2.0/sql/statements/", self.base))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;
        let mut statement: StatementResponse = read_json(response).await?;

        let deadline = Instant::now() + config.statement_timeout();
        while matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
            let id = statement.statement_id.clone().ok_or_else(|| {
                ConnectorError::Query("pending statement without a statement_id".to_string())
            })?;
            if Instant::now() >= deadline {
                self.cancel(&id).await;
                return Err(ConnectorError::Unreachable(format!(
                    "statement {} did not finish within {}s",
                    id, config.statement_timeout_secs
                )));
            }
            tokio::time::sleep(config.poll_interval()).await;
            let response = self
                .http
                .get(format!("{}/api/2.0/sql/statements/{}", self.base, id))
                .bearer_auth(&self.token)
                .send()
                .await?;
            statement = read_json(response).await?;
        }

        match statement.status.state.as_str() {
            "SUCCEEDED" => {}
            "FAILED" => {
                let message = statement
                    .status
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "statement failed".to_string());
                return Err(ConnectorError::Query(message));
            }
            "CANCELED" | "CLOSED" => {
                return Err(ConnectorError::Query(format!(
                    "statement was {}",
                    statement.status.state.to_ascii_lowercase()
                )))
            }
            other => {
                return Err(ConnectorError::Query(format!(
                    "unexpected statement state: {}",
                    other
                )))
            }
        }

        let columns: Vec<(String, TypeTag)> = statement
            .manifest
            .unwrap_or_default()
            .schema
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.type_tag()))
            .collect();
        let chunk = statement.result.unwrap_or_default();
        let mut rows = chunk.data_array;
        let mut next = chunk.next_chunk_internal_link;
        while let Some(link) = next {
            let response = self
                .http
                .get(format!("{}{}", self.base, link))
                .bearer_auth(&self.token)
                .send()
                .await?;
            let chunk: ResultChunk = read_json(response).await?;
            rows.extend(chunk.data_array);
            next = chunk.next_chunk_internal_link;
        }

        info!("Databricks returned {} rows", rows.len());
        Ok(text_table(columns, &rows))
    }

    async fn cancel(&self, statement_id: &str) {
        let url = format!("{}/api/2.0/sql/statements/{}/cancel", self.base, statement_id);
        if let Err(e) = self.http.post(url).bearer_auth(&self.token).send().await {
            warn!("Failed to cancel statement {}: {}", statement_id, e);
        }
    }

    async fn use_catalog(&mut self, catalog: &str, config: &ConnectorConfig) -> Result<()> {
        if self.catalog.as_deref() == Some(catalog) {
            return Ok(());
        }
        self.run(&format!("USE CATALOG {}", quote_ident(catalog)), config)
            .await?;
        self.catalog = Some(catalog.to_string());
        self.schema = None;
        debug!("Databricks context catalog -> {}", catalog);
        Ok(())
    }

    async fn use_schema(&mut self, schema: &str, config: &ConnectorConfig) -> Result<()> {
        if self.schema.as_deref() == Some(schema) {
            return Ok(());
        }
        self.run(&format!("USE SCHEMA {}", quote_ident(schema)), config)
            .await?;
        self.schema = Some(schema.to_string());
        debug!("Databricks context schema -> {}", schema);
        Ok(())
    }

    fn resolve_schema(&self, catalog: &str, schema: Option<&str>) -> String {
        if let Some(schema) = schema {
            return schema.to_string();
        }
        match (&self.catalog, &self.schema) {
            (Some(current), Some(schema)) if current == catalog => schema.clone(),
            _ => DEFAULT_SCHEMA.to_string(),
        }
    }

    fn qualified(&self, table: &TableRef) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&table.catalog),
            quote_ident(&self.resolve_schema(&table.catalog, table.schema.as_deref())),
            quote_ident(&table.table)
        )
    }
}

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Warehouse id from an HTTP path such as `/sql/1.0/warehouses/abc123`.
pub fn warehouse_id(http_path: &str) -> Result<String> {
    let mut segments = http_path.trim().trim_end_matches('/').split('/');
    while let Some(segment) = segments.next() {
        if segment == "warehouses" || segment == "endpoints" {
            if let Some(id) = segments.next().filter(|id| !id.is_empty()) {
                return Ok(id.to_string());
            }
        }
    }
    Err(ConnectorError::Authentication(format!(
        "cannot find a warehouse id in http_path '{}'",
        http_path
    )))
}

/// Text of the named column, else of the column at `fallback`.
fn column_text(result: &ResultTable, name: &str, fallback: usize) -> Result<Vec<String>> {
    result
        .columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .or_else(|| result.columns.get(fallback))
        .map(|c| c.values.iter().map(Value::to_text).collect())
        .ok_or_else(|| ConnectorError::Query(format!("result has no '{}' column", name)))
}

/// `DESCRIBE TABLE` rows up to the first blank or `#` section marker.
fn describe_fields(described: &ResultTable) -> Result<TableSchema> {
    let names = column_text(described, "col_name", 0)?;
    let types = column_text(described, "data_type", 1)?;
    let fields = names
        .into_iter()
        .zip(types)
        .take_while(|(name, _)| {
            let name = name.trim();
            !name.is_empty() && !name.starts_with('#')
        })
        .map(|(name, native)| SchemaField::new(name, TypeTag::from_native(&native)))
        .collect();
    Ok(TableSchema::new(fields))
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub struct DatabricksConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    session: Option<DatabricksSession>,
}

impl DatabricksConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            session: None,
        }
    }

    /// Current `(catalog, schema)`, once connected.
    pub fn context(&self) -> Option<(Option<&str>, Option<&str>)> {
        self.session
            .as_ref()
            .map(|s| (s.catalog.as_deref(), s.schema.as_deref()))
    }

    pub async fn use_catalog(&mut self, catalog: &str) -> Result<()> {
        let config = self.config.clone();
        self.session("use catalog")?.use_catalog(catalog, &config).await
    }

    pub async fn use_schema(&mut self, schema: &str) -> Result<()> {
        let config = self.config.clone();
        self.session("use schema")?.use_schema(schema, &config).await
    }

    async fn open(config: &ConnectorConfig, credential: &Credential) -> Result<DatabricksSession> {
        let host = credential.require("server_hostname")?;
        let warehouse_id = match credential.get("warehouse_id") {
            Some(id) => id.to_string(),
            None => warehouse_id(credential.require("http_path")?)?,
        };
        let mut session = DatabricksSession {
            http: config.http_client()?,
            base: base_url(host),
            token: credential.require("access_token")?.to_string(),
            warehouse_id,
            catalog: None,
            schema: None,
        };

        session.run("SELECT 1", config).await?;
        if let Some(catalog) = credential.get("catalog") {
            session.use_catalog(catalog, config).await?;
        }
        if let Some(schema) = credential.get("schema") {
            session.use_schema(schema, config).await?;
        }
        Ok(session)
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut DatabricksSession> {
        self.lifecycle.ensure_connected(operation)?;
        self.session
            .as_mut()
            .ok_or(ConnectorError::NotConnected(operation))
    }
}

#[async_trait]
impl Connector for DatabricksConnector {
    fn kind(&self) -> &'static str {
        "databricks"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Databricks
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.lifecycle.begin_connect()?;
        let outcome = match Self::open(&self.config, credential).await {
            Ok(session) => {
                info!(
                    "Connected to Databricks warehouse {} at {}",
                    session.warehouse_id, session.base
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("Databricks connect failed: {}", e);
                Err(e)
            }
        };
        self.lifecycle.finish_connect(outcome)
    }

    async fn list_catalogs(&mut self) -> Result<Vec<String>> {
        let config = self.config.clone();
        let result = self.session("list catalogs")?.run("SHOW CATALOGS", &config).await?;
        column_text(&result, "catalog", 0)
    }

    async fn list_schemas(&mut self, catalog: &str) -> Result<Vec<String>> {
        let config = self.config.clone();
        let session = self.session("list schemas")?;
        session.use_catalog(catalog, &config).await?;
        let result = session.run("SHOW SCHEMAS", &config).await?;
        column_text(&result, "databaseName", 0)
    }

    async fn list_tables(&mut self, catalog: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let config = self.config.clone();
        let session = self.session("list tables")?;
        let schema = session.resolve_schema(catalog, schema);
        let sql = format!(
            "SHOW TABLES IN {}.{}",
            quote_ident(catalog),
            quote_ident(&schema)
        );
        let result = session.run(&sql, &config).await?;
        column_text(&result, "tableName", 1)
    }

    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable> {
        let config = self.config.clone();
        let session = self.session("sample rows")?;
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            session.qualified(table),
            config.sample_limit(limit)
        );
        session.run(&sql, &config).await
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema> {
        let config = self.config.clone();
        let session = self.session("describe table")?;
        let sql = format!("DESCRIBE TABLE {}", session.qualified(table));
        describe_fields(&session.run(&sql, &config).await?)
    }

    async fn execute(&mut self, sql: &str) -> Result<ResultTable> {
        let config = self.config.clone();
        self.session("execute")?.run(sql, &config).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.lifecycle.close() {
            self.session = None;
            info!("Closed Databricks connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashviz_core::Column;

    #[test]
    fn warehouse_id_from_http_path() {
        assert_eq!(warehouse_id("/sql/1.0/warehouses/abc123").unwrap(), "abc123");
        assert_eq!(warehouse_id("/sql/1.0/endpoints/e42/").unwrap(), "e42");
        assert!(matches!(
            warehouse_id("/sql/protocolv1/o/0/cluster"),
            Err(ConnectorError::Authentication(_))
        ));
    }

    #[test]
    fn identifiers_use_backticks() {
        assert_eq!(quote_ident("main"), "`main`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn describe_stops_at_section_marker() {
        let text = |values: &[&str]| {
            values
                .iter()
                .map(|v| Value::String(v.to_string()))
                .collect::<Vec<_>>()
        };
        let described = ResultTable::new(vec![
            Column::new(
                "col_name",
                TypeTag::String,
                text(&["id", "amount", "", "# Partition Information", "id"]),
            ),
            Column::new(
                "data_type",
                TypeTag::String,
                text(&["bigint", "decimal(10,2)", "", "", "bigint"]),
            ),
        ]);
        let schema = describe_fields(&described).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("id"), Some(TypeTag::Integer));
        assert_eq!(schema.get("amount"), Some(TypeTag::Float));
    }

    #[test]
    fn manifest_type_text_wins() {
        let column: ColumnInfo = serde_json::from_value(serde_json::json!({
            "name": "price", "type_name": "DECIMAL", "type_text": "DECIMAL(10,2)"
        }))
        .unwrap();
        assert_eq!(column.type_tag(), TypeTag::Float);
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let mut connector = DatabricksConnector::new(ConnectorConfig::default());
        let table = TableRef::new("main", "t").with_schema("default");
        assert!(matches!(connector.list_catalogs().await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.list_schemas("main").await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.list_tables("main", None).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.sample_rows(&table, 1).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.table_schema(&table).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.execute("SELECT 1").await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.use_catalog("main").await, Err(ConnectorError::NotConnected(_))));
    }

    #[tokio::test]
    async fn missing_token_fails_connect() {
        let mut connector = DatabricksConnector::new(ConnectorConfig::default());
        let credential = Credential::new()
            .with("server_hostname", "dbc.example.test")
            .with("http_path", "/sql/1.0/warehouses/w1");
        let err = connector.connect(&credential).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert_eq!(connector.state(), ConnectionState::Failed);
    }
}
