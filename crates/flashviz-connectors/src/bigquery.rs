//! BigQuery connector over the v2 REST API.
//!
//! Datasets are catalogs; tables are addressed as `project.dataset.table`.
//! Queries use standard SQL through `jobs.query`, polling
//! `jobs.getQueryResults` until the job completes and following page tokens.

use std::time::Instant;

use async_trait::async_trait;
use flashviz_core::{ResultTable, SchemaField, TableSchema, TypeTag};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::google_auth::{ServiceAccountKey, TokenSource, BIGQUERY_SCOPE};
use crate::http::{base_url, json_cell, read_json, text_table};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{Connector, TableRef};

const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// Longest single wait the server holds a `jobs.query` call open.
const MAX_WAIT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct TableMeta {
    schema: Option<FieldList>,
}

#[derive(Debug, Default, Deserialize)]
struct FieldList {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
}

impl FieldSchema {
    fn type_tag(&self) -> TypeTag {
        if self.mode.as_deref() == Some("REPEATED") {
            return TypeTag::String;
        }
        TypeTag::from_native(&self.field_type)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<FieldList>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct BigQuerySession {
    http: reqwest::Client,
    tokens: TokenSource,
    endpoint: String,
    project_id: String,
    location: Option<String>,
}

impl BigQuerySession {
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ConnectorError::Unreachable(format!("invalid api_endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Unreachable("invalid api_endpoint".to_string()))?
            .pop_if_empty()
            .extend(["bigquery", "v2", "projects", self.project_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(&mut self, url: Url) -> Result<T> {
        let token = self.tokens.access_token().await?;
        debug!("BigQuery GET {}", url.path());
        let response = self.http.get(url).bearer_auth(token).send().await?;
        read_json(response).await
    }

    async fn list_datasets(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&["datasets"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: DatasetList = self.get(url).await?;
            names.extend(page.datasets.into_iter().map(|d| d.dataset_reference.dataset_id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(names),
            }
        }
    }

    async fn list_tables(&mut self, dataset: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&["datasets", dataset, "tables"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: TableList = self.get(url).await?;
            names.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(names),
            }
        }
    }

    async fn table_schema(&mut self, dataset: &str, table: &str) -> Result<TableSchema> {
        let url = self.url(&["datasets", dataset, "tables", table])?;
        let meta: TableMeta = self.get(url).await?;
        let fields = meta
            .schema
            .unwrap_or_default()
            .fields
            .iter()
            .map(|f| SchemaField::new(f.name.clone(), f.type_tag()))
            .collect();
        Ok(TableSchema::new(fields))
    }

    async fn query(&mut self, sql: &str, config: &ConnectorConfig) -> Result<ResultTable> {
        debug!("BigQuery submitting: {}", sql);
        let deadline = Instant::now() + config.statement_timeout();
        let wait_ms = MAX_WAIT_MS.min(config.statement_timeout_secs * 1000);

        let token = self.tokens.access_token().await?;
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: wait_ms,
            location: self.location.as_deref(),
        };
        let response = self
            .http
            .post(self.url(&["queries"])?)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        let mut page: QueryResponse = read_json(response).await?;
        fail_on_errors(&page)?;

        let job = page.job_reference.clone().ok_or_else(|| {
            ConnectorError::Query("query response carries no job reference".to_string())
        })?;
        while !page.job_complete {
            if Instant::now() >= deadline {
                return Err(ConnectorError::Unreachable(format!(
                    "BigQuery job {} did not finish within {}s",
                    job.job_id, config.statement_timeout_secs
                )));
            }
            tokio::time::sleep(config.poll_interval()).await;
            page = self.results_page(&job, None, wait_ms).await?;
        }

        let columns: Vec<(String, TypeTag)> = page
            .schema
            .take()
            .unwrap_or_default()
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.type_tag()))
            .collect();

        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        loop {
            rows.extend(
                page.rows
                    .iter()
                    .map(|row| row.f.iter().map(|cell| json_cell(&cell.v)).collect()),
            );
            match page.page_token.take() {
                Some(token) if !token.is_empty() => {
                    page = self.results_page(&job, Some(&token), wait_ms).await?;
                }
                _ => break,
            }
        }

        info!("BigQuery job {} returned {} rows", job.job_id, rows.len());
        Ok(text_table(columns, &rows))
    }

    async fn results_page(
        &mut self,
        job: &JobReference,
        page_token: Option<&str>,
        wait_ms: u64,
    ) -> Result<QueryResponse> {
        let mut url = self.url(&["queries", job.job_id.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeoutMs", &wait_ms.to_string());
            if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
                query.append_pair("location", location);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let page: QueryResponse = self.get(url).await?;
        fail_on_errors(&page)?;
        Ok(page)
    }
}

/// A completed job with errors and no result schema failed.
fn fail_on_errors(page: &QueryResponse) -> Result<()> {
    if page.job_complete && page.schema.is_none() && !page.errors.is_empty() {
        let message = page
            .errors
            .iter()
            .filter_map(|e| e.message.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConnectorError::Query(message));
    }
    Ok(())
}

/// Backtick-quoted `project.dataset.table` path. Backslashes and backticks
/// inside a part are escaped so a name cannot close the quoting early.
pub fn qualified_table(project: &str, dataset: &str, table: &str) -> String {
    let escape = |part: &str| part.replace('\\', "\\\\").replace('`', "\\`");
    format!("`{}.{}.{}`", escape(project), escape(dataset), escape(table))
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub struct BigQueryConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    session: Option<BigQuerySession>,
}

impl BigQueryConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            session: None,
        }
    }

    /// Project queries run against, once connected.
    pub fn project_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.project_id.as_str())
    }

    async fn open(config: &ConnectorConfig, credential: &Credential) -> Result<BigQuerySession> {
        let key = ServiceAccountKey::from_file(credential.require("credentials_path")?).await?;
        let project_id = match credential.get("project_id") {
            Some(project) => project.to_string(),
            None => key.project_id.clone().ok_or_else(|| {
                ConnectorError::Authentication(
                    "no project_id given and none in the service account key".to_string(),
                )
            })?,
        };

        let http = config.http_client()?;
        let tokens = TokenSource::new(key, &[BIGQUERY_SCOPE], http.clone())?;
        let mut session = BigQuerySession {
            http,
            tokens,
            endpoint: base_url(credential.get_or("api_endpoint", DEFAULT_ENDPOINT)),
            project_id,
            location: credential.get("location").map(str::to_string),
        };

        // A one-item dataset listing proves the token and project.
        let mut check = session.url(&["datasets"])?;
        check.query_pairs_mut().append_pair("maxResults", "1");
        let _: DatasetList = session.get(check).await?;
        Ok(session)
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut BigQuerySession> {
        self.lifecycle.ensure_connected(operation)?;
        self.session
            .as_mut()
            .ok_or(ConnectorError::NotConnected(operation))
    }
}

#[async_trait]
impl Connector for BigQueryConnector {
    fn kind(&self) -> &'static str {
        "bigquery"
    }

    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.lifecycle.begin_connect()?;
        let outcome = match Self::open(&self.config, credential).await {
            Ok(session) => {
                info!("Connected to BigQuery project '{}'", session.project_id);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("BigQuery connect failed: {}", e);
                Err(e)
            }
        };
        self.lifecycle.finish_connect(outcome)
    }

    async fn list_catalogs(&mut self) -> Result<Vec<String>> {
        self.session("list catalogs")?.list_datasets().await
    }

    async fn list_tables(&mut self, catalog: &str, _schema: Option<&str>) -> Result<Vec<String>> {
        self.session("list tables")?.list_tables(catalog).await
    }

    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable> {
        let config = self.config.clone();
        let session = self.session("sample rows")?;
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            qualified_table(&session.project_id, &table.catalog, &table.table),
            config.sample_limit(limit)
        );
        session.query(&sql, &config).await
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema> {
        self.session("describe table")?
            .table_schema(&table.catalog, &table.table)
            .await
    }

    async fn execute(&mut self, sql: &str) -> Result<ResultTable> {
        let config = self.config.clone();
        self.session("execute")?.query(sql, &config).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.lifecycle.close() {
            self.session = None;
            info!("Closed BigQuery connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_tables_with_backticks() {
        assert_eq!(
            qualified_table("proj", "sales", "orders"),
            "`proj.sales.orders`"
        );
    }

    #[test]
    fn backticks_in_names_cannot_close_quoting() {
        assert_eq!(
            qualified_table("proj", "sales", "x` ; DROP TABLE t; `"),
            "`proj.sales.x\\` ; DROP TABLE t; \\``"
        );
        assert_eq!(qualified_table("proj", "a\\b", "t"), "`proj.a\\\\b.t`");
    }

    #[test]
    fn repeated_fields_are_strings() {
        let field = FieldSchema {
            name: "tags".into(),
            field_type: "STRING".into(),
            mode: Some("REPEATED".into()),
        };
        assert_eq!(field.type_tag(), TypeTag::String);
        let field = FieldSchema {
            name: "n".into(),
            field_type: "INTEGER".into(),
            mode: Some("NULLABLE".into()),
        };
        assert_eq!(field.type_tag(), TypeTag::Integer);
    }

    #[test]
    fn completed_job_errors_surface_verbatim() {
        let page: QueryResponse = serde_json::from_value(serde_json::json!({
            "jobComplete": true,
            "errors": [{"message": "Unrecognized name: foo at [1:8]"}]
        }))
        .unwrap();
        match fail_on_errors(&page) {
            Err(ConnectorError::Query(msg)) => assert_eq!(msg, "Unrecognized name: foo at [1:8]"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let mut connector = BigQueryConnector::new(ConnectorConfig::default());
        let table = TableRef::new("sales", "orders");
        assert!(matches!(connector.list_catalogs().await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.list_tables("sales", None).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.sample_rows(&table, 5).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.table_schema(&table).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.execute("SELECT 1").await, Err(ConnectorError::NotConnected(_))));
        connector.close().await.unwrap();
        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_file_is_authentication_error() {
        let mut connector = BigQueryConnector::new(ConnectorConfig::default());
        let credential = Credential::new().with("credentials_path", "/nonexistent/key.json");
        let err = connector.connect(&credential).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert_eq!(connector.state(), ConnectionState::Failed);
    }
}
