//! Google Sheets connector.
//!
//! A workbook is the catalog and its worksheets are the tables. The Sheets
//! API has no typed schema, so column types are inferred from sampled text.
//! There is no SQL endpoint either: `execute` loads the active worksheet
//! into the embedded engine as `data` and queries it there.

use async_trait::async_trait;
use flashviz_core::{infer_type_tag, Column, LocalQueryEngine, ResultTable, TableSchema};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::google_auth::{ServiceAccountKey, TokenSource, DRIVE_READONLY_SCOPE, SHEETS_READONLY_SCOPE};
use crate::http::{base_url, read_json};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{Connector, TableRef};

const DEFAULT_ENDPOINT: &str = "https://sheets.googleapis.com";

/// Rows sampled to infer a worksheet's schema.
const SCHEMA_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    properties: SheetProperties,
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

struct SheetsSession {
    http: reqwest::Client,
    tokens: TokenSource,
    endpoint: String,
    spreadsheet_id: String,
    title: String,
    worksheets: Vec<String>,
    active: String,
}

impl SheetsSession {
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ConnectorError::Unreachable(format!("invalid api_endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Unreachable("invalid api_endpoint".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(&mut self, url: Url) -> Result<T> {
        let token = self.tokens.access_token().await?;
        debug!("Sheets GET {}", url.path());
        let response = self.http.get(url).bearer_auth(token).send().await?;
        read_json(response).await
    }

    async fn metadata(&mut self) -> Result<SpreadsheetMeta> {
        let mut url = self.url(&["v4", "spreadsheets", self.spreadsheet_id.as_str()])?;
        url.query_pairs_mut()
            .append_pair("fields", "properties.title,sheets.properties.title");
        self.get(url).await
    }

    /// Header row plus up to `rows` data rows (all rows when `None`).
    async fn values(&mut self, worksheet: &str, rows: Option<usize>) -> Result<ResultTable> {
        let range = match rows {
            Some(n) => format!("{}!1:{}", quote_sheet(worksheet), n + 1),
            None => quote_sheet(worksheet),
        };
        let url = self.url(&[
            "v4",
            "spreadsheets",
            self.spreadsheet_id.as_str(),
            "values",
            range.as_str(),
        ])?;
        let body: ValueRange = self.get(url).await?;
        Ok(rows_to_table(body.values))
    }
}

pub struct GoogleSheetsConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    session: Option<SheetsSession>,
    engine: LocalQueryEngine,
}

impl GoogleSheetsConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            session: None,
            engine: LocalQueryEngine::new(),
        }
    }

    async fn open(&self, credential: &Credential) -> Result<SheetsSession> {
        let credentials_path = credential.require("credentials_path")?;
        let spreadsheet_id = spreadsheet_id(credential.require("sheet_url")?)?;
        let endpoint = base_url(credential.get_or("api_endpoint", DEFAULT_ENDPOINT));

        let http = self.config.http_client()?;
        let key = ServiceAccountKey::from_file(credentials_path).await?;
        let tokens = TokenSource::new(
            key,
            &[SHEETS_READONLY_SCOPE, DRIVE_READONLY_SCOPE],
            http.clone(),
        )?;

        let mut session = SheetsSession {
            http,
            tokens,
            endpoint,
            spreadsheet_id,
            title: String::new(),
            worksheets: Vec::new(),
            active: String::new(),
        };
        let meta = session.metadata().await?;
        session.title = meta.properties.title;
        session.worksheets = meta.sheets.into_iter().map(|s| s.properties.title).collect();

        session.active = match credential.get("worksheet_name") {
            Some(name) if session.worksheets.iter().any(|w| w == name) => name.to_string(),
            Some(name) => {
                return Err(ConnectorError::Authentication(format!(
                    "worksheet '{}' not found in '{}'",
                    name, session.title
                )))
            }
            None => session.worksheets.first().cloned().ok_or_else(|| {
                ConnectorError::SourceLoad(format!("spreadsheet '{}' has no worksheets", session.title))
            })?,
        };
        Ok(session)
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut SheetsSession> {
        self.lifecycle.ensure_connected(operation)?;
        self.session
            .as_mut()
            .ok_or(ConnectorError::NotConnected(operation))
    }
}

#[async_trait]
impl Connector for GoogleSheetsConnector {
    fn kind(&self) -> &'static str {
        "google_sheets"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sheets
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.lifecycle.begin_connect()?;
        let outcome = self.open(credential).await;
        let outcome = match outcome {
            Ok(session) => {
                info!(
                    "Connected to spreadsheet '{}' ({} worksheets, active '{}')",
                    session.title,
                    session.worksheets.len(),
                    session.active
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("Google Sheets connect failed: {}", e);
                Err(e)
            }
        };
        self.lifecycle.finish_connect(outcome)
    }

    async fn list_catalogs(&mut self) -> Result<Vec<String>> {
        let session = self.session("list catalogs")?;
        Ok(vec![session.title.clone()])
    }

    async fn list_tables(&mut self, _catalog: &str, _schema: Option<&str>) -> Result<Vec<String>> {
        let session = self.session("list tables")?;
        Ok(session.worksheets.clone())
    }

    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable> {
        let limit = self.config.sample_limit(limit);
        let session = self.session("sample rows")?;
        let mut result = session.values(&table.table, Some(limit)).await?;
        result.truncate(limit);
        Ok(result)
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema> {
        let session = self.session("describe table")?;
        let sample = session.values(&table.table, Some(SCHEMA_SAMPLE_ROWS)).await?;
        Ok(sample.schema())
    }

    async fn execute(&mut self, sql: &str) -> Result<ResultTable> {
        self.lifecycle.ensure_connected("execute")?;
        if !self.engine.is_loaded() {
            let session = self
                .session
                .as_mut()
                .ok_or(ConnectorError::NotConnected("execute"))?;
            let active = session.active.clone();
            let table = session.values(&active, None).await?;
            info!("Loaded worksheet '{}' ({} rows) into engine", active, table.num_rows());
            self.engine.register_table(&table)?;
        }
        Ok(self.engine.query(sql).await?)
    }

    async fn close(&mut self) -> Result<()> {
        if self.lifecycle.close() {
            self.session = None;
            self.engine = LocalQueryEngine::new();
            info!("Closed Google Sheets connection");
        }
        Ok(())
    }
}

/// Extract the spreadsheet id from a `/spreadsheets/d/<id>/...` URL. A bare
/// id is accepted as-is.
pub fn spreadsheet_id(sheet_url: &str) -> Result<String> {
    const MARKER: &str = "/spreadsheets/d/";
    let sheet_url = sheet_url.trim();
    let id = match sheet_url.find(MARKER) {
        Some(pos) => sheet_url[pos + MARKER.len()..]
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default(),
        None if !sheet_url.contains('/') => sheet_url,
        None => "",
    };
    if id.is_empty() {
        return Err(ConnectorError::Authentication(format!(
            "cannot find a spreadsheet id in '{}'",
            sheet_url
        )));
    }
    Ok(id.to_string())
}

/// A1 sheet reference with embedded quotes doubled.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn cell_text(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First row names the columns; shorter rows are padded with empty cells.
fn rows_to_table(rows: Vec<Vec<serde_json::Value>>) -> ResultTable {
    let mut rows = rows.into_iter();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell_text(cell) {
                name if name.trim().is_empty() => format!("column_{}", idx + 1),
                name => name,
            })
            .collect(),
        None => return ResultTable::empty(),
    };
    let body: Vec<Vec<String>> = rows
        .map(|row| {
            (0..header.len())
                .map(|idx| row.get(idx).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let columns = header
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let raws: Vec<Option<String>> = body.iter().map(|row| Some(row[idx].clone())).collect();
            let tag = infer_type_tag(body.iter().map(|row| row[idx].as_str()));
            Column::from_raw(name, tag, &raws)
        })
        .collect();
    ResultTable::new(columns)
}
