//! Local file connector.
//!
//! "Connect" parses a CSV, TSV, Parquet or Excel file into the embedded
//! engine. The file is one catalog (its base name) holding one table,
//! `data`, with no schema level.

use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use flashviz_core::{Column, LocalQueryEngine, ResultTable, TableSchema, TypeTag, Value, DATA_TABLE};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{info, warn};

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{Connector, TableRef};

/// Rows read to infer CSV column types.
const CSV_INFERENCE_ROWS: usize = 1000;

/// Stand-in for cells past the end of a short worksheet row.
static EMPTY_CELL: Data = Data::Empty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Tsv,
    Parquet,
    Excel,
}

impl FileType {
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "tsv" => Ok(FileType::Tsv),
            "parquet" => Ok(FileType::Parquet),
            "excel" | "xlsx" | "xls" => Ok(FileType::Excel),
            other => Err(ConnectorError::Authentication(format!(
                "unsupported file_type '{}'",
                other
            ))),
        }
    }
}

pub struct LocalFileConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    engine: LocalQueryEngine,
    catalog: String,
}

impl LocalFileConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            engine: LocalQueryEngine::new(),
            catalog: String::new(),
        }
    }

    async fn load(&mut self, credential: &Credential) -> Result<()> {
        let path = PathBuf::from(credential.require("file_path")?);
        let file_type = FileType::parse(credential.get_or("file_type", "csv"))?;
        if !path.is_file() {
            return Err(ConnectorError::Unreachable(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let read_path = path.clone();
        let (schema, batches) = tokio::task::spawn_blocking(move || read_file(&read_path, file_type))
            .await
            .map_err(|e| ConnectorError::SourceLoad(e.to_string()))??;

        self.engine
            .register_data(schema, batches)
            .map_err(|e| ConnectorError::SourceLoad(e.to_string()))?;
        self.catalog = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(())
    }

    fn check_table(&self, table: &TableRef) -> Result<()> {
        if table.table != DATA_TABLE {
            return Err(ConnectorError::Query(format!(
                "table '{}' does not exist; local files expose only '{}'",
                table.table, DATA_TABLE
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for LocalFileConnector {
    fn kind(&self) -> &'static str {
        "local_file"
    }

    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.lifecycle.begin_connect()?;
        let outcome = self.load(credential).await;
        match &outcome {
            Ok(()) => info!("Loaded local file '{}'", self.catalog),
            Err(e) => warn!("Local file connect failed: {}", e),
        }
        self.lifecycle.finish_connect(outcome)
    }

    async fn list_catalogs(&mut self) -> Result<Vec<String>> {
        self.ensure_connected("list catalogs")?;
        Ok(vec![self.catalog.clone()])
    }

    async fn list_tables(&mut self, _catalog: &str, _schema: Option<&str>) -> Result<Vec<String>> {
        self.ensure_connected("list tables")?;
        Ok(vec![DATA_TABLE.to_string()])
    }

    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable> {
        self.ensure_connected("sample rows")?;
        self.check_table(table)?;
        Ok(self.engine.sample(self.config.sample_limit(limit)).await?)
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema> {
        self.ensure_connected("describe table")?;
        self.check_table(table)?;
        Ok(self.engine.schema()?)
    }

    async fn execute(&mut self, sql: &str) -> Result<ResultTable> {
        self.ensure_connected("execute")?;
        Ok(self.engine.query(sql).await?)
    }

    async fn close(&mut self) -> Result<()> {
        if self.lifecycle.close() {
            self.engine = LocalQueryEngine::new();
            info!("Closed local file '{}'", self.catalog);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn read_file(path: &Path, file_type: FileType) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let load_err = |e: &dyn std::fmt::Display| {
        ConnectorError::SourceLoad(format!("{}: {}", path.display(), e))
    };
    match file_type {
        FileType::Csv | FileType::Tsv => {
            let delimiter = if file_type == FileType::Tsv { b'\t' } else { b',' };
            read_delimited(path, delimiter).map_err(|e| load_err(&e))
        }
        FileType::Parquet => read_parquet(path).map_err(|e| load_err(&e)),
        FileType::Excel => {
            let table = read_workbook(path)?;
            let batch = table.to_record_batch().map_err(|e| load_err(&e))?;
            Ok((batch.schema(), vec![batch]))
        }
    }
}

fn read_delimited(
    path: &Path,
    delimiter: u8,
) -> std::result::Result<(SchemaRef, Vec<RecordBatch>), arrow::error::ArrowError> {
    let mut file = File::open(path)?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format.infer_schema(&mut file, Some(CSV_INFERENCE_ROWS))?;
    file.rewind()?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn read_parquet(
    path: &Path,
) -> std::result::Result<(SchemaRef, Vec<RecordBatch>), parquet::errors::ParquetError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

/// First worksheet, first row as header. Each column gets the narrowest
/// type all of its non-empty cells agree on; a column with blanks is never
/// INTEGER and an entirely blank one is FLOAT.
fn read_workbook(path: &Path) -> Result<ResultTable> {
    let load_err = |e: &dyn std::fmt::Display| {
        ConnectorError::SourceLoad(format!("{}: {}", path.display(), e))
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| load_err(&e))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| load_err(&"workbook has no worksheets"))?;
    let range = workbook.worksheet_range(&sheet).map_err(|e| load_err(&e))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell {
                Data::Empty => format!("column_{}", idx + 1),
                other => other.to_string(),
            })
            .collect(),
        None => return Ok(ResultTable::empty()),
    };
    let body: Vec<&[Data]> = rows.collect();

    let columns = header
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells: Vec<&Data> = body
                .iter()
                .map(|row| row.get(idx).unwrap_or(&EMPTY_CELL))
                .collect();
            workbook_column(name, &cells)
        })
        .collect();
    Ok(ResultTable::new(columns))
}

fn workbook_column(name: String, cells: &[&Data]) -> Column {
    let present = || cells.iter().filter(|c| !matches!(c, Data::Empty));
    // Blanks force a float column, like a NaN-bearing numeric column would.
    let complete = present().count() == cells.len();
    let tag = if present().next().is_none() {
        TypeTag::Float
    } else if complete && present().all(|c| matches!(c, Data::Int(_)) || whole_float(c)) {
        TypeTag::Integer
    } else if present().all(|c| matches!(c, Data::Int(_) | Data::Float(_))) {
        TypeTag::Float
    } else if present().all(|c| matches!(c, Data::Bool(_))) {
        TypeTag::Boolean
    } else if present().all(|c| cell_timestamp(c).is_some()) {
        TypeTag::Timestamp
    } else {
        TypeTag::String
    };

    let values = cells
        .iter()
        .map(|cell| match (tag, cell) {
            (_, Data::Empty) => Value::Null,
            (TypeTag::Integer, Data::Int(i)) => Value::Integer(*i),
            (TypeTag::Integer, Data::Float(f)) => Value::Integer(*f as i64),
            (TypeTag::Float, Data::Int(i)) => Value::Float(*i as f64),
            (TypeTag::Float, Data::Float(f)) => Value::Float(*f),
            (TypeTag::Boolean, Data::Bool(b)) => Value::Boolean(*b),
            (TypeTag::Timestamp, c) => cell_timestamp(c).map(Value::Timestamp).unwrap_or(Value::Null),
            (_, other) => Value::String(other.to_string()),
        })
        .collect();
    Column::new(name, tag, values)
}

fn whole_float(cell: &Data) -> bool {
    matches!(cell, Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64)
}

fn cell_timestamp(cell: &Data) -> Option<chrono::NaiveDateTime> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime(),
        Data::DateTimeIso(text) => flashviz_core::parse_timestamp(text),
        _ => None,
    }
}
