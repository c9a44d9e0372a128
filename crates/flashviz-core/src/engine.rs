//! Local query engine built on DataFusion
//!
//! Backs the adapters that have no SQL endpoint of their own (local files
//! and Google Sheets). Loaded data is always registered as the table `data`.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SQLOptions;
use datafusion::prelude::*;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::table::{ResultTable, TableSchema};

/// Fixed name under which loaded data is queryable.
pub const DATA_TABLE: &str = "data";

/// The in-process analytical engine wrapping DataFusion's SessionContext
pub struct LocalQueryEngine {
    ctx: SessionContext,
    schema: Option<SchemaRef>,
}

impl LocalQueryEngine {
    /// Create an engine whose SQL parser speaks the DuckDB dialect
    pub fn new() -> Self {
        let config = SessionConfig::new()
            .set_str("datafusion.sql_parser.dialect", "DuckDB")
            .with_target_partitions(1);
        let ctx = SessionContext::new_with_config(config);

        info!("LocalQueryEngine initialized");

        Self { ctx, schema: None }
    }

    /// Get a reference to the underlying SessionContext
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Whether a `data` table has been registered.
    pub fn is_loaded(&self) -> bool {
        self.schema.is_some()
    }

    /// Register batches as the `data` table, replacing any previous one.
    ///
    /// The batches are kept in a single partition so scans return rows in
    /// load order.
    pub fn register_data(
        &mut self,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), EngineError> {
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        let table = MemTable::try_new(schema.clone(), vec![batches])?;
        self.ctx.deregister_table(DATA_TABLE)?;
        self.ctx.register_table(DATA_TABLE, Arc::new(table))?;
        self.schema = Some(schema);
        info!("Registered '{}' with {} rows", DATA_TABLE, rows);
        Ok(())
    }

    /// Register a result table (e.g. a fetched worksheet) as `data`.
    pub fn register_table(&mut self, table: &ResultTable) -> Result<(), EngineError> {
        let batch = table.to_record_batch()?;
        self.register_data(batch.schema(), vec![batch])
    }

    /// Normalized schema of the `data` table.
    pub fn schema(&self) -> Result<TableSchema, EngineError> {
        let schema = self.schema.as_ref().ok_or(EngineError::NoData)?;
        Ok(TableSchema::from_arrow(schema))
    }

    /// First `limit` rows of `data`, in load order.
    pub async fn sample(&self, limit: usize) -> Result<ResultTable, EngineError> {
        if self.schema.is_none() {
            return Err(EngineError::NoData);
        }
        let df = self.ctx.table(DATA_TABLE).await?.limit(0, Some(limit))?;
        collect(df).await
    }

    /// Run a read-only SQL query.
    ///
    /// DDL, DML and session statements are refused by the engine itself.
    pub async fn query(&self, sql: &str) -> Result<ResultTable, EngineError> {
        debug!("LocalQueryEngine executing: {}", sql);
        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);
        let df = self.ctx.sql_with_options(sql, options).await?;
        let table = collect(df).await?;
        info!("LocalQueryEngine returned {} rows", table.num_rows());
        Ok(table)
    }
}

impl Default for LocalQueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect(df: DataFrame) -> Result<ResultTable, EngineError> {
    let schema: SchemaRef = Arc::clone(df.schema().inner());
    let batches = df.collect().await?;
    Ok(ResultTable::from_batches(&schema, &batches)?)
}
