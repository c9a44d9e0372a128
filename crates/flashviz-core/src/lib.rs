//! FlashViz Core - embedded query engine, result tables and type tags
//!
//! This crate provides the Local Query Engine built on Apache Arrow DataFusion
//! together with the backend-neutral result and schema types every connector
//! returns.

pub mod engine;
pub mod error;
pub mod table;
pub mod types;

pub use engine::{LocalQueryEngine, DATA_TABLE};
pub use error::EngineError;
pub use table::{parse_timestamp, Column, ResultTable, SchemaField, TableSchema, Value};
pub use types::{infer_type_tag, TypeTag};

// Re-export for downstream consumers
pub use arrow::record_batch::RecordBatch;
