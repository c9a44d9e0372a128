//! Typed errors for the core crate.

use arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use thiserror::Error;

/// Errors raised by the local query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No `data` table has been registered yet.
    #[error("no data loaded into the local query engine")]
    NoData,

    /// DataFusion rejected or failed to run a query.
    #[error("{0}")]
    DataFusion(#[from] DataFusionError),

    /// Converting between Arrow batches and result tables failed.
    #[error("arrow: {0}")]
    Arrow(#[from] ArrowError),
}
