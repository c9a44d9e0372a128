//! Normalized column type tags.
//!
//! Every backend reports column types in its own vocabulary (Arrow types for
//! the embedded engine, `NUMBER(38,0)` for Snowflake, `INT64` for BigQuery,
//! ...). Consumers only ever see one of five [`TypeTag`]s.

use std::fmt;
use std::str::FromStr;

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

/// A normalized column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TypeTag {
    Integer,
    Float,
    String,
    Timestamp,
    Boolean,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Integer => "INTEGER",
            TypeTag::Float => "FLOAT",
            TypeTag::String => "STRING",
            TypeTag::Timestamp => "TIMESTAMP",
            TypeTag::Boolean => "BOOLEAN",
        }
    }

    /// Map an Arrow data type onto a tag.
    pub fn from_arrow(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => TypeTag::Integer,
            DataType::Decimal128(_, 0) | DataType::Decimal256(_, 0) => TypeTag::Integer,
            DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => TypeTag::Float,
            DataType::Boolean => TypeTag::Boolean,
            DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
                TypeTag::Timestamp
            }
            DataType::Dictionary(_, value) => TypeTag::from_arrow(value),
            _ => TypeTag::String,
        }
    }

    /// Map a warehouse-native type name onto a tag.
    ///
    /// Accepts the spellings used by Snowflake (`NUMBER(38,0)`,
    /// `TIMESTAMP_NTZ(9)`), BigQuery (`INT64`, `FLOAT64`, `BIGNUMERIC`) and
    /// Databricks (`decimal(10,2)`, `array<string>`). Anything unrecognized
    /// falls back to [`TypeTag::String`].
    pub fn from_native(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        if upper.contains('<') {
            // ARRAY<...>, STRUCT<...>, MAP<...>
            return TypeTag::String;
        }

        let (base, params) = match upper.find('(') {
            Some(open) => {
                let close = upper.rfind(')').unwrap_or(upper.len());
                (upper[..open].trim(), Some(&upper[open + 1..close.max(open + 1)]))
            }
            None => (upper.as_str(), None),
        };

        match base {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "BYTEINT" | "INT64"
            | "INT32" | "INT16" | "INT8" | "LONG" | "SHORT" | "BYTE" => TypeTag::Integer,
            "NUMBER" | "DECIMAL" | "NUMERIC" | "BIGNUMERIC" | "BIGDECIMAL" | "DEC"
            | "FIXED" => match params.and_then(decimal_scale) {
                Some(0) => TypeTag::Integer,
                Some(_) => TypeTag::Float,
                None if matches!(base, "NUMBER" | "DECIMAL" | "DEC" | "FIXED") => {
                    TypeTag::Integer
                }
                None => TypeTag::Float,
            },
            "FLOAT" | "FLOAT4" | "FLOAT8" | "FLOAT64" | "DOUBLE" | "DOUBLE PRECISION"
            | "REAL" => TypeTag::Float,
            "BOOL" | "BOOLEAN" => TypeTag::Boolean,
            "DATE" | "DATETIME" | "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ"
            | "TIMESTAMP_TZ" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITHOUT TIME ZONE" => {
                TypeTag::Timestamp
            }
            _ => TypeTag::String,
        }
    }
}

/// Scale of a `(precision, scale)` parameter list. A lone precision means scale 0.
fn decimal_scale(params: &str) -> Option<u32> {
    let mut parts = params.split(',').map(str::trim);
    let precision = parts.next()?;
    precision.parse::<u32>().ok()?;
    match parts.next() {
        Some(scale) => scale.parse().ok(),
        None => Some(0),
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" => Ok(TypeTag::Integer),
            "FLOAT" => Ok(TypeTag::Float),
            "STRING" => Ok(TypeTag::String),
            "TIMESTAMP" => Ok(TypeTag::Timestamp),
            "BOOLEAN" => Ok(TypeTag::Boolean),
            other => Err(format!("unknown type tag: {}", other)),
        }
    }
}

/// Classify a column from sampled text cells.
///
/// All cells integers → `INTEGER`; otherwise all cells numeric → `FLOAT`;
/// anything else, including an empty cell or an empty sample, → `STRING`.
/// Mostly-numeric columns with a stray non-numeric value land
/// on `STRING`.
pub fn infer_type_tag<'a, I>(values: I) -> TypeTag
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = false;
    let mut all_int = true;
    for raw in values {
        seen = true;
        let value = raw.trim();
        if value.parse::<i64>().is_ok() {
            continue;
        }
        if value.parse::<f64>().is_ok() {
            all_int = false;
            continue;
        }
        return TypeTag::String;
    }

    match (seen, all_int) {
        (false, _) => TypeTag::String,
        (true, true) => TypeTag::Integer,
        (true, false) => TypeTag::Float,
    }
}
