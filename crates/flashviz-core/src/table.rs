//! Result tables: ordered, named, row-aligned columns with one type tag each.
//!
//! Both sampling and query execution return a [`ResultTable`] regardless of
//! whether the rows came from the embedded engine (Arrow batches) or from a
//! warehouse REST API (JSON text cells).

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringBuilder, TimestampMicrosecondArray, TimestampMicrosecondBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::TypeTag;

// ===========================================================================
// Values
// ===========================================================================

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    String(String),
}

impl Value {
    /// Parse raw text as the given tag. `None` when the text does not fit.
    pub fn parse(tag: TypeTag, raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        match tag {
            TypeTag::String => Some(Value::String(raw.to_string())),
            TypeTag::Integer => trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    // "42.0" and "4.2E1" style integers
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(Value::Integer),
            TypeTag::Float => trimmed.parse::<f64>().ok().map(Value::Float),
            TypeTag::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(Value::Boolean(true)),
                "false" | "f" | "0" | "no" => Some(Value::Boolean(false)),
                _ => None,
            },
            TypeTag::Timestamp => parse_timestamp(trimmed).map(Value::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the value as plain text (nulls render as the empty string).
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

/// Parse the timestamp spellings warehouses put on the wire.
///
/// Handles RFC 3339, ISO date-times with `T` or space separators, plain
/// dates, and epoch seconds (`1700000000.123456789`, `1.7E9`, optionally
/// followed by a timezone-offset token as Snowflake's `TIMESTAMP_TZ` does).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%d %H:%M:%S%.f UTC",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    let epoch = raw.split_whitespace().next()?;
    parse_epoch_seconds(epoch)
}

fn parse_epoch_seconds(raw: &str) -> Option<NaiveDateTime> {
    if raw.contains(['e', 'E']) {
        let secs = raw.parse::<f64>().ok()?;
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round() as u32;
        return DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            .map(|dt| dt.naive_utc());
    }

    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    let secs = whole.parse::<i64>().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
        digits.parse::<u32>().ok()?
    };
    // "-1.5" means 1.5 seconds before the epoch
    let (secs, nanos) = if whole.starts_with('-') && nanos > 0 {
        (secs - 1, 1_000_000_000 - nanos)
    } else {
        (secs, nanos)
    };
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

// ===========================================================================
// Columns
// ===========================================================================

/// One named column with its normalized type and row-aligned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub type_tag: TypeTag,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_tag: TypeTag, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            type_tag,
            values,
        }
    }

    /// Build a column from raw text cells (`None` = SQL NULL).
    ///
    /// If any non-null cell does not parse as `type_tag`, the column falls
    /// back to `STRING` and keeps the original text.
    pub fn from_raw(name: impl Into<String>, type_tag: TypeTag, raws: &[Option<String>]) -> Self {
        let mut values = Vec::with_capacity(raws.len());
        for raw in raws {
            match raw {
                None => values.push(Value::Null),
                Some(text) => match Value::parse(type_tag, text) {
                    Some(value) => values.push(value),
                    None => return Self::text(name, raws),
                },
            }
        }
        Self::new(name, type_tag, values)
    }

    fn text(name: impl Into<String>, raws: &[Option<String>]) -> Self {
        let values = raws
            .iter()
            .map(|raw| match raw {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            })
            .collect();
        Self::new(name, TypeTag::String, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert to an Arrow array of the type matching the tag.
    pub fn to_arrow(&self) -> ArrayRef {
        match self.type_tag {
            TypeTag::Integer => {
                let mut builder = Int64Builder::with_capacity(self.len());
                for value in &self.values {
                    match value {
                        Value::Integer(i) => builder.append_value(*i),
                        Value::Boolean(b) => builder.append_value(*b as i64),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            TypeTag::Float => {
                let mut builder = Float64Builder::with_capacity(self.len());
                for value in &self.values {
                    match value {
                        Value::Float(f) => builder.append_value(*f),
                        Value::Integer(i) => builder.append_value(*i as f64),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            TypeTag::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(self.len());
                for value in &self.values {
                    match value {
                        Value::Boolean(b) => builder.append_value(*b),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            TypeTag::Timestamp => {
                let mut builder = TimestampMicrosecondBuilder::with_capacity(self.len());
                for value in &self.values {
                    match value {
                        Value::Timestamp(ts) => {
                            builder.append_value(ts.and_utc().timestamp_micros())
                        }
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            TypeTag::String => {
                let mut builder = StringBuilder::with_capacity(self.len(), self.len() * 8);
                for value in &self.values {
                    match value {
                        Value::Null => builder.append_null(),
                        other => builder.append_value(other.to_text()),
                    }
                }
                Arc::new(builder.finish())
            }
        }
    }

    /// Arrow data type produced by [`Column::to_arrow`].
    pub fn arrow_type(&self) -> DataType {
        match self.type_tag {
            TypeTag::Integer => DataType::Int64,
            TypeTag::Float => DataType::Float64,
            TypeTag::Boolean => DataType::Boolean,
            TypeTag::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            TypeTag::String => DataType::Utf8,
        }
    }

    /// Read one Arrow array into a column.
    pub fn from_arrow(name: impl Into<String>, array: &ArrayRef) -> Result<Self, ArrowError> {
        let type_tag = TypeTag::from_arrow(array.data_type());
        let mut values = Vec::with_capacity(array.len());
        match type_tag {
            TypeTag::Integer => {
                let casted = cast(array, &DataType::Int64)?;
                let ints = downcast::<Int64Array>(&casted)?;
                for i in 0..ints.len() {
                    values.push(if ints.is_null(i) {
                        Value::Null
                    } else {
                        Value::Integer(ints.value(i))
                    });
                }
            }
            TypeTag::Float => {
                let casted = cast(array, &DataType::Float64)?;
                let floats = downcast::<Float64Array>(&casted)?;
                for i in 0..floats.len() {
                    values.push(if floats.is_null(i) {
                        Value::Null
                    } else {
                        Value::Float(floats.value(i))
                    });
                }
            }
            TypeTag::Boolean => {
                let bools = downcast::<BooleanArray>(array)?;
                for i in 0..bools.len() {
                    values.push(if bools.is_null(i) {
                        Value::Null
                    } else {
                        Value::Boolean(bools.value(i))
                    });
                }
            }
            TypeTag::Timestamp => {
                let casted = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
                let stamps = downcast::<TimestampMicrosecondArray>(&casted)?;
                for i in 0..stamps.len() {
                    values.push(if stamps.is_null(i) {
                        Value::Null
                    } else {
                        stamps
                            .value_as_datetime(i)
                            .map(Value::Timestamp)
                            .unwrap_or(Value::Null)
                    });
                }
            }
            TypeTag::String => {
                let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())?;
                for i in 0..array.len() {
                    values.push(if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(formatter.value(i).to_string())
                    });
                }
            }
        }
        Ok(Self::new(name, type_tag, values))
    }
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T, ArrowError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ArrowError::CastError(format!("unexpected array type {}", array.data_type()))
    })
}

// ===========================================================================
// ResultTable
// ===========================================================================

/// Ordered columns with row-aligned values.
///
/// Column order is the backend's order; downstream charting treats the
/// first two columns as the x/y pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<Column>,
}

impl ResultTable {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Row-major view of the table.
    pub fn rows(&self) -> Vec<Vec<&Value>> {
        (0..self.num_rows())
            .map(|row| self.columns.iter().map(|c| &c.values[row]).collect())
            .collect()
    }

    /// Keep at most `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        for column in &mut self.columns {
            column.values.truncate(limit);
        }
    }

    /// Column names and tags, in order.
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            self.columns
                .iter()
                .map(|c| SchemaField::new(c.name.clone(), c.type_tag))
                .collect(),
        )
    }

    /// Collect Arrow record batches into a table.
    pub fn from_batches(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<Self, ArrowError> {
        let mut columns: Vec<Column> = schema
            .fields()
            .iter()
            .map(|f| Column::new(f.name().clone(), TypeTag::from_arrow(f.data_type()), Vec::new()))
            .collect();

        for batch in batches {
            for (idx, column) in columns.iter_mut().enumerate() {
                let part = Column::from_arrow(column.name.clone(), batch.column(idx))?;
                column.values.extend(part.values);
            }
        }
        Ok(Self::new(columns))
    }

    /// Build a single Arrow record batch holding every row.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.arrow_type(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        if self.columns.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }
        let arrays = self.columns.iter().map(Column::to_arrow).collect();
        RecordBatch::try_new(schema, arrays)
    }
}

// ===========================================================================
// TableSchema
// ===========================================================================

/// A column name and its normalized type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub type_tag: TypeTag,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
        }
    }
}

/// Ordered mapping from column name to [`TypeTag`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    pub fn from_arrow(schema: &Schema) -> Self {
        Self::new(
            schema
                .fields()
                .iter()
                .map(|f| SchemaField::new(f.name().clone(), TypeTag::from_arrow(f.data_type())))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<TypeTag> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.type_tag)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter()
    }
}
