//! Columnar schema contract for the two artifact kinds.
//!
//! Long records: `date_format: String, portfolio: String, metric_type: String,
//! value: Float64 (nullable), ingestion_date: Date`.
//!
//! Lineage records: `src_filename: String, ingestion_date: Date,
//! upload_timestamp: Datetime(ms, UTC), file_path: String, record_count: Int32,
//! metric_type: String, status: String`.
//!
//! Timestamps are stored without a timezone annotation and are always UTC.

use polars::prelude::*;

pub const LONG_COLUMNS: [&str; 5] = [
    "date_format",
    "portfolio",
    "metric_type",
    "value",
    "ingestion_date",
];

pub const LINEAGE_COLUMNS: [&str; 7] = [
    "src_filename",
    "ingestion_date",
    "upload_timestamp",
    "file_path",
    "record_count",
    "metric_type",
    "status",
];

pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

/// Schema of one output-unit artifact.
pub struct LongRecordSchema;

impl LongRecordSchema {
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("date_format".into(), DataType::String),
            Field::new("portfolio".into(), DataType::String),
            Field::new("metric_type".into(), DataType::String),
            Field::new("value".into(), DataType::Float64),
            Field::new("ingestion_date".into(), DataType::Date),
        ])
    }

    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        validate_against(df, &Self::schema())
    }
}

/// Schema of the lineage ledger.
pub struct LineageSchema;

impl LineageSchema {
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("src_filename".into(), DataType::String),
            Field::new("ingestion_date".into(), DataType::Date),
            Field::new("upload_timestamp".into(), timestamp_dtype()),
            Field::new("file_path".into(), DataType::String),
            Field::new("record_count".into(), DataType::Int32),
            Field::new("metric_type".into(), DataType::String),
            Field::new("status".into(), DataType::String),
        ])
    }

    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        validate_against(df, &Self::schema())
    }
}

fn validate_against(df: &DataFrame, expected: &Schema) -> Result<(), SchemaError> {
    let actual = df.schema();

    for field in expected.iter_fields() {
        let actual_dtype = actual
            .get(field.name())
            .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
        if actual_dtype != field.dtype() {
            return Err(SchemaError::TypeMismatch {
                column: field.name().to_string(),
                expected: field.dtype().clone(),
                actual: actual_dtype.clone(),
            });
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
