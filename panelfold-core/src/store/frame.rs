//! Record ↔ DataFrame conversion.

use chrono::{DateTime, Utc};
use polars::prelude::*;

use super::StoreError;
use crate::domain::{LineageRecord, LineageStatus, LongRecord, MetricId, SnapshotDate};
use crate::schema::{timestamp_dtype, LineageSchema, LongRecordSchema};

fn polars_err(ctx: &'static str) -> impl Fn(PolarsError) -> StoreError {
    move |e| StoreError::Parquet(format!("{ctx}: {e}"))
}

fn null_at(column: &str, row: usize) -> StoreError {
    StoreError::Parquet(format!("null {column} at row {row}"))
}

// ── Long records ────────────────────────────────────────────────────

pub fn records_to_frame(records: &[LongRecord]) -> Result<DataFrame, StoreError> {
    let dates: Vec<&str> = records.iter().map(|r| r.date_format.as_str()).collect();
    let portfolios: Vec<&str> = records.iter().map(|r| r.portfolio.as_str()).collect();
    let metrics: Vec<&str> = records.iter().map(|r| r.metric_type.as_str()).collect();
    let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
    let snapshots: Vec<i32> = records
        .iter()
        .map(|r| r.ingestion_date.epoch_days())
        .collect();

    DataFrame::new(vec![
        Column::new("date_format".into(), dates),
        Column::new("portfolio".into(), portfolios),
        Column::new("metric_type".into(), metrics),
        Column::new("value".into(), values),
        Column::new("ingestion_date".into(), snapshots)
            .cast(&DataType::Date)
            .map_err(polars_err("ingestion_date cast"))?,
    ])
    .map_err(polars_err("dataframe creation"))
}

pub fn frame_to_records(df: &DataFrame) -> Result<Vec<LongRecord>, StoreError> {
    LongRecordSchema::validate(df)?;

    let date_ca = df
        .column("date_format")
        .and_then(|c| c.str())
        .map_err(polars_err("date_format column"))?;
    let portfolio_ca = df
        .column("portfolio")
        .and_then(|c| c.str())
        .map_err(polars_err("portfolio column"))?;
    let metric_ca = df
        .column("metric_type")
        .and_then(|c| c.str())
        .map_err(polars_err("metric_type column"))?;
    let value_ca = df
        .column("value")
        .and_then(|c| c.f64())
        .map_err(polars_err("value column"))?;
    let snapshot_ca = df
        .column("ingestion_date")
        .and_then(|c| c.date())
        .map_err(polars_err("ingestion_date column"))?;

    let n = df.height();
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        records.push(LongRecord {
            date_format: date_ca
                .get(i)
                .ok_or_else(|| null_at("date_format", i))?
                .to_string(),
            portfolio: portfolio_ca
                .get(i)
                .ok_or_else(|| null_at("portfolio", i))?
                .to_string(),
            metric_type: MetricId(
                metric_ca
                    .get(i)
                    .ok_or_else(|| null_at("metric_type", i))?
                    .to_string(),
            ),
            value: value_ca.get(i),
            ingestion_date: SnapshotDate::from_epoch_days(
                snapshot_ca
                    .get(i)
                    .ok_or_else(|| null_at("ingestion_date", i))?,
            ),
        });
    }
    Ok(records)
}

// ── Lineage records ─────────────────────────────────────────────────

pub fn lineage_to_frame(records: &[LineageRecord]) -> Result<DataFrame, StoreError> {
    let sources: Vec<&str> = records.iter().map(|r| r.src_filename.as_str()).collect();
    let snapshots: Vec<i32> = records
        .iter()
        .map(|r| r.ingestion_date.epoch_days())
        .collect();
    let uploaded: Vec<i64> = records
        .iter()
        .map(|r| r.upload_timestamp.timestamp_millis())
        .collect();
    let paths: Vec<&str> = records.iter().map(|r| r.file_path.as_str()).collect();
    let counts: Vec<i32> = records.iter().map(|r| r.record_count).collect();
    let metrics: Vec<&str> = records.iter().map(|r| r.metric_type.as_str()).collect();
    let statuses: Vec<&str> = records.iter().map(|r| r.status.as_str()).collect();

    DataFrame::new(vec![
        Column::new("src_filename".into(), sources),
        Column::new("ingestion_date".into(), snapshots)
            .cast(&DataType::Date)
            .map_err(polars_err("ingestion_date cast"))?,
        Column::new("upload_timestamp".into(), uploaded)
            .cast(&timestamp_dtype())
            .map_err(polars_err("upload_timestamp cast"))?,
        Column::new("file_path".into(), paths),
        Column::new("record_count".into(), counts),
        Column::new("metric_type".into(), metrics),
        Column::new("status".into(), statuses),
    ])
    .map_err(polars_err("dataframe creation"))
}

pub fn frame_to_lineage(df: &DataFrame) -> Result<Vec<LineageRecord>, StoreError> {
    LineageSchema::validate(df)?;

    let source_ca = df
        .column("src_filename")
        .and_then(|c| c.str())
        .map_err(polars_err("src_filename column"))?;
    let snapshot_ca = df
        .column("ingestion_date")
        .and_then(|c| c.date())
        .map_err(polars_err("ingestion_date column"))?;
    let uploaded_ca = df
        .column("upload_timestamp")
        .and_then(|c| c.datetime())
        .map_err(polars_err("upload_timestamp column"))?;
    let path_ca = df
        .column("file_path")
        .and_then(|c| c.str())
        .map_err(polars_err("file_path column"))?;
    let count_ca = df
        .column("record_count")
        .and_then(|c| c.i32())
        .map_err(polars_err("record_count column"))?;
    let metric_ca = df
        .column("metric_type")
        .and_then(|c| c.str())
        .map_err(polars_err("metric_type column"))?;
    let status_ca = df
        .column("status")
        .and_then(|c| c.str())
        .map_err(polars_err("status column"))?;

    let n = df.height();
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let millis = uploaded_ca
            .get(i)
            .ok_or_else(|| null_at("upload_timestamp", i))?;
        let upload_timestamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            StoreError::Parquet(format!("upload_timestamp out of range at row {i}"))
        })?;
        let status_str = status_ca.get(i).ok_or_else(|| null_at("status", i))?;
        let status = LineageStatus::parse(status_str).ok_or_else(|| {
            StoreError::Parquet(format!("unknown status '{status_str}' at row {i}"))
        })?;

        records.push(LineageRecord {
            src_filename: source_ca
                .get(i)
                .ok_or_else(|| null_at("src_filename", i))?
                .to_string(),
            ingestion_date: SnapshotDate::from_epoch_days(
                snapshot_ca
                    .get(i)
                    .ok_or_else(|| null_at("ingestion_date", i))?,
            ),
            upload_timestamp,
            file_path: path_ca.get(i).unwrap_or_default().to_string(),
            record_count: count_ca.get(i).unwrap_or(0),
            metric_type: metric_ca
                .get(i)
                .ok_or_else(|| null_at("metric_type", i))?
                .to_string(),
            status,
        });
    }
    Ok(records)
}
