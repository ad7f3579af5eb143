//! CSV export of views, wide tables and the lineage ledger.

use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::DataFrame;

use panelfold_core::domain::LineageRecord;

use crate::views::{view_records, WideView};

// ─── Long views ─────────────────────────────────────────────────────

/// Columns: dataset, date_format, portfolio, metric_type, value, ingestion_date.
/// Null values are empty cells.
pub fn export_view_csv(view: &DataFrame) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "dataset",
        "date_format",
        "portfolio",
        "metric_type",
        "value",
        "ingestion_date",
    ])?;

    for (dataset, r) in view_records(view).context("view is not a long-record frame")? {
        wtr.write_record([
            dataset.as_str(),
            r.date_format.as_str(),
            r.portfolio.as_str(),
            r.metric_type.as_str(),
            r.value.map(|v| v.to_string()).unwrap_or_default().as_str(),
            r.ingestion_date.to_string().as_str(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Wide tables ────────────────────────────────────────────────────

/// One wide table as CSV: a `date` column then one column per portfolio.
pub fn export_wide_csv(view: &WideView) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header = vec!["date".to_string()];
    header.extend(view.table.portfolios.iter().cloned());
    wtr.write_record(&header)?;

    for (date, cells) in &view.table.rows {
        let mut row = vec![date.clone()];
        row.extend(cells.iter().map(|c| c.map(|v| v.to_string()).unwrap_or_default()));
        wtr.write_record(&row)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// File name for a wide table: `{dataset}__{date}__{metric}.csv`.
pub fn wide_file_name(view: &WideView) -> String {
    format!(
        "{}__{}__{}.csv",
        view.dataset, view.ingestion_date, view.table.metric
    )
}

// ─── Lineage ────────────────────────────────────────────────────────

pub fn export_lineage_csv(records: &[LineageRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "src_filename",
        "ingestion_date",
        "upload_timestamp",
        "file_path",
        "record_count",
        "metric_type",
        "status",
    ])?;
    for r in records {
        wtr.write_record([
            r.src_filename.as_str(),
            r.ingestion_date.to_string().as_str(),
            r.upload_timestamp
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string()
                .as_str(),
            r.file_path.as_str(),
            r.record_count.to_string().as_str(),
            r.metric_type.as_str(),
            r.status.as_str(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write CSV text, creating parent directories.
pub fn write_csv(path: &Path, csv: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))
}
