use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::MetricId;
use super::snapshot::SnapshotDate;

/// One (date, portfolio, metric) observation in long format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRecord {
    /// Date token exactly as published (`1926` or `192607`).
    pub date_format: String,
    pub portfolio: String,
    pub metric_type: MetricId,
    /// `None` for empty cells, sentinels and unparseable cells.
    pub value: Option<f64>,
    pub ingestion_date: SnapshotDate,
}

/// Outcome of one output unit in the lineage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    Success,
    Failed,
}

impl LineageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineageStatus::Success => "success",
            LineageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LineageStatus::Success),
            "failed" => Some(LineageStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LineageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry for one (source file, metric) output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub src_filename: String,
    pub ingestion_date: SnapshotDate,
    pub upload_timestamp: DateTime<Utc>,
    pub file_path: String,
    /// Always 0 when `status` is `Failed`.
    pub record_count: i32,
    pub metric_type: String,
    pub status: LineageStatus,
}

impl LineageRecord {
    /// Ledger key: one entry per source file, snapshot and metric.
    pub fn key(&self) -> (String, SnapshotDate, String) {
        (
            self.src_filename.clone(),
            self.ingestion_date,
            self.metric_type.clone(),
        )
    }
}
