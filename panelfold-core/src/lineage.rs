//! Lineage cataloging: one audit record per output unit.
//!
//! The cataloger never fails. A unit whose artifact is missing or unreadable
//! becomes a `failed` record with `record_count = 0`, and the rest of the
//! batch is still cataloged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{LineageRecord, LineageStatus, MetricId, SnapshotDate};
use crate::store::StoreError;

/// Metric label used when a source file failed before any block was classified.
pub const UNKNOWN_METRIC: &str = "unknown";

/// Read-only access to persisted artifacts.
///
/// The Parquet store implements this; tests substitute in-memory readers to
/// simulate corrupt or vanished artifacts.
pub trait ArtifactReader: Send + Sync {
    /// Number of records in the artifact at `path`.
    fn count_records(&self, path: &Path) -> Result<usize, StoreError>;

    /// Last-modified time of the artifact, if the filesystem reports one.
    fn modified_at(&self, path: &Path) -> Option<DateTime<Utc>>;
}

/// One (source file, snapshot, metric) output unit to be cataloged.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputUnit {
    pub src_filename: String,
    pub ingestion_date: SnapshotDate,
    pub metric_type: MetricId,
    /// Where the artifact was written; `None` when the write never completed.
    pub artifact: Option<PathBuf>,
}

pub struct LineageCataloger<'a, R: ArtifactReader + ?Sized> {
    reader: &'a R,
    catalog_time: DateTime<Utc>,
}

impl<'a, R: ArtifactReader + ?Sized> LineageCataloger<'a, R> {
    /// `catalog_time` stamps failed records and any artifact without an mtime.
    pub fn new(reader: &'a R, catalog_time: DateTime<Utc>) -> Self {
        Self {
            reader,
            catalog_time: to_millis(catalog_time),
        }
    }

    pub fn catalog_time(&self) -> DateTime<Utc> {
        self.catalog_time
    }

    /// Catalog every unit. Output is sorted by ledger key, so the result does
    /// not depend on the order units were produced in.
    pub fn catalog(&self, units: &[OutputUnit]) -> Vec<LineageRecord> {
        let mut records: Vec<LineageRecord> = units.iter().map(|u| self.catalog_one(u)).collect();
        records.sort_by_key(|r| r.key());
        records
    }

    pub fn catalog_one(&self, unit: &OutputUnit) -> LineageRecord {
        let Some(path) = unit.artifact.as_deref() else {
            return self.failed(&unit.src_filename, unit.ingestion_date, unit.metric_type.as_str(), "");
        };

        match self.reader.count_records(path) {
            Ok(n) => {
                let record_count = i32::try_from(n).unwrap_or_else(|_| {
                    warn!(path = %path.display(), records = n, "record count exceeds i32, saturating");
                    i32::MAX
                });
                LineageRecord {
                    src_filename: unit.src_filename.clone(),
                    ingestion_date: unit.ingestion_date,
                    upload_timestamp: self
                        .reader
                        .modified_at(path)
                        .map(to_millis)
                        .unwrap_or(self.catalog_time),
                    file_path: path.display().to_string(),
                    record_count,
                    metric_type: unit.metric_type.to_string(),
                    status: LineageStatus::Success,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "artifact unreadable, cataloging as failed");
                self.failed(
                    &unit.src_filename,
                    unit.ingestion_date,
                    unit.metric_type.as_str(),
                    &path.display().to_string(),
                )
            }
        }
    }

    /// Record for a source file that produced no output units at all.
    pub fn failed_file(&self, src_filename: &str, ingestion_date: SnapshotDate) -> LineageRecord {
        self.failed(src_filename, ingestion_date, UNKNOWN_METRIC, "")
    }

    fn failed(
        &self,
        src_filename: &str,
        ingestion_date: SnapshotDate,
        metric_type: &str,
        file_path: &str,
    ) -> LineageRecord {
        LineageRecord {
            src_filename: src_filename.to_string(),
            ingestion_date,
            upload_timestamp: self.catalog_time,
            file_path: file_path.to_string(),
            record_count: 0,
            metric_type: metric_type.to_string(),
            status: LineageStatus::Failed,
        }
    }
}

/// The ledger stores millisecond timestamps; cataloged records match it exactly.
fn to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}
