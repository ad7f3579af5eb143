//! Per-run summary and the JSON run manifest.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use panelfold_core::diagnostics::DiagnosticCounts;
use panelfold_core::domain::{LineageRecord, LineageStatus};

use crate::pipeline::FileRun;

/// Directory under the output root holding one manifest per run.
pub const RUNS_DIR: &str = "runs";

/// Current schema version for persisted manifests.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub src_filename: String,
    pub dataset: String,
    pub ingestion_date: Option<String>,
    pub content_hash: Option<String>,
    pub blocks: usize,
    pub records: usize,
    pub metrics: Vec<String>,
    pub diagnostics: DiagnosticCounts,
    /// Fatal error text; `None` for files that succeeded.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// BLAKE3 over the run's inputs: file names, content hashes and snapshots.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_processed: usize,
    pub files_failed: usize,
    pub blocks_emitted: usize,
    pub metrics_emitted: usize,
    pub records_emitted: usize,
    /// Rows dropped, by reason.
    pub rows_dropped: DiagnosticCounts,
    /// Every diagnostic, by reason.
    pub diagnostics: DiagnosticCounts,
    pub lineage_success: usize,
    pub lineage_failed: usize,
    pub files: Vec<FileSummary>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunSummary {
    pub fn build(
        files: &[FileRun],
        lineage: &[LineageRecord],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut diagnostics = DiagnosticCounts::default();
        for f in files {
            diagnostics.merge(&f.diagnostics);
        }

        let file_summaries: Vec<FileSummary> = files
            .iter()
            .map(|f| FileSummary {
                src_filename: f.src_filename.clone(),
                dataset: f.dataset.to_string(),
                ingestion_date: f.snapshot.map(|s| s.to_string()),
                content_hash: f.content_hash.clone(),
                blocks: f.blocks,
                records: f.records,
                metrics: if f.is_failed() {
                    Vec::new()
                } else {
                    f.metrics().iter().map(|m| m.to_string()).collect()
                },
                diagnostics: f.diagnostics.clone(),
                error: f.error.as_ref().map(|e| e.to_string()),
            })
            .collect();

        let succeeded = files.iter().filter(|f| !f.is_failed());
        let lineage_failed = lineage
            .iter()
            .filter(|r| r.status == LineageStatus::Failed)
            .count();

        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id(&file_summaries),
            started_at,
            finished_at,
            files_processed: files.len(),
            files_failed: files.iter().filter(|f| f.is_failed()).count(),
            blocks_emitted: succeeded.clone().map(|f| f.blocks).sum(),
            metrics_emitted: succeeded.clone().map(|f| f.units.len()).sum(),
            records_emitted: succeeded.map(|f| f.records).sum(),
            rows_dropped: diagnostics.dropped_rows(),
            diagnostics,
            lineage_success: lineage.len() - lineage_failed,
            lineage_failed,
            files: file_summaries,
        }
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileSummary> {
        self.files.iter().filter(|f| f.error.is_some())
    }

    pub fn log(&self) {
        info!(
            outcome = "summary",
            run_id = %self.run_id,
            files = self.files_processed,
            failed = self.files_failed,
            blocks = self.blocks_emitted,
            metrics = self.metrics_emitted,
            records = self.records_emitted,
            rows_dropped = self.rows_dropped.total(),
            lineage_failed = self.lineage_failed,
            "run finished"
        );
    }

    /// Write `{dir}/{run_id}.json`; returns the path.
    pub fn write_manifest(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load_manifest(path: &Path) -> std::io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Content-addressed run id: identical inputs give the same id.
fn run_id(files: &[FileSummary]) -> String {
    let mut inputs: Vec<(&str, Option<&str>, Option<&str>)> = files
        .iter()
        .map(|f| {
            (
                f.src_filename.as_str(),
                f.content_hash.as_deref(),
                f.ingestion_date.as_deref(),
            )
        })
        .collect();
    inputs.sort();
    let mut hasher = blake3::Hasher::new();
    for (name, hash, date) in inputs {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.unwrap_or("").as_bytes());
        hasher.update(b"\0");
        hasher.update(date.unwrap_or("").as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelfold_core::domain::{dataset_key, MetricId, SnapshotDate};
    use panelfold_core::lineage::OutputUnit;
    use panelfold_core::ReasonCode;
    use tempfile::TempDir;

    fn file_run(name: &str, records: usize, failed: bool) -> FileRun {
        let snapshot: SnapshotDate = "2017-07-31".parse().unwrap();
        let mut diagnostics = DiagnosticCounts::default();
        diagnostics.add(ReasonCode::InvalidDateToken, 2);
        diagnostics.add(ReasonCode::SuspectedSentinel, 1);
        FileRun {
            src_filename: name.into(),
            dataset: dataset_key(name),
            snapshot: Some(snapshot),
            content_hash: Some(format!("hash-{name}")),
            units: vec![OutputUnit {
                src_filename: name.into(),
                ingestion_date: snapshot,
                metric_type: MetricId("firm_size".into()),
                artifact: None,
            }],
            blocks: 1,
            records,
            diagnostics,
            error: failed.then_some(crate::pipeline::FileError::NoBlocks),
        }
    }

    #[test]
    fn summary_totals() {
        let files = vec![file_run("july17_a.CSV", 10, false), file_run("july17_b.CSV", 0, true)];
        let now = Utc::now();
        let s = RunSummary::build(&files, &[], now, now);

        assert_eq!(s.files_processed, 2);
        assert_eq!(s.files_failed, 1);
        assert_eq!(s.records_emitted, 10);
        assert_eq!(s.metrics_emitted, 1);
        assert_eq!(s.rows_dropped.get(ReasonCode::InvalidDateToken), 4);
        assert_eq!(s.rows_dropped.get(ReasonCode::SuspectedSentinel), 0);
        assert_eq!(s.diagnostics.get(ReasonCode::SuspectedSentinel), 2);
        assert_eq!(s.failed_files().count(), 1);
    }

    #[test]
    fn run_id_is_content_addressed() {
        let now = Utc::now();
        let a = RunSummary::build(
            &[file_run("july17_a.CSV", 1, false), file_run("july17_b.CSV", 1, false)],
            &[],
            now,
            now,
        );
        let b = RunSummary::build(
            &[file_run("july17_b.CSV", 1, false), file_run("july17_a.CSV", 1, false)],
            &[],
            now,
            now,
        );
        let c = RunSummary::build(&[file_run("july17_a.CSV", 1, false)], &[], now, now);
        assert_eq!(a.run_id, b.run_id);
        assert_ne!(a.run_id, c.run_id);
        assert_eq!(a.run_id.len(), 64);
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let s = RunSummary::build(&[file_run("july17_a.CSV", 3, false)], &[], now, now);
        let path = s.write_manifest(dir.path()).unwrap();
        assert!(path.ends_with(format!("{}.json", s.run_id)));
        assert_eq!(RunSummary::load_manifest(&path).unwrap(), s);
    }
}
