//! The lineage ledger: a single Parquet table keyed by
//! `(src_filename, ingestion_date, metric_type)`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::frame::{frame_to_lineage, lineage_to_frame};
use super::parquet::{read_parquet, write_parquet};
use super::StoreError;
use crate::domain::{LineageRecord, SnapshotDate};

/// Partition directory of an artifact path; `None` for records without one.
fn partition_of(file_path: &str) -> Option<&Path> {
    if file_path.is_empty() {
        return None;
    }
    Path::new(file_path).parent()
}

pub struct LineageLedger {
    path: PathBuf,
}

impl LineageLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current ledger contents. A ledger that was never written is empty.
    pub fn load(&self) -> Result<Vec<LineageRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let df = read_parquet(&self.path)?;
        frame_to_lineage(&df)
    }

    /// Merge one run's `records` into the ledger and persist. Returns the
    /// merged ledger.
    ///
    /// A source whose new records point at artifacts committed a partition, so
    /// every older entry of that `(src_filename, ingestion_date)` is dropped
    /// first, as is every entry that pointed into a partition directory the run
    /// rewrote. Other entries are upserted by key. An unreadable ledger is
    /// quarantined and the merge starts from empty; `rebuild` recovers the lost
    /// history from the store.
    pub fn merge(&self, records: &[LineageRecord]) -> Result<Vec<LineageRecord>, StoreError> {
        let existing = match self.load() {
            Ok(existing) => existing,
            Err(e) => {
                self.quarantine(&e);
                Vec::new()
            }
        };

        let committed: HashSet<(&str, SnapshotDate)> = records
            .iter()
            .filter(|r| !r.file_path.is_empty())
            .map(|r| (r.src_filename.as_str(), r.ingestion_date))
            .collect();
        let rewritten: HashSet<&Path> = records
            .iter()
            .filter_map(|r| partition_of(&r.file_path))
            .collect();

        let mut by_key: BTreeMap<_, LineageRecord> = BTreeMap::new();
        let mut superseded = 0usize;
        for r in existing {
            let replaced = committed.contains(&(r.src_filename.as_str(), r.ingestion_date))
                || partition_of(&r.file_path).is_some_and(|dir| rewritten.contains(dir));
            if replaced {
                superseded += 1;
            } else {
                by_key.insert(r.key(), r);
            }
        }
        for rec in records {
            by_key.insert(rec.key(), rec.clone());
        }
        if superseded > 0 {
            debug!(entries = superseded, "superseded ledger entries dropped");
        }

        let merged: Vec<LineageRecord> = by_key.into_values().collect();
        self.write(&merged)?;
        Ok(merged)
    }

    fn quarantine(&self, cause: &StoreError) {
        let quarantine = self.path.with_extension("parquet.quarantined");
        warn!(
            path = %self.path.display(),
            error = %cause,
            "quarantining unreadable lineage ledger"
        );
        if let Err(e) = fs::rename(&self.path, &quarantine) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to quarantine lineage ledger, it will be overwritten"
            );
        }
    }

    /// Replace the ledger wholesale.
    pub fn replace(&self, records: &[LineageRecord]) -> Result<(), StoreError> {
        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.key());
        sorted.dedup_by(|a, b| a.key() == b.key());
        self.write(&sorted)
    }

    fn write(&self, records: &[LineageRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let df = lineage_to_frame(records)?;
        let tmp = self.path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&self.path, e)
        })?;
        info!(path = %self.path.display(), entries = records.len(), "lineage ledger written");
        Ok(())
    }
}
