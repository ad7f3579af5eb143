//! Partitioned Parquet store for output units.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::frame::{frame_to_records, records_to_frame};
use super::StoreError;
use crate::domain::{DatasetKey, LongRecord, MetricId, SnapshotDate};
use crate::lineage::ArtifactReader;
use crate::schema::LongRecordSchema;

pub const SOURCE_SIDECAR: &str = "_source.json";
const TRANSFORMED_DIR: &str = "transformed";
const LINEAGE_DIR: &str = "lineage";
const LEDGER_FILE: &str = "ingestion_map.parquet";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Provenance sidecar written next to each partition's artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub src_filename: String,
    pub content_hash: String,
    pub line_count: usize,
    pub written_at: DateTime<Utc>,
}

/// A committed `(dataset, snapshot)` partition found on disk.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub dataset: DatasetKey,
    pub ingestion_date: SnapshotDate,
    pub dir: PathBuf,
    /// Artifacts sorted by metric.
    pub units: Vec<(MetricId, PathBuf)>,
    pub source: Option<SourceMeta>,
}

pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transformed_dir(&self) -> PathBuf {
        self.root.join(TRANSFORMED_DIR)
    }

    /// `{root}/transformed/dataset={key}/ingestion_date={date}/`
    pub fn partition_dir(&self, dataset: &DatasetKey, snapshot: SnapshotDate) -> PathBuf {
        self.transformed_dir()
            .join(format!("dataset={dataset}"))
            .join(format!("ingestion_date={snapshot}"))
    }

    pub fn unit_path(&self, dataset: &DatasetKey, snapshot: SnapshotDate, metric: &MetricId) -> PathBuf {
        self.partition_dir(dataset, snapshot)
            .join(format!("{metric}.parquet"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LINEAGE_DIR).join(LEDGER_FILE)
    }

    /// Open a staging area for one partition. Nothing becomes visible until
    /// [`PartitionWriter::commit`].
    pub fn begin_partition(
        &self,
        dataset: &DatasetKey,
        snapshot: SnapshotDate,
    ) -> Result<PartitionWriter, StoreError> {
        let target = self.partition_dir(dataset, snapshot);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.transformed_dir());
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let staging = parent.join(format!(
            ".staging-ingestion_date={snapshot}-{}-{n}",
            std::process::id()
        ));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;
        debug!(staging = %staging.display(), "partition staging opened");

        Ok(PartitionWriter {
            staging,
            target,
            staged: Vec::new(),
            committed: false,
        })
    }

    /// Read an artifact and check it against the long-record schema.
    pub fn read_frame(&self, path: &Path) -> Result<DataFrame, StoreError> {
        read_parquet(path).and_then(|df| {
            LongRecordSchema::validate(&df).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Ok(df)
        })
    }

    pub fn load_unit(&self, path: &Path) -> Result<Vec<LongRecord>, StoreError> {
        let df = self.read_frame(path)?;
        frame_to_records(&df)
    }

    pub fn source_meta(&self, partition_dir: &Path) -> Option<SourceMeta> {
        let content = fs::read_to_string(partition_dir.join(SOURCE_SIDECAR)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All committed partitions, sorted by dataset then snapshot.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>, StoreError> {
        let root = self.transformed_dir();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (dataset_name, dataset_dir) in subdirs(&root)? {
            let Some(key) = dataset_name.strip_prefix("dataset=") else {
                continue;
            };
            for (partition_name, dir) in subdirs(&dataset_dir)? {
                let Some(date) = partition_name.strip_prefix("ingestion_date=") else {
                    continue;
                };
                let Ok(ingestion_date) = date.parse::<SnapshotDate>() else {
                    warn!(dir = %dir.display(), "skipping partition with unparseable date");
                    continue;
                };
                let units = partition_units(&dir)?;
                let source = self.source_meta(&dir);
                out.push(PartitionInfo {
                    dataset: DatasetKey(key.to_string()),
                    ingestion_date,
                    dir,
                    units,
                    source,
                });
            }
        }

        out.sort_by(|a, b| {
            (a.dataset.as_str(), a.ingestion_date).cmp(&(b.dataset.as_str(), b.ingestion_date))
        });
        Ok(out)
    }
}

impl ArtifactReader for ParquetStore {
    fn count_records(&self, path: &Path) -> Result<usize, StoreError> {
        self.read_frame(path).map(|df| df.height())
    }

    fn modified_at(&self, path: &Path) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}

/// Staged writes for one partition.
///
/// Dropping the writer without committing removes the staging directory, so
/// a failed source file leaves no partial output behind.
pub struct PartitionWriter {
    staging: PathBuf,
    target: PathBuf,
    staged: Vec<(MetricId, usize)>,
    committed: bool,
}

impl PartitionWriter {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Metrics staged so far, with their record counts.
    pub fn staged(&self) -> &[(MetricId, usize)] {
        &self.staged
    }

    pub fn write_unit(&mut self, metric: &MetricId, records: &[LongRecord]) -> Result<(), StoreError> {
        let df = records_to_frame(records)?;
        let path = self.staging.join(format!("{metric}.parquet"));
        write_parquet(&df, &path)?;
        self.staged.push((metric.clone(), records.len()));
        Ok(())
    }

    pub fn write_source_meta(&mut self, meta: &SourceMeta) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| StoreError::Sidecar(format!("serialize: {e}")))?;
        let path = self.staging.join(SOURCE_SIDECAR);
        fs::write(&path, json).map_err(|e| StoreError::io(&path, e))
    }

    /// Swap the staged partition into place, replacing any previous one.
    ///
    /// Returns the final path of every staged artifact, in staging order.
    pub fn commit(mut self) -> Result<Vec<(MetricId, PathBuf)>, StoreError> {
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        if self.target.exists() {
            let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
            let backup = self.target.with_file_name(format!(
                ".replaced-{}-{}-{n}",
                self.target
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                std::process::id()
            ));
            fs::rename(&self.target, &backup).map_err(|e| StoreError::io(&self.target, e))?;
            if let Err(e) = fs::rename(&self.staging, &self.target) {
                let _ = fs::rename(&backup, &self.target);
                return Err(StoreError::io(&self.target, e));
            }
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(path = %backup.display(), error = %e, "could not remove replaced partition");
            }
        } else {
            fs::rename(&self.staging, &self.target).map_err(|e| StoreError::io(&self.target, e))?;
        }
        self.committed = true;
        debug!(partition = %self.target.display(), units = self.staged.len(), "partition committed");

        Ok(self
            .staged
            .iter()
            .map(|(metric, _)| (metric.clone(), self.target.join(format!("{metric}.parquet"))))
            .collect())
    }

    /// Discard everything staged.
    pub fn abort(self) {
        drop(self);
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                warn!(path = %self.staging.display(), error = %e, "could not clean staging dir");
            }
        }
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

pub(crate) fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write {}: {e}", path.display())))?;
    Ok(())
}

pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Visible subdirectories, sorted by name. Dot-prefixed entries are staging leftovers.
fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() && !name.starts_with('.') {
            out.push((name, path));
        }
    }
    out.sort();
    Ok(out)
}

fn partition_units(dir: &Path) -> Result<Vec<(MetricId, PathBuf)>, StoreError> {
    let mut units = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            units.push((MetricId(stem.to_string()), path.clone()));
        }
    }
    units.sort();
    Ok(units)
}
