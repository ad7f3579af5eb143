//! Per-file pipeline and batch orchestration.
//!
//! One source file runs start to finish: resolve snapshot → read → fold →
//! stage every output unit → commit the partition. Files share no state, so a
//! batch may run them on the rayon pool; lineage is cataloged once all files
//! are done.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use panelfold_core::diagnostics::DiagnosticCounts;
use panelfold_core::domain::{dataset_key, DatasetKey, LineageRecord, MetricId, RawTable, SnapshotDate};
use panelfold_core::lineage::{LineageCataloger, OutputUnit};
use panelfold_core::store::{LineageLedger, ParquetStore, SourceMeta, StoreError};
use panelfold_core::transform::{fold_table, FoldedTable, LongFormatEmitter};

use crate::config::IngestConfig;
use crate::summary::{RunSummary, RUNS_DIR};

/// File-level fatal errors. Each aborts only its own source file.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("no snapshot date: pass --snapshot-date or name the file {{month}}{{yy}}_...")]
    MissingSnapshot,
    #[error("invalid snapshot date '{0}' (expected YYYY-MM-DD)")]
    InvalidSnapshot(String),
    #[error("snapshot {snapshot} is before the configured earliest {earliest}")]
    SnapshotTooOld {
        snapshot: SnapshotDate,
        earliest: SnapshotDate,
    },
    #[error("cannot read source {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no blocks found in a non-empty source")]
    NoBlocks,
    #[error("partition dataset={dataset}/ingestion_date={snapshot} is already written by {claimed_by} in this batch")]
    PartitionConflict {
        dataset: DatasetKey,
        snapshot: SnapshotDate,
        claimed_by: String,
    },
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// Everything one source file produced, successful or not.
#[derive(Debug)]
pub struct FileRun {
    pub src_filename: String,
    pub dataset: DatasetKey,
    /// `None` only when the snapshot could not be resolved.
    pub snapshot: Option<SnapshotDate>,
    pub content_hash: Option<String>,
    /// Output units to catalog; artifacts are `None` when the write never completed.
    pub units: Vec<OutputUnit>,
    pub blocks: usize,
    pub records: usize,
    pub diagnostics: DiagnosticCounts,
    pub error: Option<FileError>,
}

impl FileRun {
    fn new(src_filename: String) -> Self {
        let dataset = dataset_key(&src_filename);
        Self {
            src_filename,
            dataset,
            snapshot: None,
            content_hash: None,
            units: Vec::new(),
            blocks: 0,
            records: 0,
            diagnostics: DiagnosticCounts::default(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn metrics(&self) -> Vec<&MetricId> {
        self.units.iter().map(|u| &u.metric_type).collect()
    }
}

/// Result of a whole batch.
#[derive(Debug)]
pub struct BatchResult {
    pub files: Vec<FileRun>,
    /// Lineage records of this run, sorted by ledger key.
    pub lineage: Vec<LineageRecord>,
    pub summary: RunSummary,
    pub manifest_path: PathBuf,
}

impl BatchResult {
    pub fn any_failed(&self) -> bool {
        self.files.iter().any(FileRun::is_failed)
    }
}

/// Caller-supplied snapshot, kept raw so that a bad value fails each file
/// instead of the whole invocation.
#[derive(Debug, Clone)]
enum SnapshotOverride {
    Valid(SnapshotDate),
    Invalid(String),
}

pub struct Pipeline {
    store: ParquetStore,
    emitter: LongFormatEmitter,
    snapshot_override: Option<SnapshotOverride>,
    earliest: Option<SnapshotDate>,
    parallel: bool,
}

impl Pipeline {
    /// A pipeline writing under `config.output.root`, with snapshots taken
    /// from filenames until an override is set.
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            store: ParquetStore::new(&config.output.root),
            emitter: LongFormatEmitter::new(config.missing_values.clone()),
            snapshot_override: None,
            earliest: config.snapshot.earliest,
            parallel: config.run.parallel,
        }
    }

    /// Use one snapshot for every file instead of deriving it from filenames.
    pub fn with_snapshot(mut self, snapshot: Option<SnapshotDate>) -> Self {
        self.snapshot_override = snapshot.map(SnapshotOverride::Valid);
        self
    }

    /// Like [`with_snapshot`](Self::with_snapshot) but from unparsed text. An
    /// invalid date is fatal for every file of the batch, and each of them
    /// still gets a failed lineage entry.
    pub fn with_snapshot_text(mut self, snapshot: Option<&str>) -> Self {
        self.snapshot_override = snapshot.map(|text| match text.parse::<SnapshotDate>() {
            Ok(date) => SnapshotOverride::Valid(date),
            Err(_) => SnapshotOverride::Invalid(text.to_string()),
        });
        self
    }

    pub fn store(&self) -> &ParquetStore {
        &self.store
    }

    pub fn ledger(&self) -> LineageLedger {
        LineageLedger::new(self.store.ledger_path())
    }

    /// Run one source file to completion. Never panics and never returns
    /// early: file-level failures are recorded on the returned `FileRun`.
    pub fn process_file(&self, path: &Path) -> FileRun {
        self.process(path, None)
    }

    /// `claimed_by` names the earlier file of the batch that owns this file's
    /// partition, if any.
    fn process(&self, path: &Path, claimed_by: Option<&str>) -> FileRun {
        let src_filename = source_name(path);
        let span = info_span!("source", src = %src_filename);
        let _guard = span.enter();

        let mut run = FileRun::new(src_filename);
        if let Err(e) = self.process_into(path, claimed_by, &mut run) {
            error!(severity = "fatal", error = %e, "source file aborted");
            run.error = Some(e);
        }
        run
    }

    fn process_into(
        &self,
        path: &Path,
        claimed_by: Option<&str>,
        run: &mut FileRun,
    ) -> Result<(), FileError> {
        let snapshot = self.resolve_snapshot(&run.src_filename)?;
        run.snapshot = Some(snapshot);
        if let Some(owner) = claimed_by {
            return Err(FileError::PartitionConflict {
                dataset: run.dataset.clone(),
                snapshot,
                claimed_by: owner.to_string(),
            });
        }

        let table = RawTable::read(path).map_err(|source| FileError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let content_hash = table.content_hash();
        run.content_hash = Some(content_hash.clone());
        info!(lines = table.len(), snapshot = %snapshot, dataset = %run.dataset, "source read");

        let folded = fold_table(&table, &self.emitter, snapshot);
        run.blocks = folded.emissions.len();
        run.records = folded.record_count();
        run.diagnostics = folded.counts();

        if folded.emissions.is_empty() {
            if table.is_blank() {
                warn!("source is empty, nothing to ingest");
                return Ok(());
            }
            return Err(FileError::NoBlocks);
        }

        let meta = SourceMeta {
            src_filename: run.src_filename.clone(),
            content_hash,
            line_count: table.len(),
            written_at: Utc::now(),
        };
        match self.write_partition(&run.dataset, snapshot, &folded, &meta) {
            Ok(written) => {
                run.units = written
                    .into_iter()
                    .map(|(metric, artifact)| OutputUnit {
                        src_filename: run.src_filename.clone(),
                        ingestion_date: snapshot,
                        metric_type: metric,
                        artifact: Some(artifact),
                    })
                    .collect();
            }
            Err(e) => {
                // Every attempted unit is cataloged as failed.
                run.units = folded
                    .emissions
                    .iter()
                    .map(|em| OutputUnit {
                        src_filename: run.src_filename.clone(),
                        ingestion_date: snapshot,
                        metric_type: em.metric.clone(),
                        artifact: None,
                    })
                    .collect();
                return Err(e.into());
            }
        }

        info!(
            outcome = "success",
            blocks = run.blocks,
            records = run.records,
            warnings = run.diagnostics.total(),
            "source ingested"
        );
        Ok(())
    }

    fn resolve_snapshot(&self, src_filename: &str) -> Result<SnapshotDate, FileError> {
        let snapshot = match &self.snapshot_override {
            Some(SnapshotOverride::Valid(date)) => *date,
            Some(SnapshotOverride::Invalid(text)) => {
                return Err(FileError::InvalidSnapshot(text.clone()))
            }
            None => SnapshotDate::from_filename(src_filename).ok_or(FileError::MissingSnapshot)?,
        };
        if let Some(earliest) = self.earliest {
            if snapshot < earliest {
                return Err(FileError::SnapshotTooOld { snapshot, earliest });
            }
        }
        Ok(snapshot)
    }

    fn write_partition(
        &self,
        dataset: &DatasetKey,
        snapshot: SnapshotDate,
        folded: &FoldedTable,
        meta: &SourceMeta,
    ) -> Result<Vec<(MetricId, PathBuf)>, StoreError> {
        let mut writer = self.store.begin_partition(dataset, snapshot)?;
        for emission in &folded.emissions {
            writer.write_unit(&emission.metric, &emission.records)?;
            debug!(metric = %emission.metric, records = emission.records.len(), "unit staged");
        }
        writer.write_source_meta(meta)?;
        writer.commit()
    }

    /// Process every file, catalog lineage, merge the ledger and write the
    /// run manifest.
    ///
    /// Per-file failures are reported inside the result. Only failures of the
    /// ledger or manifest writes are returned as errors.
    pub fn run_batch(&self, paths: &[PathBuf]) -> Result<BatchResult, StoreError> {
        let started_at = Utc::now();
        info!(files = paths.len(), parallel = self.parallel, "batch started");

        let owners = self.partition_owners(paths);
        let jobs: Vec<(&PathBuf, Option<&str>)> = paths
            .iter()
            .zip(owners.iter().map(|o| o.as_deref()))
            .collect();
        let files: Vec<FileRun> = if self.parallel {
            jobs.par_iter().map(|(p, owner)| self.process(p, *owner)).collect()
        } else {
            jobs.iter().map(|(p, owner)| self.process(p, *owner)).collect()
        };

        let lineage = self.catalog(&files, started_at);
        self.ledger().merge(&lineage)?;

        let summary = RunSummary::build(&files, &lineage, started_at, Utc::now());
        summary.log();
        let manifest_path = summary
            .write_manifest(&self.store.root().join(RUNS_DIR))
            .map_err(|e| StoreError::Sidecar(format!("run manifest: {e}")))?;

        Ok(BatchResult {
            files,
            lineage,
            summary,
            manifest_path,
        })
    }

    /// For each path, the earlier file of the batch that already claims the
    /// same `(dataset, snapshot)` partition. The first file in input order
    /// wins; later ones fail instead of overwriting it.
    fn partition_owners(&self, paths: &[PathBuf]) -> Vec<Option<String>> {
        let mut claims: HashMap<(DatasetKey, SnapshotDate), String> = HashMap::new();
        paths
            .iter()
            .map(|path| {
                let name = source_name(path);
                let snapshot = self.resolve_snapshot(&name).ok()?;
                match claims.entry((dataset_key(&name), snapshot)) {
                    Entry::Occupied(owner) => Some(owner.get().clone()),
                    Entry::Vacant(slot) => {
                        slot.insert(name);
                        None
                    }
                }
            })
            .collect()
    }

    /// Lineage for one batch: one record per output unit, plus one failed
    /// record for each file that failed before producing any unit.
    pub fn catalog(&self, files: &[FileRun], catalog_time: DateTime<Utc>) -> Vec<LineageRecord> {
        let cataloger = LineageCataloger::new(&self.store, catalog_time);
        let units: Vec<OutputUnit> = files.iter().flat_map(|f| f.units.iter().cloned()).collect();
        let mut records = cataloger.catalog(&units);

        for f in files.iter().filter(|f| f.is_failed() && f.units.is_empty()) {
            let date = f
                .snapshot
                .unwrap_or_else(|| SnapshotDate::new(catalog_time.date_naive()));
            records.push(cataloger.failed_file(&f.src_filename, date));
        }
        records.sort_by_key(|r| r.key());
        records
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelfold_core::domain::LineageStatus;
    use std::fs;
    use tempfile::TempDir;

    const SOURCE: &str = "\
  This file was created by CMPT_ME_BEME_RETS using the 201706 CRSP database.

  Average Value Weighted Returns -- Monthly
,SMALL LoBM,ME1 BM2
192607,1.0874,0.9349
192608,0.7,-99.99

  Number of Firms in Portfolios
,SMALL LoBM,ME1 BM2
192607,100,200
";

    fn pipeline(root: &Path) -> Pipeline {
        let mut config = IngestConfig::default();
        config.output.root = root.to_path_buf();
        config.run.parallel = false;
        Pipeline::new(&config)
    }

    #[test]
    fn ingests_a_source_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("july17_6_Portfolios_2x3.CSV");
        fs::write(&src, SOURCE).unwrap();

        let run = pipeline(&dir.path().join("out")).process_file(&src);
        assert!(run.error.is_none(), "{:?}", run.error);
        assert_eq!(run.snapshot.map(|s| s.to_string()).as_deref(), Some("2017-07-31"));
        assert_eq!(run.dataset.as_str(), "6_Portfolios_2x3");
        assert_eq!(run.blocks, 2);
        assert_eq!(run.records, 6);
        let metrics: Vec<&str> = run.metrics().iter().map(|m| m.as_str()).collect();
        assert_eq!(metrics, vec!["value_weighted_return", "number_firm_portfolio"]);
        assert!(run.units.iter().all(|u| u.artifact.as_ref().is_some_and(|p| p.exists())));
    }

    #[test]
    fn missing_snapshot_is_fatal_for_the_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("6_Portfolios_2x3.CSV");
        fs::write(&src, SOURCE).unwrap();

        let run = pipeline(dir.path()).process_file(&src);
        assert!(matches!(run.error, Some(FileError::MissingSnapshot)));
        assert!(run.units.is_empty());
    }

    #[test]
    fn snapshot_override_and_cutoff() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("july17_x.CSV");
        fs::write(&src, SOURCE).unwrap();

        let mut config = IngestConfig::default();
        config.output.root = dir.path().join("out");
        config.snapshot.earliest = Some("2018-01-01".parse().unwrap());
        let p = Pipeline::new(&config);
        assert!(matches!(
            p.process_file(&src).error,
            Some(FileError::SnapshotTooOld { .. })
        ));

        let p = Pipeline::new(&config).with_snapshot(Some("2018-06-30".parse().unwrap()));
        let run = p.process_file(&src);
        assert!(run.error.is_none());
        assert_eq!(run.snapshot.map(|s| s.to_string()).as_deref(), Some("2018-06-30"));
    }

    #[test]
    fn invalid_snapshot_text_fails_each_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("july17_x.CSV");
        fs::write(&src, SOURCE).unwrap();

        let p = pipeline(&dir.path().join("out")).with_snapshot_text(Some("2017-13-45"));
        let run = p.process_file(&src);
        assert!(matches!(&run.error, Some(FileError::InvalidSnapshot(t)) if t == "2017-13-45"));
        assert!(run.snapshot.is_none());

        let p = pipeline(&dir.path().join("out")).with_snapshot_text(Some("2018-06-30"));
        assert_eq!(
            p.process_file(&src).snapshot.map(|s| s.to_string()).as_deref(),
            Some("2018-06-30")
        );
    }

    #[test]
    fn text_without_blocks_is_fatal_but_empty_file_is_not() {
        let dir = TempDir::new().unwrap();
        let prose = dir.path().join("july17_notes.CSV");
        fs::write(&prose, "Just a note\nwith no tables\n").unwrap();
        let empty = dir.path().join("july17_empty.CSV");
        fs::write(&empty, "\n\n").unwrap();

        let p = pipeline(&dir.path().join("out"));
        assert!(matches!(p.process_file(&prose).error, Some(FileError::NoBlocks)));
        let run = p.process_file(&empty);
        assert!(run.error.is_none());
        assert!(run.units.is_empty());
    }

    #[test]
    fn unreadable_source_gets_failed_lineage() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir.path().join("out"));
        let files = vec![p.process_file(&dir.path().join("july17_missing.CSV"))];
        assert!(matches!(files[0].error, Some(FileError::Unreadable { .. })));

        let lineage = p.catalog(&files, Utc::now());
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].status, LineageStatus::Failed);
        assert_eq!(lineage[0].metric_type, "unknown");
        assert_eq!(lineage[0].file_path, "");
        assert_eq!(lineage[0].ingestion_date.to_string(), "2017-07-31");
    }
}
