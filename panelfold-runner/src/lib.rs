//! Panelfold Runner: ingestion orchestration on top of `panelfold-core`.
//!
//! This crate provides:
//! - TOML configuration with defaults for every section
//! - The per-file pipeline (snapshot → fold → staged partition commit)
//! - Batch runs over many files, in parallel on rayon
//! - Lineage cataloging, ledger merge and full ledger rebuild
//! - Run summaries persisted as JSON manifests
//! - History, point-in-time and current views, with CSV export

pub mod config;
pub mod export;
pub mod lineage;
pub mod pipeline;
pub mod summary;
pub mod views;

pub use config::{ConfigError, IngestConfig, OutputConfig, RunSettings, SnapshotConfig};
pub use export::{export_lineage_csv, export_view_csv, export_wide_csv, wide_file_name, write_csv};
pub use lineage::rebuild_ledger;
pub use pipeline::{BatchResult, FileError, FileRun, Pipeline};
pub use summary::{FileSummary, RunSummary, RUNS_DIR};
pub use views::{view_records, wide_tables, DatasetViews, WideView, DATASET_COLUMN};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn pipeline_is_send_sync() {
        assert_send::<Pipeline>();
        assert_sync::<Pipeline>();
    }

    #[test]
    fn file_run_is_send() {
        assert_send::<FileRun>();
        assert_send::<FileError>();
    }

    #[test]
    fn config_and_summary_are_send_sync() {
        assert_send::<IngestConfig>();
        assert_sync::<IngestConfig>();
        assert_send::<RunSummary>();
        assert_sync::<RunSummary>();
    }
}
