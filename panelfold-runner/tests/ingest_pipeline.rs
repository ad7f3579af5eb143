use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use panelfold_core::domain::{LineageStatus, SnapshotDate};
use panelfold_runner::{
    export_view_csv, rebuild_ledger, view_records, DatasetViews, FileError, IngestConfig,
    Pipeline, RunSummary,
};
use tempfile::TempDir;

const BE_ME: &str = "\
  This file was created by CMPT_ME_BEME_RETS using the 201706 CRSP database.
  The portfolios are constructed at the end of each June.

  Average Value Weighted Returns -- Monthly
,SMALL LoBM,ME1 BM2,SMALL HiBM
192607,1.0874,0.9349,-99.99
192608,0.7,1.4,2.1

  Average Value Weighted Returns -- Annual from January to December
,SMALL LoBM,ME1 BM2,SMALL HiBM
1927,30.1,25.2,40.3

  Number of Firms in Portfolios
,SMALL LoBM,ME1 BM2,SMALL HiBM
192607,100,200,300
";

fn pipeline(root: &Path, parallel: bool) -> Pipeline {
    let mut config = IngestConfig::default();
    config.output.root = root.to_path_buf();
    config.run.parallel = parallel;
    Pipeline::new(&config)
}

fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn snapshot(s: &str) -> SnapshotDate {
    s.parse().unwrap()
}

#[test]
fn batch_ingests_and_catalogs_every_unit() {
    let dir = TempDir::new().unwrap();
    let src = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", BE_ME);
    let p = pipeline(&dir.path().join("out"), false);

    let result = p.run_batch(&[src]).unwrap();
    assert!(!result.any_failed());
    assert_eq!(result.summary.blocks_emitted, 3);
    assert_eq!(result.summary.records_emitted, 6 + 3 + 3);
    assert_eq!(result.lineage.len(), 3);
    assert!(result
        .lineage
        .iter()
        .all(|r| r.status == LineageStatus::Success));
    assert!(result.manifest_path.exists());
    assert_eq!(RunSummary::load_manifest(&result.manifest_path).unwrap(), result.summary);

    let ledger = p.ledger().load().unwrap();
    assert_eq!(ledger, result.lineage);
}

#[test]
fn rerun_with_same_snapshot_overwrites() {
    let dir = TempDir::new().unwrap();
    let src = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", BE_ME);
    let p = pipeline(&dir.path().join("out"), false);

    p.run_batch(&[src.clone()]).unwrap();
    let first = DatasetViews::new(p.store()).history().unwrap();
    p.run_batch(&[src]).unwrap();
    let second = DatasetViews::new(p.store()).history().unwrap();

    assert_eq!(first.height(), second.height());
    assert_eq!(
        view_records(&first).unwrap(),
        view_records(&second).unwrap()
    );
    assert_eq!(p.store().partitions().unwrap().len(), 1);
    assert_eq!(p.ledger().load().unwrap().len(), 3);
}

#[test]
fn new_snapshot_is_additive() {
    let dir = TempDir::new().unwrap();
    let p = pipeline(&dir.path().join("out"), false);
    let old = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", BE_ME);
    p.run_batch(&[old]).unwrap();

    let updated = BE_ME.replace("192608,0.7,1.4,2.1", "192608,0.7,1.4,2.1\n192609,5.5,6.6,7.7");
    let new = write_source(dir.path(), "july18_Portfolios_Formed_on_BE-ME.CSV", &updated);
    p.run_batch(&[new]).unwrap();

    let views = DatasetViews::new(p.store());
    let old_pit = views.point_in_time(snapshot("2017-07-31")).unwrap();
    let new_pit = views.point_in_time(snapshot("2018-07-31")).unwrap();
    assert_eq!(old_pit.height(), 12);
    assert_eq!(new_pit.height(), 15);
    assert_eq!(views.history().unwrap().height(), 27);

    let current = view_records(&views.current().unwrap()).unwrap();
    assert_eq!(current.len(), 15);
    assert!(current
        .iter()
        .all(|(ds, r)| ds == "Portfolios_Formed_on_BE-ME" && r.ingestion_date == snapshot("2018-07-31")));
    assert_eq!(p.ledger().load().unwrap().len(), 6);
}

#[test]
fn fatal_file_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let good = write_source(dir.path(), "july17_good.CSV", BE_ME);
    let undated = write_source(dir.path(), "undated.CSV", BE_ME);
    let prose = write_source(dir.path(), "july17_prose.CSV", "nothing tabular here\n");
    let p = pipeline(&dir.path().join("out"), true);

    let result = p.run_batch(&[good, undated, prose]).unwrap();
    assert!(result.any_failed());
    assert_eq!(result.summary.files_processed, 3);
    assert_eq!(result.summary.files_failed, 2);

    let errors: Vec<&FileError> = result.files.iter().filter_map(|f| f.error.as_ref()).collect();
    assert!(errors.iter().any(|e| matches!(e, FileError::MissingSnapshot)));
    assert!(errors.iter().any(|e| matches!(e, FileError::NoBlocks)));

    let failed: Vec<_> = result
        .lineage
        .iter()
        .filter(|r| r.status == LineageStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|r| r.metric_type == "unknown" && r.record_count == 0));
    assert_eq!(result.summary.lineage_success, 3);
}

#[test]
fn corrupted_artifact_is_failed_on_rebuild() {
    let dir = TempDir::new().unwrap();
    let src = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", BE_ME);
    let p = pipeline(&dir.path().join("out"), false);
    let result = p.run_batch(&[src]).unwrap();

    let victim = result
        .lineage
        .iter()
        .find(|r| r.metric_type == "number_firm_portfolio")
        .unwrap();
    fs::write(&victim.file_path, b"PAR1\x00\x00").unwrap();

    let rebuilt = rebuild_ledger(p.store(), Utc::now()).unwrap();
    assert_eq!(rebuilt.len(), 3);
    let broken = rebuilt
        .iter()
        .find(|r| r.metric_type == "number_firm_portfolio")
        .unwrap();
    assert_eq!(broken.status, LineageStatus::Failed);
    assert_eq!(broken.record_count, 0);
    assert_eq!(broken.src_filename, "july17_Portfolios_Formed_on_BE-ME.CSV");
    assert_eq!(
        rebuilt
            .iter()
            .filter(|r| r.status == LineageStatus::Success)
            .count(),
        2
    );

    // Views skip the unreadable unit and still serve the rest.
    let history = DatasetViews::new(p.store()).history().unwrap();
    assert_eq!(history.height(), 9);
}

#[test]
fn serial_and_parallel_batches_agree() {
    let dir = TempDir::new().unwrap();
    let names = ["july17_a.CSV", "july17_b.CSV", "july17_c.CSV", "july18_a.CSV"];
    let srcs: Vec<PathBuf> = names
        .iter()
        .map(|n| write_source(dir.path(), n, BE_ME))
        .collect();

    let serial = pipeline(&dir.path().join("serial"), false)
        .run_batch(&srcs)
        .unwrap();
    let parallel = pipeline(&dir.path().join("parallel"), true)
        .run_batch(&srcs)
        .unwrap();

    assert_eq!(serial.summary.run_id, parallel.summary.run_id);
    assert_eq!(serial.summary.records_emitted, parallel.summary.records_emitted);

    let a = export_view_csv(&DatasetViews::new(&panelfold_core::store::ParquetStore::new(
        dir.path().join("serial"),
    ))
    .history()
    .unwrap())
    .unwrap();
    let b = export_view_csv(&DatasetViews::new(&panelfold_core::store::ParquetStore::new(
        dir.path().join("parallel"),
    ))
    .history()
    .unwrap())
    .unwrap();
    assert_eq!(a, b);
}

#[test]
fn same_partition_in_one_batch_fails_the_later_file() {
    let dir = TempDir::new().unwrap();
    let small = "  Average Firm Size\n,A,B\n192607,1,2\n";
    let large = "  Average Firm Size\n,A,B\n192607,9,9\n192608,9,9\n";
    let first = write_source(dir.path(), "july17_X.CSV", small);
    let second = write_source(dir.path(), "july18_X.CSV", large);

    for parallel in [false, true] {
        let p = pipeline(&dir.path().join(format!("out-{parallel}")), parallel)
            .with_snapshot(Some(snapshot("2017-07-31")));
        let result = p.run_batch(&[first.clone(), second.clone()]).unwrap();

        assert_eq!(result.summary.files_failed, 1);
        assert!(matches!(
            &result.files[1].error,
            Some(FileError::PartitionConflict { claimed_by, .. }) if claimed_by == "july17_X.CSV"
        ));

        let ok = result
            .lineage
            .iter()
            .find(|r| r.src_filename == "july17_X.CSV")
            .unwrap();
        assert_eq!(ok.status, LineageStatus::Success);
        assert_eq!(ok.record_count, 2);
        let lost = result
            .lineage
            .iter()
            .find(|r| r.src_filename == "july18_X.CSV")
            .unwrap();
        assert_eq!(lost.status, LineageStatus::Failed);
        assert_eq!(lost.metric_type, "unknown");

        let values: Vec<Option<f64>> = view_records(&DatasetViews::new(p.store()).history().unwrap())
            .unwrap()
            .into_iter()
            .map(|(_, r)| r.value)
            .collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0)]);
    }
}

#[test]
fn shrinking_rerun_leaves_no_stale_ledger_entries() {
    let dir = TempDir::new().unwrap();
    let p = pipeline(&dir.path().join("out"), false);
    let src = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", BE_ME);
    p.run_batch(&[src.clone()]).unwrap();
    assert_eq!(p.ledger().load().unwrap().len(), 3);

    let one_block = "  Average Firm Size\n,SMALL LoBM\n192607,10.5\n";
    fs::write(&src, one_block).unwrap();
    p.run_batch(&[src]).unwrap();

    let ledger = p.ledger().load().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].metric_type, "firm_size");
    assert!(ledger
        .iter()
        .all(|r| r.status == LineageStatus::Success && Path::new(&r.file_path).exists()));
}

#[test]
fn fixed_file_replaces_its_failed_entry() {
    let dir = TempDir::new().unwrap();
    let p = pipeline(&dir.path().join("out"), false);
    let src = write_source(dir.path(), "july17_Portfolios_Formed_on_BE-ME.CSV", "prose only\n");
    p.run_batch(&[src.clone()]).unwrap();
    assert_eq!(p.ledger().load().unwrap()[0].metric_type, "unknown");

    fs::write(&src, BE_ME).unwrap();
    p.run_batch(&[src]).unwrap();
    let ledger = p.ledger().load().unwrap();
    assert_eq!(ledger.len(), 3);
    assert!(ledger.iter().all(|r| r.status == LineageStatus::Success));
}

#[test]
fn invalid_snapshot_override_catalogs_every_file_as_failed() {
    let dir = TempDir::new().unwrap();
    let a = write_source(dir.path(), "july17_a.CSV", BE_ME);
    let b = write_source(dir.path(), "july17_b.CSV", BE_ME);
    let p = pipeline(&dir.path().join("out"), true).with_snapshot_text(Some("31/07/2017"));

    let result = p.run_batch(&[a, b]).unwrap();
    assert_eq!(result.summary.files_failed, 2);
    assert!(result
        .files
        .iter()
        .all(|f| matches!(f.error, Some(FileError::InvalidSnapshot(_)))));
    assert_eq!(result.lineage.len(), 2);
    assert!(result
        .lineage
        .iter()
        .all(|r| r.status == LineageStatus::Failed && r.metric_type == "unknown"));
    assert_eq!(p.ledger().load().unwrap(), result.lineage);
    assert!(p.store().partitions().unwrap().is_empty());
}
