//! End-to-end scenarios through scanner, emitter, store and cataloger.

use std::fs;

use chrono::Utc;
use panelfold_core::domain::{DatasetKey, LineageStatus, MetricId, RawTable, SnapshotDate};
use panelfold_core::lineage::{LineageCataloger, OutputUnit};
use panelfold_core::store::ParquetStore;
use panelfold_core::transform::{fold_table, LongFormatEmitter};
use panelfold_core::ReasonCode;
use tempfile::TempDir;

fn snapshot() -> SnapshotDate {
    "2017-07-31".parse().unwrap()
}

#[test]
fn single_row_block_emits_one_record_per_column() {
    let table = RawTable::from_text(
        "JUL17_Portfolios_Formed_on_BE-ME.csv",
        "Average Value Weighted Returns -- Monthly\n,SMALL LoBM,ME1 BM2\n192607,1.0874,0.9349\n",
    );
    let folded = fold_table(&table, &LongFormatEmitter::default(), snapshot());

    assert_eq!(folded.emissions.len(), 1);
    let records = &folded.emissions[0].records;
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].date_format, "192607");
    assert_eq!(records[0].portfolio, "small_lobm");
    assert_eq!(records[0].metric_type.as_str(), "value_weighted_return");
    assert_eq!(records[0].value, Some(1.0874));
    assert_eq!(records[0].ingestion_date.to_string(), "2017-07-31");

    assert_eq!(records[1].portfolio, "me1_bm2");
    assert_eq!(records[1].value, Some(0.9349));
}

#[test]
fn sentinel_cell_is_null() {
    let table = RawTable::from_text(
        "x.csv",
        "Average Value Weighted Returns -- Monthly\n,SMALL LoBM,ME1 BM2\n192607,-99.99,0.9349\n",
    );
    let folded = fold_table(&table, &LongFormatEmitter::default(), snapshot());
    let records = &folded.emissions[0].records;
    assert_eq!(records[0].value, None);
    assert!(folded.counts().is_empty());
}

#[test]
fn zero_row_block_catalogs_as_empty_success() {
    let dir = TempDir::new().unwrap();
    let store = ParquetStore::new(dir.path());
    let table = RawTable::from_text("JUL17_x.csv", "Average Firm Size\n,Lo 10,Hi 10\n");
    let folded = fold_table(&table, &LongFormatEmitter::default(), snapshot());
    assert_eq!(folded.emissions.len(), 1);
    assert_eq!(folded.record_count(), 0);

    let key = DatasetKey("x".into());
    let mut writer = store.begin_partition(&key, snapshot()).unwrap();
    for e in &folded.emissions {
        writer.write_unit(&e.metric, &e.records).unwrap();
    }
    let written = writer.commit().unwrap();

    let units: Vec<OutputUnit> = written
        .into_iter()
        .map(|(metric, path)| OutputUnit {
            src_filename: table.source().to_string(),
            ingestion_date: snapshot(),
            metric_type: metric,
            artifact: Some(path),
        })
        .collect();
    let lineage = LineageCataloger::new(&store, Utc::now()).catalog(&units);

    assert_eq!(lineage.len(), 1);
    assert_eq!(lineage[0].record_count, 0);
    assert_eq!(lineage[0].status, LineageStatus::Success);
    assert_eq!(lineage[0].metric_type, "firm_size");
}

#[test]
fn unreadable_artifact_fails_only_its_unit() {
    let dir = TempDir::new().unwrap();
    let store = ParquetStore::new(dir.path());
    let key = DatasetKey("x".into());
    let table = RawTable::from_text(
        "JUL17_x.csv",
        "Average Firm Size\n,A\n192607,1\n\nNumber of Firms in Portfolios\n,A\n192607,5\n",
    );
    let folded = fold_table(&table, &LongFormatEmitter::default(), snapshot());

    let mut writer = store.begin_partition(&key, snapshot()).unwrap();
    for e in &folded.emissions {
        writer.write_unit(&e.metric, &e.records).unwrap();
    }
    let written = writer.commit().unwrap();

    // Truncate the first artifact after commit.
    fs::write(&written[0].1, b"PAR1").unwrap();

    let units: Vec<OutputUnit> = written
        .iter()
        .map(|(metric, path)| OutputUnit {
            src_filename: table.source().to_string(),
            ingestion_date: snapshot(),
            metric_type: metric.clone(),
            artifact: Some(path.clone()),
        })
        .collect();
    let lineage = LineageCataloger::new(&store, Utc::now()).catalog(&units);

    assert_eq!(lineage.len(), 2);
    let firm_size = lineage.iter().find(|r| r.metric_type == "firm_size").unwrap();
    assert_eq!(firm_size.status, LineageStatus::Failed);
    assert_eq!(firm_size.record_count, 0);
    let firms = lineage
        .iter()
        .find(|r| r.metric_type == "number_firm_portfolio")
        .unwrap();
    assert_eq!(firms.status, LineageStatus::Success);
    assert_eq!(firms.record_count, 1);
}

#[test]
fn row_faults_are_counted_by_reason() {
    let table = RawTable::from_text(
        "x.csv",
        "Average Firm Size\n,A,B\n192607,1,2\n192613,1,2\n192608,1\n192609,x,2\n",
    );
    let folded = fold_table(&table, &LongFormatEmitter::default(), snapshot());
    let counts = folded.counts();

    assert_eq!(counts.get(ReasonCode::InvalidDateToken), 1);
    assert_eq!(counts.get(ReasonCode::ColumnCountMismatch), 1);
    assert_eq!(counts.get(ReasonCode::UnparseableCell), 1);
    assert_eq!(counts.dropped_rows().total(), 2);
    assert_eq!(folded.record_count(), 4);
    assert_eq!(folded.emissions[0].metric, MetricId("firm_size".into()));
}
