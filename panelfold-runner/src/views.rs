//! Query views over the artifact store.
//!
//! - `history`: every long record across all snapshots
//! - `point_in_time`: only records of one exact `ingestion_date`
//! - `current`: per dataset, only the latest `ingestion_date`
//!
//! Selection happens at the partition level, so a view never reads artifacts
//! it does not return. Every view adds a `dataset` column.

use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::{debug, warn};

use panelfold_core::domain::{LongRecord, SnapshotDate};
use panelfold_core::schema::LONG_COLUMNS;
use panelfold_core::store::{frame_to_records, records_to_frame, ParquetStore, PartitionInfo, StoreError};
use panelfold_core::transform::WideTable;

pub const DATASET_COLUMN: &str = "dataset";

pub struct DatasetViews<'a> {
    store: &'a ParquetStore,
}

impl<'a> DatasetViews<'a> {
    pub fn new(store: &'a ParquetStore) -> Self {
        Self { store }
    }

    /// Every record of every committed partition.
    pub fn history(&self) -> Result<DataFrame, StoreError> {
        let partitions = self.store.partitions()?;
        self.collect(partitions.iter())
    }

    /// Records of exactly one snapshot, across all datasets.
    pub fn point_in_time(&self, date: SnapshotDate) -> Result<DataFrame, StoreError> {
        let partitions = self.store.partitions()?;
        self.collect(partitions.iter().filter(|p| p.ingestion_date == date))
    }

    /// Per dataset, the records of its latest snapshot only.
    pub fn current(&self) -> Result<DataFrame, StoreError> {
        let partitions = self.store.partitions()?;
        let mut latest: BTreeMap<&str, SnapshotDate> = BTreeMap::new();
        for p in &partitions {
            latest
                .entry(p.dataset.as_str())
                .and_modify(|d| *d = (*d).max(p.ingestion_date))
                .or_insert(p.ingestion_date);
        }
        self.collect(
            partitions
                .iter()
                .filter(|p| latest.get(p.dataset.as_str()) == Some(&p.ingestion_date)),
        )
    }

    fn collect<'p>(
        &self,
        partitions: impl Iterator<Item = &'p PartitionInfo>,
    ) -> Result<DataFrame, StoreError> {
        let mut out = with_dataset(records_to_frame(&[])?, "")?;
        for p in partitions {
            for (metric, path) in &p.units {
                let df = match self.store.read_frame(path) {
                    Ok(df) => df,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                        continue;
                    }
                };
                let df = df
                    .select(LONG_COLUMNS)
                    .map_err(|e| StoreError::Parquet(format!("select: {e}")))?;
                let df = with_dataset(df, p.dataset.as_str())?;
                out.vstack_mut(&df)
                    .map_err(|e| StoreError::Parquet(format!("vstack {metric}: {e}")))?;
            }
        }
        debug!(rows = out.height(), "view collected");
        Ok(out)
    }
}

fn with_dataset(mut df: DataFrame, dataset: &str) -> Result<DataFrame, StoreError> {
    let values = vec![dataset; df.height()];
    df.with_column(Column::new(DATASET_COLUMN.into(), values))
        .map_err(|e| StoreError::Parquet(format!("dataset column: {e}")))?;
    Ok(df)
}

/// Records of a view together with their dataset, in view order.
pub fn view_records(view: &DataFrame) -> Result<Vec<(String, LongRecord)>, StoreError> {
    let datasets = view
        .column(DATASET_COLUMN)
        .and_then(|c| c.str())
        .map_err(|e| StoreError::Parquet(format!("dataset column: {e}")))?;
    let records = frame_to_records(view)?;
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, r)| (datasets.get(i).unwrap_or_default().to_string(), r))
        .collect())
}

/// One metric of one dataset snapshot, pivoted back to wide form.
#[derive(Debug, Clone)]
pub struct WideView {
    pub dataset: String,
    pub ingestion_date: SnapshotDate,
    pub table: WideTable,
}

/// Pivot a view back to wide tables, one per (dataset, snapshot, metric).
pub fn wide_tables(view: &DataFrame) -> Result<Vec<WideView>, StoreError> {
    let mut order: Vec<(String, SnapshotDate)> = Vec::new();
    let mut groups: BTreeMap<(String, SnapshotDate), Vec<LongRecord>> = BTreeMap::new();
    for (dataset, rec) in view_records(view)? {
        let key = (dataset, rec.ingestion_date);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(rec);
    }

    let mut out = Vec::new();
    for key in order {
        let Some(records) = groups.remove(&key) else {
            continue;
        };
        for table in WideTable::from_records(&records) {
            out.push(WideView {
                dataset: key.0.clone(),
                ingestion_date: key.1,
                table,
            });
        }
    }
    Ok(out)
}
