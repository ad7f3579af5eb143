//! Ledger maintenance: full rebuild from the artifact store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use panelfold_core::domain::{LineageRecord, LineageStatus};
use panelfold_core::lineage::{LineageCataloger, OutputUnit};
use panelfold_core::store::{LineageLedger, ParquetStore, StoreError};

/// Re-catalog every committed partition and replace the ledger.
///
/// The source filename comes from each partition's `_source.json`; a
/// partition without one is attributed to its dataset key. Failed entries of
/// the previous ledger whose key has no artifact in the store are carried
/// over, since a fatal file leaves nothing on disk to rediscover.
pub fn rebuild_ledger(
    store: &ParquetStore,
    catalog_time: DateTime<Utc>,
) -> Result<Vec<LineageRecord>, StoreError> {
    let partitions = store.partitions()?;
    let mut units = Vec::new();
    for p in &partitions {
        let src_filename = match &p.source {
            Some(meta) => meta.src_filename.clone(),
            None => {
                warn!(dir = %p.dir.display(), "partition has no source sidecar");
                p.dataset.to_string()
            }
        };
        for (metric, path) in &p.units {
            units.push(OutputUnit {
                src_filename: src_filename.clone(),
                ingestion_date: p.ingestion_date,
                metric_type: metric.clone(),
                artifact: Some(path.clone()),
            });
        }
    }

    let mut records = LineageCataloger::new(store, catalog_time).catalog(&units);

    let ledger = LineageLedger::new(store.ledger_path());
    let crawled: HashSet<_> = records.iter().map(|r| r.key()).collect();
    match ledger.load() {
        Ok(previous) => records.extend(
            previous
                .into_iter()
                .filter(|r| r.status == LineageStatus::Failed && !crawled.contains(&r.key())),
        ),
        Err(e) => warn!(error = %e, "previous ledger unreadable, rebuilding from store only"),
    }

    ledger.replace(&records)?;
    records.sort_by_key(|r| r.key());
    info!(
        partitions = partitions.len(),
        entries = records.len(),
        "lineage ledger rebuilt"
    );
    Ok(records)
}
