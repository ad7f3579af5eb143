//! Domain types: raw tables, blocks, identifiers, snapshots and output records.

pub mod ids;
pub mod record;
pub mod snapshot;
pub mod table;

pub use ids::{DatasetKey, MetricId};
pub use record::{LineageRecord, LineageStatus, LongRecord};
pub use snapshot::{dataset_key, SnapshotDate, SnapshotError};
pub use table::{normalize_portfolio, split_fields, Block, DataRow, RawTable};
