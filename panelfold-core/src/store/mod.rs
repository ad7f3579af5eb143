//! Columnar persistence with Hive-style partitioning.
//!
//! Layout under the output root:
//!
//! ```text
//! transformed/dataset={key}/ingestion_date={YYYY-MM-DD}/{metric}.parquet
//! transformed/dataset={key}/ingestion_date={YYYY-MM-DD}/_source.json
//! lineage/ingestion_map.parquet
//! ```
//!
//! A partition is staged in a sibling directory and swapped in with a rename,
//! so readers see either the previous partition or the complete new one.

pub mod frame;
pub mod ledger;
pub mod parquet;

pub use frame::{frame_to_lineage, frame_to_records, lineage_to_frame, records_to_frame};
pub use ledger::LineageLedger;
pub use parquet::{ParquetStore, PartitionInfo, PartitionWriter, SourceMeta};

use std::path::PathBuf;

use crate::schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Sidecar error: {0}")]
    Sidecar(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
