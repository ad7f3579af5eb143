//! Panelfold Core: wide-format panel tables to long-format records, with lineage.
//!
//! This crate contains the pure transformation engine and its persistence:
//! - Domain types (raw tables, blocks, snapshots, long and lineage records)
//! - Block scanning over concatenated wide tables
//! - Title → metric classification
//! - Date token resolution (annual `YYYY`, monthly `YYYYMM`)
//! - Long-format emission with a configurable missing-value policy
//! - Columnar schema contract and the partitioned Parquet store
//! - Lineage cataloging behind the `ArtifactReader` seam

pub mod diagnostics;
pub mod domain;
pub mod lineage;
pub mod schema;
pub mod store;
pub mod transform;

pub use diagnostics::{Diagnostic, DiagnosticCounts, ReasonCode};
pub use lineage::{ArtifactReader, LineageCataloger, OutputUnit};
