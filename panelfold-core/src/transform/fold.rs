//! Whole-table transformation: every block of one source, classified and emitted.

use std::collections::HashSet;

use tracing::warn;

use super::classify::classify;
use super::emitter::{Emission, LongFormatEmitter};
use super::scanner::BlockScanner;
use crate::diagnostics::{Diagnostic, DiagnosticCounts, ReasonCode};
use crate::domain::{MetricId, RawTable, SnapshotDate};

/// Everything produced from one raw table.
#[derive(Debug, Clone)]
pub struct FoldedTable {
    /// One emission per block, in block order. Metric ids are unique.
    pub emissions: Vec<Emission>,
    /// Scanner and duplicate-metric diagnostics; row-level ones live on each emission.
    pub diagnostics: Vec<Diagnostic>,
}

impl FoldedTable {
    pub fn record_count(&self) -> usize {
        self.emissions.iter().map(|e| e.records.len()).sum()
    }

    /// Counts over table-level and every emission's diagnostics.
    pub fn counts(&self) -> DiagnosticCounts {
        let mut counts = DiagnosticCounts::default();
        counts.record(&self.diagnostics);
        for e in &self.emissions {
            counts.record(&e.diagnostics);
        }
        counts
    }
}

/// Scan, classify and emit every block of `table`.
///
/// A metric seen twice gets an ordinal suffix (`_2`, `_3`, ...) so each block
/// stays its own output unit.
pub fn fold_table(
    table: &RawTable,
    emitter: &LongFormatEmitter,
    snapshot: SnapshotDate,
) -> FoldedTable {
    let mut scanner = BlockScanner::new(table);
    let mut seen: HashSet<MetricId> = HashSet::new();
    let mut emissions = Vec::new();
    let mut diagnostics = Vec::new();

    for block in scanner.by_ref() {
        let base = classify(&block.title);
        let mut metric = base.clone();
        let mut ordinal = 1;
        while seen.contains(&metric) {
            ordinal += 1;
            metric = base.with_ordinal(ordinal);
        }
        if ordinal > 1 {
            let detail = format!("'{}' already emitted; stored as {metric}", base);
            warn!(src = table.source(), line = block.title_line, "{detail}");
            diagnostics.push(Diagnostic::new(
                block.title_line,
                ReasonCode::DuplicateMetric,
                detail,
            ));
        }
        seen.insert(metric.clone());
        emissions.push(emitter.emit(&block, &metric, snapshot));
    }

    let mut all = scanner.take_diagnostics();
    all.append(&mut diagnostics);
    all.sort_by_key(|d| d.line);

    FoldedTable {
        emissions,
        diagnostics: all,
    }
}
