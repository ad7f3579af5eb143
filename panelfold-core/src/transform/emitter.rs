//! Long-format emission: block rows × columns → [`LongRecord`]s.
//!
//! Emission order is rows in source order, then columns in header order.
//! Per-row and per-cell problems are recovered here and never abort a block.

use tracing::{debug, warn};

use super::date_token::DateTokenResolver;
use super::missing::{CellValue, MissingValuePolicy};
use crate::diagnostics::{Diagnostic, ReasonCode};
use crate::domain::{Block, LongRecord, MetricId, SnapshotDate};

/// Records and diagnostics produced from one block: one output unit.
#[derive(Debug, Clone)]
pub struct Emission {
    pub metric: MetricId,
    pub records: Vec<LongRecord>,
    pub diagnostics: Vec<Diagnostic>,
    /// Data rows in the block.
    pub rows_in: usize,
    /// Data rows that produced records.
    pub rows_emitted: usize,
}

impl Emission {
    pub fn rows_dropped(&self) -> usize {
        self.rows_in - self.rows_emitted
    }
}

#[derive(Debug, Clone, Default)]
pub struct LongFormatEmitter {
    policy: MissingValuePolicy,
}

impl LongFormatEmitter {
    pub fn new(policy: MissingValuePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MissingValuePolicy {
        &self.policy
    }

    /// Expand one block into long records: rows in source order, columns in
    /// header order. Dropped rows and nulled cells are reported in the
    /// returned diagnostics.
    pub fn emit(&self, block: &Block, metric: &MetricId, snapshot: SnapshotDate) -> Emission {
        let portfolios = block.portfolios();
        let width = block.width();
        let mut resolver = DateTokenResolver::new();
        let mut records = Vec::with_capacity(block.rows.len() * width);
        let mut diagnostics = Vec::new();
        let mut rows_emitted = 0;

        let mut flag = |line: usize, reason: ReasonCode, detail: String| {
            warn!(metric = %metric, line, reason = %reason, "{detail}");
            diagnostics.push(Diagnostic::new(line, reason, detail));
        };

        for row in &block.rows {
            let token = row.date_token();
            if let Err(e) = resolver.resolve(token) {
                flag(row.line, ReasonCode::InvalidDateToken, e.to_string());
                continue;
            }

            let cells = row.cells();
            if cells.len() != width {
                flag(
                    row.line,
                    ReasonCode::ColumnCountMismatch,
                    format!("expected {width} cells, found {}", cells.len()),
                );
                continue;
            }

            for (portfolio, cell) in portfolios.iter().zip(cells) {
                let parsed = self.policy.parse_cell(cell);
                match parsed {
                    CellValue::Unparseable => flag(
                        row.line,
                        ReasonCode::UnparseableCell,
                        format!("{portfolio}: '{}' is not a number", cell.trim()),
                    ),
                    CellValue::Suspect(v) => flag(
                        row.line,
                        ReasonCode::SuspectedSentinel,
                        format!("{portfolio}: {v} looks like a missing-value marker"),
                    ),
                    CellValue::Value(_) | CellValue::Missing => {}
                }
                records.push(LongRecord {
                    date_format: token.to_string(),
                    portfolio: portfolio.clone(),
                    metric_type: metric.clone(),
                    value: parsed.value(),
                    ingestion_date: snapshot,
                });
            }
            rows_emitted += 1;
        }

        if resolver.is_mixed() {
            flag(
                block.title_line,
                ReasonCode::MixedGranularity,
                format!("block '{}' mixes annual and monthly date tokens", block.title),
            );
        }

        debug!(
            metric = %metric,
            rows = block.rows.len(),
            emitted = rows_emitted,
            records = records.len(),
            "block emitted"
        );

        Emission {
            metric: metric.clone(),
            records,
            diagnostics,
            rows_in: block.rows.len(),
            rows_emitted,
        }
    }
}
