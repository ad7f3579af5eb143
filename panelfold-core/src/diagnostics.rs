//! Data-quality diagnostics.
//!
//! Row- and block-level problems are recovered locally: the offending unit is
//! skipped, a `Diagnostic` is recorded and a `warn!` is logged. They never
//! surface as errors past the emitter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of reasons a line, row, cell or block was dropped or flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Line is neither title, column header nor data row for the current state.
    MalformedLine,
    /// Title with no column-header line before end of input.
    IncompleteBlock,
    /// Column-header line with no title; the whole block is discarded.
    UntitledBlock,
    InvalidDateToken,
    /// Block mixes annual and monthly date tokens.
    MixedGranularity,
    ColumnCountMismatch,
    /// Non-empty, non-sentinel cell that is not a finite number; becomes null.
    UnparseableCell,
    /// All-nines value not in the configured sentinel set; kept as-is.
    SuspectedSentinel,
    /// Same metric identifier twice in one source file.
    DuplicateMetric,
    EmptyColumnName,
    /// Two column headers normalize to the same portfolio; the later gets a suffix.
    DuplicateColumn,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MalformedLine => "malformed_line",
            ReasonCode::IncompleteBlock => "incomplete_block",
            ReasonCode::UntitledBlock => "untitled_block",
            ReasonCode::InvalidDateToken => "invalid_date_token",
            ReasonCode::MixedGranularity => "mixed_granularity",
            ReasonCode::ColumnCountMismatch => "column_count_mismatch",
            ReasonCode::UnparseableCell => "unparseable_cell",
            ReasonCode::SuspectedSentinel => "suspected_sentinel",
            ReasonCode::DuplicateMetric => "duplicate_metric",
            ReasonCode::EmptyColumnName => "empty_column_name",
            ReasonCode::DuplicateColumn => "duplicate_column",
        }
    }

    /// Whether this reason removes a data row from the output.
    pub fn drops_row(&self) -> bool {
        matches!(
            self,
            ReasonCode::InvalidDateToken | ReasonCode::ColumnCountMismatch
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recovered data-quality problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based source line, 0 when not tied to a line.
    pub line: usize,
    pub reason: ReasonCode,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(line: usize, reason: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            line,
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.reason, self.detail)
    }
}

/// Per-reason tallies, ordered for stable reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCounts(pub BTreeMap<ReasonCode, usize>);

impl DiagnosticCounts {
    pub fn add(&mut self, reason: ReasonCode, n: usize) {
        if n > 0 {
            *self.0.entry(reason).or_default() += n;
        }
    }

    pub fn record(&mut self, diagnostics: &[Diagnostic]) {
        for d in diagnostics {
            self.add(d.reason, 1);
        }
    }

    pub fn merge(&mut self, other: &DiagnosticCounts) {
        for (reason, n) in &other.0 {
            self.add(*reason, *n);
        }
    }

    pub fn get(&self, reason: ReasonCode) -> usize {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// Only the reasons that drop data rows.
    pub fn dropped_rows(&self) -> DiagnosticCounts {
        DiagnosticCounts(
            self.0
                .iter()
                .filter(|(r, _)| r.drops_row())
                .map(|(r, n)| (*r, *n))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_and_merge() {
        let mut a = DiagnosticCounts::default();
        a.record(&[
            Diagnostic::new(1, ReasonCode::InvalidDateToken, "x"),
            Diagnostic::new(2, ReasonCode::InvalidDateToken, "y"),
            Diagnostic::new(3, ReasonCode::UnparseableCell, "z"),
        ]);
        let mut b = DiagnosticCounts::default();
        b.add(ReasonCode::ColumnCountMismatch, 4);
        b.add(ReasonCode::MalformedLine, 0);
        a.merge(&b);

        assert_eq!(a.get(ReasonCode::InvalidDateToken), 2);
        assert_eq!(a.total(), 7);
        assert!(!a.0.contains_key(&ReasonCode::MalformedLine));
        assert_eq!(a.dropped_rows().total(), 6);
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::ColumnCountMismatch).unwrap();
        assert_eq!(json, "\"column_count_mismatch\"");
        assert_eq!(ReasonCode::ColumnCountMismatch.as_str(), "column_count_mismatch");
    }
}
