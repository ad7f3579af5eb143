//! Block scanner: splits a raw table into titled metric blocks.
//!
//! A three-state machine over lines:
//!
//! ```text
//! SeekingTitle  --text-->   SeekingHeader --header--> InDataRows
//!      ^                         |  ^                     |
//!      |                      text (replaces title)       |
//!      +-------------------------- blank -----------------+
//! ```
//!
//! Line kinds:
//! - blank: empty, whitespace, or only commas
//! - column header: first field empty, some later field present (`,SMALL LoBM,ME1 BM2`)
//! - data row: first field is all digits (`192607,1.0874,...`)
//! - text: anything else (titles, preamble, footnotes)
//!
//! Blocks are produced lazily in a single pass. Scanning never fails; skipped
//! lines and discarded blocks are recorded as diagnostics.

use std::collections::HashMap;
use std::mem;
use std::slice;

use tracing::{debug, warn};

use crate::diagnostics::{Diagnostic, ReasonCode};
use crate::domain::{normalize_portfolio, split_fields, Block, DataRow, RawTable};

/// Classification of a single source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    ColumnHeader(Vec<String>),
    Data(Vec<String>),
    Text(String),
}

impl LineKind {
    pub fn of(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return LineKind::Blank;
        }
        let fields = split_fields(trimmed);
        if fields.iter().all(|f| f.is_empty()) {
            return LineKind::Blank;
        }
        let first = &fields[0];
        if first.is_empty() {
            return LineKind::ColumnHeader(fields[1..].to_vec());
        }
        if first.bytes().all(|b| b.is_ascii_digit()) {
            return LineKind::Data(fields);
        }
        LineKind::Text(trimmed.to_string())
    }
}

#[derive(Debug)]
struct OpenBlock {
    title: Option<(usize, String)>,
    columns: Vec<String>,
    header_line: usize,
    rows: Vec<DataRow>,
    /// Text line seen inside the data rows; becomes the next title if a
    /// column header follows it directly, otherwise it is malformed.
    held: Option<(usize, String)>,
}

#[derive(Debug)]
enum ScanState {
    SeekingTitle,
    SeekingHeader { line: usize, title: String },
    InDataRows(OpenBlock),
}

/// Lazy, single-pass iterator of blocks over a [`RawTable`].
pub struct BlockScanner<'a> {
    lines: slice::Iter<'a, String>,
    line_no: usize,
    state: ScanState,
    diagnostics: Vec<Diagnostic>,
    finished: bool,
}

/// Scan a raw table into blocks.
pub fn scan(table: &RawTable) -> BlockScanner<'_> {
    BlockScanner::new(table)
}

impl<'a> BlockScanner<'a> {
    /// A scanner positioned before the first line of `table`.
    pub fn new(table: &'a RawTable) -> Self {
        Self {
            lines: table.lines().iter(),
            line_no: 0,
            state: ScanState::SeekingTitle,
            diagnostics: Vec::new(),
            finished: false,
        }
    }

    /// Diagnostics recorded so far. Complete once the iterator is exhausted.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drain the diagnostics recorded so far.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        mem::take(&mut self.diagnostics)
    }

    fn flag(&mut self, line: usize, reason: ReasonCode, detail: impl Into<String>) {
        let d = Diagnostic::new(line, reason, detail);
        warn!(line = d.line, reason = %d.reason, "{}", d.detail);
        self.diagnostics.push(d);
    }

    fn open(&mut self, title: Option<(usize, String)>, columns: Vec<String>, header_line: usize) -> ScanState {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            if c.is_empty() {
                self.flag(
                    header_line,
                    ReasonCode::EmptyColumnName,
                    format!("column {} has no name", i + 1),
                );
            }
            let name = normalize_portfolio(c, i);
            if let Some(first) = seen.get(&name) {
                self.flag(
                    header_line,
                    ReasonCode::DuplicateColumn,
                    format!("column {} repeats column {first} as '{name}'", i + 1),
                );
            } else {
                seen.insert(name, i + 1);
            }
        }
        ScanState::InDataRows(OpenBlock {
            title,
            columns,
            header_line,
            rows: Vec::new(),
            held: None,
        })
    }

    fn reject_held(&mut self, held: Option<(usize, String)>) {
        if let Some((line, text)) = held {
            self.flag(
                line,
                ReasonCode::MalformedLine,
                format!("unrecognized line inside block: '{text}'"),
            );
        }
    }

    fn close(&mut self, block: OpenBlock) -> Option<Block> {
        match block.title {
            Some((title_line, title)) => {
                debug!(
                    line = title_line,
                    title = %title,
                    rows = block.rows.len(),
                    "block scanned"
                );
                Some(Block {
                    title,
                    title_line,
                    columns: block.columns,
                    header_line: block.header_line,
                    rows: block.rows,
                })
            }
            None => {
                self.flag(
                    block.header_line,
                    ReasonCode::UntitledBlock,
                    format!(
                        "column header without a title; discarding block of {} rows",
                        block.rows.len()
                    ),
                );
                None
            }
        }
    }

    /// Advance the state machine by one line, returning a block if one closed.
    fn step(&mut self, line: usize, raw: &str) -> Option<Block> {
        let kind = LineKind::of(raw);
        let state = mem::replace(&mut self.state, ScanState::SeekingTitle);

        let (next, emitted) = match (state, kind) {
            (ScanState::SeekingTitle, LineKind::Blank) => (ScanState::SeekingTitle, None),
            (ScanState::SeekingTitle, LineKind::ColumnHeader(columns)) => {
                (self.open(None, columns, line), None)
            }
            (ScanState::SeekingTitle, LineKind::Data(_)) => {
                self.flag(line, ReasonCode::MalformedLine, "data row outside any block");
                (ScanState::SeekingTitle, None)
            }
            (ScanState::SeekingTitle, LineKind::Text(title)) => {
                (ScanState::SeekingHeader { line, title }, None)
            }

            (s @ ScanState::SeekingHeader { .. }, LineKind::Blank) => (s, None),
            (ScanState::SeekingHeader { title: old, .. }, LineKind::Text(title)) => {
                debug!(line, superseded = %old, "title line superseded");
                (ScanState::SeekingHeader { line, title }, None)
            }
            (ScanState::SeekingHeader { line: tl, title }, LineKind::ColumnHeader(columns)) => {
                (self.open(Some((tl, title)), columns, line), None)
            }
            (s @ ScanState::SeekingHeader { .. }, LineKind::Data(_)) => {
                self.flag(line, ReasonCode::MalformedLine, "data row before column header");
                (s, None)
            }

            (ScanState::InDataRows(mut block), LineKind::Blank) => {
                let held = block.held.take();
                self.reject_held(held);
                let emitted = self.close(block);
                (ScanState::SeekingTitle, emitted)
            }
            (ScanState::InDataRows(mut block), LineKind::Data(fields)) => {
                let held = block.held.take();
                self.reject_held(held);
                block.rows.push(DataRow { line, fields });
                (ScanState::InDataRows(block), None)
            }
            (ScanState::InDataRows(mut block), LineKind::ColumnHeader(columns)) => {
                let title = block.held.take();
                let emitted = self.close(block);
                (self.open(title, columns, line), emitted)
            }
            (ScanState::InDataRows(mut block), LineKind::Text(text)) => {
                let held = block.held.replace((line, text));
                self.reject_held(held);
                (ScanState::InDataRows(block), None)
            }
        };

        self.state = next;
        emitted
    }

    fn finish(&mut self) -> Option<Block> {
        if self.finished {
            return None;
        }
        self.finished = true;
        match mem::replace(&mut self.state, ScanState::SeekingTitle) {
            ScanState::SeekingTitle => None,
            ScanState::SeekingHeader { line, title } => {
                self.flag(
                    line,
                    ReasonCode::IncompleteBlock,
                    format!("title '{title}' has no column header line"),
                );
                None
            }
            ScanState::InDataRows(mut block) => {
                let held = block.held.take();
                self.reject_held(held);
                self.close(block)
            }
        }
    }
}

impl Iterator for BlockScanner<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        loop {
            let Some(raw) = self.lines.next() else {
                return self.finish();
            };
            self.line_no += 1;
            if let Some(block) = self.step(self.line_no, raw) {
                return Some(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> RawTable {
        RawTable::from_text("test.CSV", text)
    }

    const TWO_BLOCKS: &str = "\
  This file was created by CMPT_ME_BEME_RETS using the 201706 CRSP database.
  The 1-month TBill return is from Ibbotson and Associates, Inc.

  Average Value Weighted Returns -- Monthly
,SMALL LoBM,ME1 BM2
192607,   1.0874,   0.9349
192608,   0.7030,   1.4888

  Average Value Weighted Returns -- Annual from January to December
,SMALL LoBM,ME1 BM2
1927,  31.5204,  24.2322
";

    #[test]
    fn line_kinds() {
        assert_eq!(LineKind::of("   "), LineKind::Blank);
        assert_eq!(LineKind::of(",,,"), LineKind::Blank);
        assert_eq!(
            LineKind::of(",SMALL LoBM,ME1 BM2"),
            LineKind::ColumnHeader(vec!["SMALL LoBM".into(), "ME1 BM2".into()])
        );
        assert!(matches!(LineKind::of("  192607,1.0,2.0"), LineKind::Data(_)));
        assert!(matches!(LineKind::of("19x607,1.0"), LineKind::Text(_)));
        assert_eq!(
            LineKind::of("  Average Firm Size  "),
            LineKind::Text("Average Firm Size".into())
        );
    }

    #[test]
    fn scans_titled_blocks_and_skips_preamble() {
        let t = table(TWO_BLOCKS);
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].title, "Average Value Weighted Returns -- Monthly");
        assert_eq!(blocks[0].title_line, 4);
        assert_eq!(blocks[0].columns, vec!["SMALL LoBM", "ME1 BM2"]);
        assert_eq!(blocks[0].rows.len(), 2);
        assert_eq!(blocks[0].rows[1].line, 7);
        assert_eq!(blocks[1].rows[0].date_token(), "1927");
        assert!(scanner.diagnostics().is_empty());
    }

    #[test]
    fn block_with_no_rows_is_still_produced() {
        let t = table("Number of Firms in Portfolios\n,A,B\n\n");
        let blocks: Vec<Block> = scan(&t).collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].rows.is_empty());
    }

    #[test]
    fn title_may_be_separated_from_header_by_blank_lines() {
        let t = table("Average Firm Size\n\n\n,A,B\n1990,1,2\n");
        let blocks: Vec<Block> = scan(&t).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "Average Firm Size");
        assert_eq!(blocks[0].header_line, 4);
    }

    #[test]
    fn trailing_title_without_header_is_incomplete() {
        let t = table("Title\n,A\n1990,1\n\nDangling title\n\n");
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();
        assert_eq!(blocks.len(), 1);
        let diags = scanner.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].reason, ReasonCode::IncompleteBlock);
        assert_eq!(diags[0].line, 5);
    }

    #[test]
    fn untitled_block_is_discarded() {
        let t = table(",A,B\n1990,1,2\n\nTitle\n,A,B\n1991,3,4\n");
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "Title");
        assert_eq!(scanner.diagnostics()[0].reason, ReasonCode::UntitledBlock);
    }

    #[test]
    fn stray_text_inside_block_is_malformed() {
        let t = table("Title\n,A\n1990,1\nfootnote here\n1991,2\n");
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();
        assert_eq!(blocks[0].rows.len(), 2);
        let diags = scanner.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].reason, ReasonCode::MalformedLine);
        assert_eq!(diags[0].line, 4);
    }

    #[test]
    fn title_directly_after_rows_starts_next_block() {
        let t = table("First\n,A\n1990,1\nSecond\n,A\n1990,2\n");
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].title, "Second");
        assert_eq!(blocks[1].title_line, 4);
        assert!(scanner.diagnostics().is_empty());
    }

    #[test]
    fn data_row_outside_block_is_malformed() {
        let t = table("192607,1.0\n");
        let mut scanner = scan(&t);
        assert_eq!(scanner.next(), None);
        assert_eq!(scanner.diagnostics()[0].reason, ReasonCode::MalformedLine);
    }

    #[test]
    fn exhausted_scanner_stays_exhausted() {
        let t = table("Title\n,A\n1990,1");
        let mut scanner = scan(&t);
        assert!(scanner.next().is_some());
        assert!(scanner.next().is_none());
        assert!(scanner.next().is_none());
    }

    #[test]
    fn empty_column_names_are_flagged() {
        let t = table("Title\n,A,,C\n1990,1,2,3\n");
        let mut scanner = scan(&t);
        let _ = scanner.by_ref().count();
        assert_eq!(scanner.diagnostics()[0].reason, ReasonCode::EmptyColumnName);
    }

    #[test]
    fn colliding_column_names_are_flagged() {
        let t = table("Title\n,A B,a  b,C\n1990,1,2,3\n");
        let mut scanner = scan(&t);
        let blocks: Vec<Block> = scanner.by_ref().collect();
        assert_eq!(blocks[0].portfolios(), vec!["a_b", "a_b_2", "c"]);
        let d = &scanner.diagnostics()[0];
        assert_eq!(d.reason, ReasonCode::DuplicateColumn);
        assert_eq!(d.line, 2);
    }
}
