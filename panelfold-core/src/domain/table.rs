//! Raw source tables and the blocks scanned out of them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

/// One source file as an ordered sequence of text lines.
///
/// Read-only once constructed; stages borrow lines from it and never mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    source: String,
    lines: Vec<String>,
}

impl RawTable {
    /// Build a table from in-memory text. `\r\n` line endings are accepted.
    pub fn from_text(source: impl Into<String>, text: &str) -> Self {
        let lines = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        Self {
            source: source.into(),
            lines,
        }
    }

    /// Read a table from disk. Invalid UTF-8 is replaced rather than rejected.
    pub fn read(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_text(name, &String::from_utf8_lossy(&bytes)))
    }

    /// Source filename this table was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True when every line is blank.
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    /// BLAKE3 hash of the table contents, line-terminated.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for line in &self.lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A data row: its 1-based source line number and its comma-separated fields.
///
/// `fields[0]` is the date token; the remaining fields are the cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRow {
    pub line: usize,
    pub fields: Vec<String>,
}

impl DataRow {
    pub fn date_token(&self) -> &str {
        self.fields.first().map(|f| f.trim()).unwrap_or("")
    }

    pub fn cells(&self) -> &[String] {
        self.fields.get(1..).unwrap_or(&[])
    }
}

/// One titled sub-table covering a single metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Human-readable title, trimmed (e.g. "Average Value Weighted Returns -- Monthly").
    pub title: String,
    /// 1-based line number of the title.
    pub title_line: usize,
    /// Raw column names from the column-header line, leading date column excluded.
    pub columns: Vec<String>,
    /// 1-based line number of the column-header line.
    pub header_line: usize,
    pub rows: Vec<DataRow>,
}

impl Block {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names normalized into portfolio identifiers, in header order.
    ///
    /// Headers that normalize to the same identifier keep their own column:
    /// later ones get `_2`, `_3` suffixes.
    pub fn portfolios(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let base = normalize_portfolio(c, i);
                let mut name = base.clone();
                let mut ordinal = 1;
                while !seen.insert(name.clone()) {
                    ordinal += 1;
                    name = format!("{base}_{ordinal}");
                }
                name
            })
            .collect()
    }
}

/// Lowercase a column header and join its words with underscores.
///
/// An empty header becomes `column_{n}` (1-based) so cells are never orphaned.
pub fn normalize_portfolio(raw: &str, index: usize) -> String {
    let joined = raw
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        format!("column_{}", index + 1)
    } else {
        joined
    }
}

/// Split a line into trimmed comma-separated fields.
pub fn split_fields(line: &str) -> Vec<String> {
    line.split(',').map(|f| f.trim().to_string()).collect()
}
