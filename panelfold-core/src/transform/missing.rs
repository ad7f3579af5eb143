//! Missing-value policy for cell parsing.
//!
//! The upstream "missing" markers are runs of nines whose exact form varies by
//! table, so the sentinel set is configuration rather than a constant.

use serde::{Deserialize, Serialize};

/// Outcome of parsing one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Value(f64),
    /// Empty/whitespace or a configured sentinel.
    Missing,
    /// Not a finite number; emitted as null with a warning.
    Unparseable,
    /// A number that looks like an unconfigured sentinel; kept, with a warning.
    Suspect(f64),
}

impl CellValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            CellValue::Value(v) | CellValue::Suspect(v) => Some(*v),
            CellValue::Missing | CellValue::Unparseable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingValuePolicy {
    /// Cell texts meaning "missing". Matched textually and, when they parse,
    /// numerically (`-99.990` matches `-99.99`).
    pub sentinels: Vec<String>,
    /// Warn on all-nines values that are not configured sentinels.
    pub flag_suspected: bool,
}

impl Default for MissingValuePolicy {
    fn default() -> Self {
        Self {
            sentinels: vec!["-99.99".into(), "-999".into()],
            flag_suspected: true,
        }
    }
}

impl MissingValuePolicy {
    pub fn new(sentinels: Vec<String>) -> Self {
        Self {
            sentinels,
            flag_suspected: true,
        }
    }

    /// A policy where only empty cells are missing.
    pub fn none() -> Self {
        Self {
            sentinels: Vec::new(),
            flag_suspected: false,
        }
    }

    pub fn is_sentinel(&self, cell: &str) -> bool {
        let cell = cell.trim();
        let parsed = cell.parse::<f64>().ok();
        self.sentinels.iter().any(|s| {
            let s = s.trim();
            s == cell
                || match (parsed, s.parse::<f64>().ok()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
        })
    }

    pub fn parse_cell(&self, cell: &str) -> CellValue {
        let cell = cell.trim();
        if cell.is_empty() || self.is_sentinel(cell) {
            return CellValue::Missing;
        }
        match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                if self.flag_suspected && looks_like_sentinel(cell) {
                    CellValue::Suspect(v)
                } else {
                    CellValue::Value(v)
                }
            }
            _ => CellValue::Unparseable,
        }
    }
}

/// Three or more digits, all of them nines (`-99.99`, `999`, `-9999`).
fn looks_like_sentinel(cell: &str) -> bool {
    let digits: Vec<u8> = cell.bytes().filter(|b| b.is_ascii_digit()).collect();
    digits.len() >= 3 && digits.iter().all(|&b| b == b'9')
}
