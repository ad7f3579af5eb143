//! Snapshot dates and source-file naming.
//!
//! Every record produced from one source file in one run carries the same
//! `SnapshotDate`. It is assigned once, before any block is scanned, and passed
//! explicitly through every stage.
//!
//! Upstream archives are renamed `{month}{yy}_{original}.CSV` when extracted,
//! so the snapshot and the logical dataset can both be recovered from the name.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use super::ids::DatasetKey;

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("invalid snapshot date '{0}' (expected YYYY-MM-DD)")]
    Invalid(String),
}

/// The logical "as-of" date of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotDate(NaiveDate);

impl SnapshotDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Days since 1970-01-01, the physical representation of a Parquet `Date`.
    pub fn epoch_days(&self) -> i32 {
        (self.0 - epoch()).num_days() as i32
    }

    pub fn from_epoch_days(days: i32) -> Self {
        Self(epoch() + chrono::Duration::days(days as i64))
    }

    /// Derive the snapshot from a `{month}{yy}` marker in a source filename.
    ///
    /// `july17_6_Portfolios_2x3.CSV` → 2017-07-31 (last day of the month).
    /// Two-digit years above 50 are 19xx, the rest 20xx.
    pub fn from_filename(name: &str) -> Option<Self> {
        let (month, yy, _) = find_month_marker(name)?;
        let year = if yy > 50 { 1900 + yy } else { 2000 + yy };
        let first = NaiveDate::from_ymd_opt(year as i32, month, 1)?;
        let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
        Some(Self(last))
    }
}

impl FromStr for SnapshotDate {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| SnapshotError::Invalid(s.to_string()))
    }
}

impl fmt::Display for SnapshotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Locate `{month}{yy}` in a filename.
///
/// Returns the month number, the two-digit year and the byte offset just past
/// the marker.
fn find_month_marker(name: &str) -> Option<(u32, u32, usize)> {
    let lower = name.to_ascii_lowercase();
    for (idx, month) in MONTHS.iter().enumerate() {
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(month) {
            let start = search_from + pos;
            let digits_at = start + month.len();
            let rest = &lower.as_bytes()[digits_at..];
            let two_digits = rest.len() >= 2
                && rest[0].is_ascii_digit()
                && rest[1].is_ascii_digit()
                && rest.get(2).map_or(true, |b| !b.is_ascii_digit());
            if two_digits {
                let yy = ((rest[0] - b'0') * 10 + (rest[1] - b'0')) as u32;
                return Some((idx as u32 + 1, yy, digits_at + 2));
            }
            search_from = digits_at;
        }
    }
    None
}

/// Logical dataset for a source file: the file stem with any leading
/// `{month}{yy}_` snapshot marker removed.
pub fn dataset_key(src_filename: &str) -> DatasetKey {
    let base = Path::new(src_filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(src_filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };

    let stripped = match find_month_marker(stem) {
        Some((month, _, end)) => {
            let prefix_len = MONTHS[month as usize - 1].len() + 2;
            let starts_with_marker = end == prefix_len;
            if starts_with_marker {
                stem[end..].trim_start_matches(['_', '-', ' '])
            } else {
                stem
            }
        }
        None => stem,
    };

    if stripped.is_empty() {
        DatasetKey(stem.to_string())
    } else {
        DatasetKey(stripped.to_string())
    }
}
