//! Date token resolution.
//!
//! A data row's leading token is either `YYYY` (annual) or `YYYYMM` (monthly).
//! Anything else is rejected; the caller drops the row and keeps going.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Annual,
    Monthly,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Annual => f.write_str("annual"),
            Granularity::Monthly => f.write_str("monthly"),
        }
    }
}

/// A resolved date token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalDate {
    Annual { year: i32 },
    Monthly { year: i32, month: u32 },
}

impl CanonicalDate {
    pub fn granularity(&self) -> Granularity {
        match self {
            CanonicalDate::Annual { .. } => Granularity::Annual,
            CanonicalDate::Monthly { .. } => Granularity::Monthly,
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            CanonicalDate::Annual { year } | CanonicalDate::Monthly { year, .. } => *year,
        }
    }

    /// First calendar day of the period. `None` only for years chrono cannot represent.
    pub fn first_day(&self) -> Option<NaiveDate> {
        match self {
            CanonicalDate::Annual { year } => NaiveDate::from_ymd_opt(*year, 1, 1),
            CanonicalDate::Monthly { year, month } => NaiveDate::from_ymd_opt(*year, *month, 1),
        }
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalDate::Annual { year } => write!(f, "{year:04}"),
            CanonicalDate::Monthly { year, month } => write!(f, "{year:04}-{month:02}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFault {
    Length,
    NonDigit,
    MonthOutOfRange,
}

impl fmt::Display for TokenFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenFault::Length => f.write_str("expected 4 or 6 digits"),
            TokenFault::NonDigit => f.write_str("non-digit characters"),
            TokenFault::MonthOutOfRange => f.write_str("month outside 01-12"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date token '{token}': {fault}")]
pub struct InvalidDateToken {
    pub token: String,
    pub fault: TokenFault,
}

/// Resolve a single token, independent of any other row.
pub fn resolve_token(token: &str) -> Result<CanonicalDate, InvalidDateToken> {
    let t = token.trim();
    let invalid = |fault| InvalidDateToken {
        token: t.to_string(),
        fault,
    };

    if !t.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(TokenFault::NonDigit));
    }
    match t.len() {
        4 => {
            let year = t.parse().map_err(|_| invalid(TokenFault::NonDigit))?;
            Ok(CanonicalDate::Annual { year })
        }
        6 => {
            let year = t[..4].parse().map_err(|_| invalid(TokenFault::NonDigit))?;
            let month: u32 = t[4..].parse().map_err(|_| invalid(TokenFault::NonDigit))?;
            if !(1..=12).contains(&month) {
                return Err(invalid(TokenFault::MonthOutOfRange));
            }
            Ok(CanonicalDate::Monthly { year, month })
        }
        _ => Err(invalid(TokenFault::Length)),
    }
}

/// Per-block resolver.
///
/// The first successfully resolved token fixes the block's granularity hint;
/// later tokens of the other granularity still resolve but mark the block as
/// mixed. No cross-row validation ever blocks a row.
#[derive(Debug, Default)]
pub struct DateTokenResolver {
    hint: Option<Granularity>,
    mixed: bool,
}

impl DateTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known granularity rather than inferring it from the first row.
    pub fn with_hint(hint: Granularity) -> Self {
        Self {
            hint: Some(hint),
            mixed: false,
        }
    }

    /// Resolve one row's token and update the block's granularity hint.
    pub fn resolve(&mut self, token: &str) -> Result<CanonicalDate, InvalidDateToken> {
        let date = resolve_token(token)?;
        match self.hint {
            None => self.hint = Some(date.granularity()),
            Some(g) if g != date.granularity() => self.mixed = true,
            Some(_) => {}
        }
        Ok(date)
    }

    pub fn hint(&self) -> Option<Granularity> {
        self.hint
    }

    /// True once tokens of both granularities were seen.
    pub fn is_mixed(&self) -> bool {
        self.mixed
    }
}
