use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized metric identifier derived from a block title
/// (e.g. `value_weighted_return`).
///
/// Construct through [`crate::transform::classify`]; the inner string is
/// always lowercase and underscore-joined.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub String);

impl MetricId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier for the `n`th repeat of the same metric inside one source file.
    pub fn with_ordinal(&self, n: usize) -> Self {
        Self(format!("{}_{n}", self.0))
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical dataset a source file belongs to, stable across snapshots
/// (e.g. `6_Portfolios_2x3` for `july17_6_Portfolios_2x3.CSV`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetKey(pub String);

impl DatasetKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
