//! Long → wide re-pivot, the inverse of emission.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{LongRecord, MetricId};

/// One metric's records pivoted back to date rows × portfolio columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WideTable {
    pub metric: MetricId,
    /// Portfolio columns in first-seen order.
    pub portfolios: Vec<String>,
    /// `(date_format, cells)` in first-seen order; cells align with `portfolios`.
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

#[derive(Default)]
struct Builder {
    portfolios: Vec<String>,
    portfolio_idx: HashMap<String, usize>,
    dates: Vec<String>,
    date_idx: HashMap<String, usize>,
    cells: HashMap<(usize, usize), Option<f64>>,
}

impl Builder {
    fn insert(&mut self, rec: &LongRecord) {
        let p = *self
            .portfolio_idx
            .entry(rec.portfolio.clone())
            .or_insert_with(|| {
                self.portfolios.push(rec.portfolio.clone());
                self.portfolios.len() - 1
            });
        let d = *self
            .date_idx
            .entry(rec.date_format.clone())
            .or_insert_with(|| {
                self.dates.push(rec.date_format.clone());
                self.dates.len() - 1
            });
        self.cells.insert((d, p), rec.value);
    }

    fn build(self, metric: MetricId) -> WideTable {
        let width = self.portfolios.len();
        let rows = self
            .dates
            .into_iter()
            .enumerate()
            .map(|(d, date)| {
                let cells = (0..width)
                    .map(|p| self.cells.get(&(d, p)).copied().flatten())
                    .collect();
                (date, cells)
            })
            .collect();
        WideTable {
            metric,
            portfolios: self.portfolios,
            rows,
        }
    }
}

impl WideTable {
    /// Group records by `(metric_type, date_format)`; metrics in first-seen order.
    ///
    /// Absent cells and null values both come back as `None`.
    pub fn from_records(records: &[LongRecord]) -> Vec<WideTable> {
        let mut order: Vec<MetricId> = Vec::new();
        let mut builders: HashMap<MetricId, Builder> = HashMap::new();

        for rec in records {
            let builder = builders.entry(rec.metric_type.clone()).or_insert_with(|| {
                order.push(rec.metric_type.clone());
                Builder::default()
            });
            builder.insert(rec);
        }

        order
            .into_iter()
            .filter_map(|metric| {
                builders
                    .remove(&metric)
                    .map(|b| b.build(metric))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SnapshotDate;

    fn rec(date: &str, portfolio: &str, metric: &str, value: Option<f64>) -> LongRecord {
        LongRecord {
            date_format: date.into(),
            portfolio: portfolio.into(),
            metric_type: MetricId(metric.into()),
            value,
            ingestion_date: "2017-07-31".parse::<SnapshotDate>().unwrap(),
        }
    }

    #[test]
    fn pivots_back_to_matrix() {
        let records = vec![
            rec("192607", "a", "m", Some(1.0)),
            rec("192607", "b", "m", None),
            rec("192608", "a", "m", Some(3.0)),
            rec("192608", "b", "m", Some(4.0)),
            rec("1927", "a", "n", Some(9.0)),
        ];
        let tables = WideTable::from_records(&records);

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].metric.as_str(), "m");
        assert_eq!(tables[0].portfolios, vec!["a", "b"]);
        assert_eq!(
            tables[0].rows,
            vec![
                ("192607".to_string(), vec![Some(1.0), None]),
                ("192608".to_string(), vec![Some(3.0), Some(4.0)]),
            ]
        );
        assert_eq!(tables[1].rows, vec![("1927".to_string(), vec![Some(9.0)])]);
    }
}
