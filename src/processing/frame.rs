use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Batch table consumed by the anomaly detector: named numeric columns with
/// missing cells, plus optional row timestamps. Columns iterate in name
/// order so detection output is deterministic.
#[derive(Debug, Clone, Default)]
pub struct MarketFrame {
    timestamps: Option<Vec<DateTime<Utc>>>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
    rows: usize,
}

impl MarketFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row. Columns absent from `values` get a missing cell;
    /// previously unseen columns are back-filled with missing cells.
    pub fn push_row(
        &mut self,
        timestamp: Option<DateTime<Utc>>,
        values: &[(&str, Option<f64>)],
    ) {
        if let Some(t) = timestamp {
            match self.timestamps {
                Some(ref mut ts) => ts.push(t),
                None if self.rows == 0 => self.timestamps = Some(vec![t]),
                // Mixed presence: keep labeling by index.
                None => {}
            }
        }

        for (name, value) in values {
            let column = self
                .columns
                .entry((*name).to_string())
                .or_insert_with(|| vec![None; self.rows]);
            column.push(*value);
        }
        self.rows += 1;

        for column in self.columns.values_mut() {
            if column.len() < self.rows {
                column.resize(self.rows, None);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    /// Row label: RFC3339 timestamp when the frame carries timestamps,
    /// otherwise the row index.
    pub fn row_label(&self, idx: usize) -> String {
        match &self.timestamps {
            Some(ts) if idx < ts.len() => ts[idx].to_rfc3339(),
            _ => idx.to_string(),
        }
    }

    /// Mean over present cells; `None` when the column is entirely missing.
    pub fn column_mean(&self, name: &str) -> Option<f64> {
        let column = self.columns.get(name)?;
        let present: Vec<f64> = column.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_column_access() {
        let mut frame = MarketFrame::new();
        frame.push_row(None, &[("vix", Some(15.0)), ("spy", Some(500.0))]);
        frame.push_row(None, &[("vix", Some(17.0))]);

        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("vix").unwrap(), &[Some(15.0), Some(17.0)]);
        assert_eq!(frame.column("spy").unwrap(), &[Some(500.0), None]);
        assert_eq!(frame.row_label(1), "1");
    }

    #[test]
    fn test_late_column_backfills() {
        let mut frame = MarketFrame::new();
        frame.push_row(None, &[("a", Some(1.0))]);
        frame.push_row(None, &[("a", Some(2.0)), ("b", Some(9.0))]);

        assert_eq!(frame.column("b").unwrap(), &[None, Some(9.0)]);
    }

    #[test]
    fn test_column_mean_skips_missing() {
        let mut frame = MarketFrame::new();
        frame.push_row(None, &[("x", Some(1.0))]);
        frame.push_row(None, &[("x", None)]);
        frame.push_row(None, &[("x", Some(3.0))]);

        assert!((frame.column_mean("x").unwrap() - 2.0).abs() < 1e-9);
        assert!(frame.column_mean("missing").is_none());
    }

    #[test]
    fn test_timestamp_labels() {
        let mut frame = MarketFrame::new();
        let ts = Utc::now();
        frame.push_row(Some(ts), &[("x", Some(1.0))]);
        assert_eq!(frame.row_label(0), ts.to_rfc3339());
    }
}
