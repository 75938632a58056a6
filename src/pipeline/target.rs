//! Forward-return class labels
//!
//! The percentage change of the close between consecutive observations of a
//! symbol is bucketed into five bands, then shifted one row back: the label on
//! date *t* describes the move from *t* to the next observation.

use crate::error::{BacktestError, Result};
use crate::panel::{LabeledPanel, LabeledRow, MasterPanel, PanelRow};
use crate::types::ClassLabel;

/// Five-band labeling of percentage price changes
#[derive(Debug, Clone, PartialEq)]
pub struct FiveCategoryTarget {
    /// Inclusive upper edges of bands 0..=3 in percent; band 4 is everything above
    edges: [f64; 4],
    price_column: String,
}

impl Default for FiveCategoryTarget {
    fn default() -> Self {
        Self {
            edges: [-10.0, 0.0, 5.0, 10.0],
            price_column: "close".to_string(),
        }
    }
}

impl FiveCategoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom band edges; must be strictly increasing
    pub fn with_edges(mut self, edges: [f64; 4]) -> Result<Self> {
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(BacktestError::ConfigError(format!(
                "band edges must be strictly increasing: {:?}",
                edges
            )));
        }
        self.edges = edges;
        Ok(self)
    }

    pub fn with_price_column(mut self, column: impl Into<String>) -> Self {
        self.price_column = column.into();
        self
    }

    /// Band for a percentage change; `None` for non-finite input
    pub fn bucket(&self, pct_change: f64) -> Option<ClassLabel> {
        if !pct_change.is_finite() {
            return None;
        }
        let band = self
            .edges
            .iter()
            .position(|edge| pct_change <= *edge)
            .unwrap_or(self.edges.len());
        Some(band as ClassLabel)
    }

    /// Label every row with the band of its next-period return.
    ///
    /// Rows whose shifted label is undefined (the last row of each symbol, or a
    /// row followed by a missing/zero price) are dropped.
    pub fn label(&self, panel: &MasterPanel) -> Result<LabeledPanel> {
        let price_idx = panel
            .column_index(&self.price_column)
            .ok_or_else(|| BacktestError::missing_column("master panel", &self.price_column))?;

        let mut by_symbol: Vec<&PanelRow> = panel.rows().iter().collect();
        by_symbol.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.date.cmp(&b.date)));

        let mut labeled = Vec::with_capacity(by_symbol.len());
        for pair in by_symbol.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if current.symbol != next.symbol {
                continue;
            }
            let change = match (current.values[price_idx], next.values[price_idx]) {
                (Some(prev), Some(price)) if prev != 0.0 => (price / prev - 1.0) * 100.0,
                _ => continue,
            };
            if let Some(target) = self.bucket(change) {
                labeled.push(LabeledRow {
                    row: current.clone(),
                    target,
                });
            }
        }

        log::debug!(
            "Labeled {} of {} panel rows",
            labeled.len(),
            panel.len()
        );

        Ok(LabeledPanel::new(panel.columns().to_vec(), labeled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Date;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Date {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(symbol: &str, date: Date, close: Option<f64>) -> PanelRow {
        PanelRow {
            date,
            symbol: symbol.to_string(),
            values: vec![close],
        }
    }

    #[test]
    fn test_bucket_edges() {
        let target = FiveCategoryTarget::new();
        assert_eq!(target.bucket(-25.0), Some(0));
        assert_eq!(target.bucket(-10.0), Some(0));
        assert_eq!(target.bucket(-9.99), Some(1));
        assert_eq!(target.bucket(0.0), Some(1));
        assert_eq!(target.bucket(0.01), Some(2));
        assert_eq!(target.bucket(5.0), Some(2));
        assert_eq!(target.bucket(10.0), Some(3));
        assert_eq!(target.bucket(12.0), Some(4));
        assert_eq!(target.bucket(f64::NAN), None);
    }

    #[test]
    fn test_label_shifts_back_and_drops_last_row() {
        let panel = MasterPanel::from_parts(
            vec!["close".into()],
            vec![
                row("AAPL", d(2024, 1, 1), Some(100.0)),
                row("AAPL", d(2024, 4, 1), Some(112.0)),
                row("AAPL", d(2024, 7, 1), Some(56.0)),
            ],
        );

        let labeled = FiveCategoryTarget::new().label(&panel).unwrap();
        assert_eq!(labeled.len(), 2);
        assert_eq!(labeled.rows()[0].date(), d(2024, 1, 1));
        assert_eq!(labeled.rows()[0].target, 4);
        // 112 -> 56 is -50%
        assert_eq!(labeled.rows()[1].target, 0);
    }

    #[test]
    fn test_symbols_labeled_independently() {
        let panel = MasterPanel::from_parts(
            vec!["close".into()],
            vec![
                row("AAPL", d(2024, 1, 1), Some(100.0)),
                row("MSFT", d(2024, 1, 1), Some(50.0)),
                row("AAPL", d(2024, 1, 2), Some(103.0)),
                row("MSFT", d(2024, 1, 2), Some(40.0)),
            ],
        );

        let labeled = FiveCategoryTarget::new().label(&panel).unwrap();
        let targets: Vec<(&str, u8)> = labeled
            .rows()
            .iter()
            .map(|r| (r.symbol(), r.target))
            .collect();
        assert_eq!(targets, vec![("AAPL", 2), ("MSFT", 0)]);
    }

    #[test]
    fn test_missing_price_breaks_chain() {
        let panel = MasterPanel::from_parts(
            vec!["close".into()],
            vec![
                row("AAPL", d(2024, 1, 1), Some(100.0)),
                row("AAPL", d(2024, 1, 2), None),
                row("AAPL", d(2024, 1, 3), Some(101.0)),
                row("AAPL", d(2024, 1, 4), Some(102.0)),
            ],
        );
        let labeled = FiveCategoryTarget::new().label(&panel).unwrap();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled.rows()[0].date(), d(2024, 1, 3));
    }

    #[test]
    fn test_missing_price_column() {
        let panel = MasterPanel::from_parts(vec!["roe".into()], vec![]);
        let err = FiveCategoryTarget::new().label(&panel).unwrap_err();
        assert!(matches!(err, BacktestError::SchemaError { .. }));
    }

    #[test]
    fn test_edges_must_increase() {
        assert!(FiveCategoryTarget::new().with_edges([0.0, 0.0, 1.0, 2.0]).is_err());
    }
}
