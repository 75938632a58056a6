//! Min-max scaling of numeric feature columns
//!
//! The scaler is fit on one matrix (the training window) and can then be
//! applied to any other matrix with the same columns (the test rows), so test
//! statistics never reach training.

use crate::error::{BacktestError, Result};
use crate::panel::{FactorValue, MasterPanel};

/// Per-column min-max scaler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinMaxScaler {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit column ranges, ignoring missing values.
    ///
    /// A column with no observations gets the range `[0, 0]`.
    pub fn fit(rows: &[Vec<FactorValue>]) -> Result<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];

        for row in rows {
            if row.len() != width {
                return Err(BacktestError::ModelError(format!(
                    "ragged feature matrix: expected {} columns, found {}",
                    width,
                    row.len()
                )));
            }
            for (i, value) in row.iter().enumerate() {
                if let Some(v) = value {
                    mins[i] = mins[i].min(*v);
                    maxs[i] = maxs[i].max(*v);
                }
            }
        }

        for i in 0..width {
            if !mins[i].is_finite() {
                mins[i] = 0.0;
                maxs[i] = 0.0;
            }
        }

        Ok(Self { mins, maxs })
    }

    pub fn width(&self) -> usize {
        self.mins.len()
    }

    /// Scale to the fitted ranges.
    ///
    /// Missing values take the fitted minimum (0.0 after scaling); constant
    /// columns map to 0.0. Values outside the fitted range fall outside `[0, 1]`.
    pub fn transform(&self, rows: &[Vec<FactorValue>]) -> Result<Vec<Vec<f64>>> {
        rows.iter()
            .map(|row| {
                if row.len() != self.width() {
                    return Err(BacktestError::ModelError(format!(
                        "scaler fitted on {} columns, got {}",
                        self.width(),
                        row.len()
                    )));
                }
                Ok(row
                    .iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let range = self.maxs[i] - self.mins[i];
                        match value {
                            Some(v) if range > 0.0 => (v - self.mins[i]) / range,
                            _ => 0.0,
                        }
                    })
                    .collect())
            })
            .collect()
    }

    pub fn fit_transform(rows: &[Vec<FactorValue>]) -> Result<(Self, Vec<Vec<f64>>)> {
        let scaler = Self::fit(rows)?;
        let scaled = scaler.transform(rows)?;
        Ok((scaler, scaled))
    }

    /// Fit and apply over every column of a whole panel.
    ///
    /// Only appropriate for standalone analysis: fitting on a panel that spans
    /// training and test dates leaks test ranges into training.
    pub fn scale_panel(panel: &MasterPanel) -> Result<MasterPanel> {
        let values: Vec<Vec<FactorValue>> = panel.rows().iter().map(|r| r.values.clone()).collect();
        let (_, scaled) = Self::fit_transform(&values)?;

        let rows = panel
            .rows()
            .iter()
            .zip(scaled)
            .map(|(row, scaled)| {
                let mut row = row.clone();
                row.values = row
                    .values
                    .iter()
                    .zip(scaled)
                    .map(|(orig, s)| orig.map(|_| s))
                    .collect();
                row
            })
            .collect();

        Ok(MasterPanel::from_parts(panel.columns().to_vec(), rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_on_train_apply_to_test() {
        let train = vec![vec![Some(10.0), Some(1.0)], vec![Some(20.0), Some(1.0)]];
        let test = vec![vec![Some(25.0), Some(3.0)]];

        let scaler = MinMaxScaler::fit(&train).unwrap();
        let scaled_train = scaler.transform(&train).unwrap();
        let scaled_test = scaler.transform(&test).unwrap();

        assert_relative_eq!(scaled_train[0][0], 0.0);
        assert_relative_eq!(scaled_train[1][0], 1.0);
        // constant column
        assert_relative_eq!(scaled_train[0][1], 0.0);
        // test values are scaled with training ranges, not their own
        assert_relative_eq!(scaled_test[0][0], 1.5);
    }

    #[test]
    fn test_missing_values_imputed_with_min() {
        let rows = vec![vec![Some(2.0)], vec![None], vec![Some(4.0)]];
        let (_, scaled) = MinMaxScaler::fit_transform(&rows).unwrap();
        assert_eq!(scaled, vec![vec![0.0], vec![0.0], vec![1.0]]);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = MinMaxScaler::fit(&[vec![Some(1.0), Some(2.0)]]).unwrap();
        assert!(scaler.transform(&[vec![Some(1.0)]]).is_err());
        assert!(MinMaxScaler::fit(&[vec![Some(1.0)], vec![]]).is_err());
    }

    #[test]
    fn test_scale_panel_keeps_missing() {
        use crate::panel::PanelRow;
        use chrono::NaiveDate;

        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let panel = MasterPanel::from_parts(
            vec!["pe".into()],
            vec![
                PanelRow { date, symbol: "A".into(), values: vec![Some(10.0)] },
                PanelRow { date, symbol: "B".into(), values: vec![None] },
                PanelRow { date, symbol: "C".into(), values: vec![Some(30.0)] },
            ],
        );
        let scaled = MinMaxScaler::scale_panel(&panel).unwrap();
        let values: Vec<FactorValue> = scaled.rows().iter().map(|r| r.values[0]).collect();
        assert_eq!(values, vec![Some(0.0), None, Some(1.0)]);
    }
}
