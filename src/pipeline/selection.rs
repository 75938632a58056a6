//! Cumulative-importance feature selection

use crate::error::{BacktestError, Result};
use crate::model::FeatureImportance;

/// Slack for the threshold comparison, absorbing summation rounding
const CUMULATIVE_EPSILON: f64 = 1e-12;

/// Features kept by a selection, most important first
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub features: Vec<String>,
    /// Positions of `features` in the input feature list
    pub indices: Vec<usize>,
    /// Normalized importance of each selected feature
    pub importances: Vec<f64>,
    /// Sum of the selected normalized importances
    pub cumulative: f64,
}

/// Keeps the smallest prefix of importance-ranked features whose normalized
/// importance reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativeImportanceSelector {
    threshold: f64,
}

impl Default for CumulativeImportanceSelector {
    fn default() -> Self {
        Self { threshold: 0.80 }
    }
}

impl CumulativeImportanceSelector {
    /// Threshold must lie in (0, 1]
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(BacktestError::ModelError(format!(
                "importance threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Select from a fitted model's importances
    pub fn select(&self, model: &dyn FeatureImportance, features: &[String]) -> Result<Selection> {
        let importances = model.importances()?;
        self.select_from_importances(features, &importances)
    }

    pub fn select_from_importances(
        &self,
        features: &[String],
        importances: &[f64],
    ) -> Result<Selection> {
        if importances.len() != features.len() {
            return Err(BacktestError::ImportanceMismatch {
                features: features.len(),
                importances: importances.len(),
            });
        }
        if features.is_empty() {
            return Err(BacktestError::ModelError("no features to select from".to_string()));
        }
        if importances.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(BacktestError::ModelError(
                "importances must be finite and non-negative".to_string(),
            ));
        }

        let total: f64 = importances.iter().sum();
        if total <= 0.0 {
            return Err(BacktestError::ModelError("importances sum to zero".to_string()));
        }
        let normalized: Vec<f64> = if (total - 1.0).abs() > 1e-8 {
            importances.iter().map(|v| v / total).collect()
        } else {
            importances.to_vec()
        };

        let mut ranked: Vec<usize> = (0..features.len()).collect();
        ranked.sort_by(|a, b| normalized[*b].total_cmp(&normalized[*a]));

        let mut selection = Selection {
            features: Vec::new(),
            indices: Vec::new(),
            importances: Vec::new(),
            cumulative: 0.0,
        };
        for idx in ranked {
            selection.features.push(features[idx].clone());
            selection.indices.push(idx);
            selection.importances.push(normalized[idx]);
            selection.cumulative += normalized[idx];
            if selection.cumulative + CUMULATIVE_EPSILON >= self.threshold {
                break;
            }
        }

        log::debug!(
            "Selected {} of {} features (cumulative importance {:.3})",
            selection.features.len(),
            features.len(),
            selection.cumulative
        );

        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    struct Fixed(Vec<f64>);

    impl FeatureImportance for Fixed {
        fn importances(&self) -> Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(CumulativeImportanceSelector::new(0.0).is_err());
        assert!(CumulativeImportanceSelector::new(1.5).is_err());
        assert!(CumulativeImportanceSelector::new(f64::NAN).is_err());
        assert!(CumulativeImportanceSelector::new(1.0).is_ok());
    }

    #[test]
    fn test_selects_smallest_prefix() {
        let selector = CumulativeImportanceSelector::default();
        let selection = selector
            .select(&Fixed(vec![0.1, 0.5, 0.05, 0.35]), &names(4))
            .unwrap();
        assert_eq!(selection.features, vec!["f1", "f3"]);
        assert_eq!(selection.indices, vec![1, 3]);
    }

    #[test]
    fn test_unnormalized_importances() {
        let selector = CumulativeImportanceSelector::new(0.5).unwrap();
        let selection = selector
            .select_from_importances(&names(3), &[2.0, 6.0, 2.0])
            .unwrap();
        assert_eq!(selection.features, vec!["f1"]);
        assert!((selection.cumulative - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        let err = CumulativeImportanceSelector::default()
            .select_from_importances(&names(3), &[0.5, 0.5])
            .unwrap_err();
        assert!(matches!(
            err,
            BacktestError::ImportanceMismatch { features: 3, importances: 2 }
        ));
    }

    #[test]
    fn test_zero_importances_rejected() {
        assert!(CumulativeImportanceSelector::default()
            .select_from_importances(&names(2), &[0.0, 0.0])
            .is_err());
    }

    #[test]
    fn test_threshold_one_keeps_all_nonzero() {
        let selection = CumulativeImportanceSelector::new(1.0)
            .unwrap()
            .select_from_importances(&names(3), &[0.2, 0.3, 0.5])
            .unwrap();
        assert_eq!(selection.features.len(), 3);
    }
}
