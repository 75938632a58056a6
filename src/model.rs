//! Predictive model contract and a built-in multinomial logistic regression
//!
//! The simulator only depends on the capability traits here. Feature selection
//! needs [`FeatureImportance`], which every pluggable model implements at
//! construction time rather than being probed for at runtime.

use crate::error::{BacktestError, Result};
use crate::types::ClassLabel;

/// Multi-class classifier over a dense feature matrix
pub trait Classifier: Send {
    /// Fit on rows of `x` with labels `y`
    fn train(&mut self, x: &[Vec<f64>], y: &[ClassLabel]) -> Result<()>;

    /// Most likely class per row
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<ClassLabel>> {
        let classes = self.classes();
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|probs| classes[argmax(probs)])
            .collect())
    }

    /// Class probabilities per row, columns ordered as [`classes`](Self::classes)
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;

    /// Classes seen in training, ascending
    fn classes(&self) -> &[ClassLabel];
}

/// Per-feature importance of a fitted model
pub trait FeatureImportance {
    fn importances(&self) -> Result<Vec<f64>>;
}

/// Model usable by the walk-forward simulator
pub trait RankingModel: Classifier + FeatureImportance {}

impl<T: Classifier + FeatureImportance> RankingModel for T {}

/// Builds a fresh, untrained model
pub type ModelFactory = Box<dyn Fn() -> Box<dyn RankingModel> + Send + Sync>;

/// Importance of a linear model: mean absolute coefficient across outputs.
///
/// `coef` is indexed `[output][feature]`.
pub fn coefficient_importances(coef: &[Vec<f64>]) -> Result<Vec<f64>> {
    let width = coef
        .first()
        .map(Vec::len)
        .ok_or_else(|| BacktestError::ModelError("model has no coefficients".to_string()))?;
    if coef.iter().any(|row| row.len() != width) {
        return Err(BacktestError::ModelError(
            "coefficient rows differ in length".to_string(),
        ));
    }

    let outputs = coef.len() as f64;
    Ok((0..width)
        .map(|j| coef.iter().map(|row| row[j].abs()).sum::<f64>() / outputs)
        .collect())
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (i, v)| {
            if *v > best_v {
                (i, *v)
            } else {
                (best, best_v)
            }
        })
        .0
}

/// Multinomial logistic regression trained with full-batch gradient descent
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    learning_rate: f64,
    epochs: usize,
    l2: f64,
    classes: Vec<ClassLabel>,
    /// `[class][feature]`
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl Default for SoftmaxRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 300,
            l2: 1e-3,
            classes: Vec::new(),
            weights: Vec::new(),
            bias: Vec::new(),
        }
    }
}

impl SoftmaxRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_l2(mut self, l2: f64) -> Self {
        self.l2 = l2.max(0.0);
        self
    }

    /// Factory for the simulator
    pub fn factory() -> ModelFactory {
        Box::new(|| Box::new(SoftmaxRegression::new()))
    }

    pub fn coefficients(&self) -> &[Vec<f64>] {
        &self.weights
    }

    fn is_fitted(&self) -> bool {
        !self.classes.is_empty()
    }

    fn check_width(&self, x: &[Vec<f64>]) -> Result<()> {
        let width = self.weights.first().map(Vec::len).unwrap_or(0);
        match x.iter().find(|row| row.len() != width) {
            Some(row) => Err(BacktestError::ModelError(format!(
                "expected {} features, got {}",
                width,
                row.len()
            ))),
            None => Ok(()),
        }
    }

    fn probabilities(&self, row: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect();
        softmax(&logits)
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

impl Classifier for SoftmaxRegression {
    fn train(&mut self, x: &[Vec<f64>], y: &[ClassLabel]) -> Result<()> {
        if x.is_empty() {
            return Err(BacktestError::ModelError("empty training set".to_string()));
        }
        if x.len() != y.len() {
            return Err(BacktestError::ModelError(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let width = x[0].len();
        if width == 0 {
            return Err(BacktestError::ModelError("no feature columns".to_string()));
        }
        if x.iter().any(|row| row.len() != width) {
            return Err(BacktestError::ModelError("ragged feature matrix".to_string()));
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(BacktestError::ModelError(format!(
                "training labels contain a single class ({:?})",
                classes
            )));
        }

        let targets: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or(0))
            .collect();

        let k = classes.len();
        self.classes = classes;
        self.weights = vec![vec![0.0; width]; k];
        self.bias = vec![0.0; k];

        let n = x.len() as f64;
        for _ in 0..self.epochs {
            let mut grad_w = vec![vec![0.0; width]; k];
            let mut grad_b = vec![0.0; k];

            for (row, target) in x.iter().zip(&targets) {
                let probs = self.probabilities(row);
                for (c, p) in probs.iter().enumerate() {
                    let err = p - if c == *target { 1.0 } else { 0.0 };
                    grad_b[c] += err;
                    for (g, xi) in grad_w[c].iter_mut().zip(row) {
                        *g += err * xi;
                    }
                }
            }

            for c in 0..k {
                self.bias[c] -= self.learning_rate * grad_b[c] / n;
                for j in 0..width {
                    let grad = grad_w[c][j] / n + self.l2 * self.weights[c][j];
                    self.weights[c][j] -= self.learning_rate * grad;
                }
            }
        }

        if self
            .weights
            .iter()
            .flatten()
            .chain(&self.bias)
            .any(|w| !w.is_finite())
        {
            return Err(BacktestError::ModelError(
                "training diverged to non-finite weights".to_string(),
            ));
        }

        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if !self.is_fitted() {
            return Err(BacktestError::ModelError("model is not trained".to_string()));
        }
        self.check_width(x)?;
        Ok(x.iter().map(|row| self.probabilities(row)).collect())
    }

    fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }
}

impl FeatureImportance for SoftmaxRegression {
    fn importances(&self) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(BacktestError::ModelError("model is not trained".to_string()));
        }
        coefficient_importances(&self.weights)
    }
}
