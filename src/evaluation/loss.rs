use serde::{Deserialize, Serialize};

/// Reduces calculated/expected pairs to a single error, lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    /// Mean squared error
    #[default]
    Mse,
    /// Mean absolute error
    Mae,
    /// Root mean squared error
    Rmse,
}

impl LossFunction {
    /// Both slices must have the same length; an empty input has zero error.
    pub fn apply(&self, calculated: &[f64], expected: &[f64]) -> f64 {
        debug_assert_eq!(calculated.len(), expected.len());
        if calculated.is_empty() {
            return 0.0;
        }
        let n = calculated.len() as f64;
        let diffs = calculated.iter().zip(expected).map(|(c, e)| c - e);
        match self {
            LossFunction::Mse => diffs.map(|d| d * d).sum::<f64>() / n,
            LossFunction::Mae => diffs.map(f64::abs).sum::<f64>() / n,
            LossFunction::Rmse => (diffs.map(|d| d * d).sum::<f64>() / n).sqrt(),
        }
    }
}
