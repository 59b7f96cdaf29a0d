//! Coverage and quality metrics for one interval against ground truth.

use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};

use crate::interval::PredictionInterval;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    /// Fraction of steps whose true value lies inside the interval
    pub coverage: f64,
    /// Mean of `upper - lower`
    pub avg_width: f64,
    /// Distance in steps between predicted and actual end of life
    pub index_diff: usize,
}

/// Evaluate an interval against aligned true values.
pub fn evaluate(y_true: &[f64], interval: &PredictionInterval) -> RulResult<CoverageMetrics> {
    if y_true.is_empty() || interval.is_empty() {
        return Err(RulError::InsufficientData(
            "cannot evaluate coverage on an empty sequence".to_string(),
        ));
    }
    if y_true.len() != interval.len() {
        return Err(RulError::InvalidData(format!(
            "{} true values vs interval of length {}",
            y_true.len(),
            interval.len()
        )));
    }

    let n = y_true.len() as f64;
    let covered = y_true
        .iter()
        .enumerate()
        .filter(|(i, &t)| interval.contains(*i, t) == Some(true))
        .count();
    let avg_width = interval.widths().sum::<f64>() / n;
    if !avg_width.is_finite() {
        return Err(RulError::InvalidData(
            "interval has non-finite bounds, average width is undefined".to_string(),
        ));
    }

    Ok(CoverageMetrics {
        coverage: covered as f64 / n,
        avg_width,
        index_diff: index_difference(&interval.lower, y_true),
    })
}

/// `|first i with lower[i] <= 0  -  first i with actual[i] <= 0|`.
///
/// A sequence that never reaches zero counts as failing at its last index.
pub fn index_difference(lower: &[f64], actual: &[f64]) -> usize {
    let idx_conf = first_zero_or_last(lower);
    let idx_actual = first_zero_or_last(actual);
    idx_conf.abs_diff(idx_actual)
}

fn first_zero_or_last(values: &[f64]) -> usize {
    values
        .iter()
        .position(|&v| v <= 0.0)
        .unwrap_or_else(|| values.len().saturating_sub(1))
}
