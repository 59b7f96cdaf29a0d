//! One-sided conformal interval `[max(0, pred - margin), pred]`.

use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInterval {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl PredictionInterval {
    /// Build the interval below a post-processed trajectory.
    pub fn below(trajectory: &[f64], margin: f64) -> RulResult<Self> {
        if !margin.is_finite() || margin < 0.0 {
            return Err(RulError::InvalidData(format!(
                "margin must be finite and non-negative, got {margin}"
            )));
        }
        let lower = trajectory.iter().map(|&p| (p - margin).max(0.0)).collect();
        Ok(Self {
            lower,
            upper: trajectory.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.upper.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upper.is_empty()
    }

    pub fn widths(&self) -> impl Iterator<Item = f64> + '_ {
        self.upper.iter().zip(&self.lower).map(|(u, l)| u - l)
    }

    /// Whether `value` lies in step `i`; `None` past the end of the interval.
    pub fn contains(&self, i: usize, value: f64) -> Option<bool> {
        let lower = self.lower.get(i)?;
        let upper = self.upper.get(i)?;
        Some(value >= *lower && value <= *upper)
    }

    /// Keep only the first `len` steps.
    pub fn truncate(&mut self, len: usize) {
        self.lower.truncate(len);
        self.upper.truncate(len);
    }
}
