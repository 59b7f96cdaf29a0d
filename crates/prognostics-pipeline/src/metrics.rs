//! Point-forecast quality metrics used to rank models.

use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};

/// Late predictions (pred > true) are penalised harder than early ones.
const EARLY_SCALE: f64 = 13.0;
const LATE_SCALE: f64 = 10.0;

/// Asymmetric prognostics score; lower is better.
pub fn s_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| {
            let d = p - t;
            if d < 0.0 {
                (-d / EARLY_SCALE).exp() - 1.0
            } else {
                (d / LATE_SCALE).exp() - 1.0
            }
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    pub s_score: f64,
}

impl ModelMetrics {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> RulResult<Self> {
        if y_true.is_empty() {
            return Err(RulError::InsufficientData(
                "cannot score a model on zero test rows".to_string(),
            ));
        }
        if y_true.len() != y_pred.len() {
            return Err(RulError::InvalidData(format!(
                "{} targets but {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }

        let n = y_true.len() as f64;
        let (mut sse, mut sae) = (0.0, 0.0);
        for (t, p) in y_true.iter().zip(y_pred) {
            let e = t - p;
            sse += e * e;
            sae += e.abs();
        }
        let mse = sse / n;
        let mean = y_true.iter().sum::<f64>() / n;
        let sst: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
        let r2 = if sst > 0.0 {
            1.0 - sse / sst
        } else if sse == 0.0 {
            1.0
        } else {
            0.0
        };

        Ok(Self {
            mse,
            mae: sae / n,
            rmse: mse.sqrt(),
            r2,
            s_score: s_score(y_true, y_pred),
        })
    }

    /// Placeholder recorded when a model could not be evaluated.
    pub fn unavailable() -> Self {
        Self {
            mse: f64::NAN,
            mae: f64::NAN,
            rmse: f64::NAN,
            r2: f64::NAN,
            s_score: f64::NAN,
        }
    }

    pub fn is_available(&self) -> bool {
        self.s_score.is_finite()
    }
}
