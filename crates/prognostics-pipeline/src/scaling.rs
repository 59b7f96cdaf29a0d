//! Per-feature min-max scaling fitted on training data only.

use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};

use crate::windowing::UnitSeries;

/// Maps every feature column into `[0, 1]` using training minima and maxima.
/// A constant column maps to 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit(rows: &[Vec<f64>]) -> RulResult<Self> {
        let first = rows
            .first()
            .ok_or_else(|| RulError::InsufficientData("cannot fit scaler on zero rows".to_string()))?;
        let mut min = first.clone();
        let mut max = first.clone();
        for row in rows {
            if row.len() != min.len() {
                return Err(RulError::InvalidData(format!(
                    "row has {} features, scaler expects {}",
                    row.len(),
                    min.len()
                )));
            }
            for (j, &v) in row.iter().enumerate() {
                min[j] = min[j].min(v);
                max[j] = max[j].max(v);
            }
        }
        Ok(Self { min, max })
    }

    /// Fit on every record of the given (training) units.
    pub fn fit_series(series: &[UnitSeries]) -> RulResult<Self> {
        let rows: Vec<Vec<f64>> = series.iter().flat_map(|s| s.features.iter().cloned()).collect();
        Self::fit(&rows)
    }

    pub fn n_features(&self) -> usize {
        self.min.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> RulResult<Vec<f64>> {
        if row.len() != self.n_features() {
            return Err(RulError::InvalidData(format!(
                "row has {} features, scaler was fitted on {}",
                row.len(),
                self.n_features()
            )));
        }
        Ok(row
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .map(|(&v, (&lo, &hi))| {
                let range = hi - lo;
                if range > 0.0 {
                    (v - lo) / range
                } else {
                    0.0
                }
            })
            .collect())
    }

    /// Scale every record of `series` in place.
    pub fn transform_in_place(&self, series: &mut UnitSeries) -> RulResult<()> {
        for row in series.features.iter_mut() {
            *row = self.transform_row(row)?;
        }
        Ok(())
    }
}
