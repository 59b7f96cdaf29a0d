use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{RulError, RulResult};

/// Identifier of one degrading unit (e.g. one engine).
pub type UnitId = u32;

/// How a model expects its input windows to be laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputLayout {
    /// `[window, n_features]` sequence, window ends just before the target step
    Sequence,
    /// Flattened lag features covering the `window` steps before the target
    Lagged,
}

/// Closed set of model families the pipeline knows how to score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    Lstm,
    BiLstm,
    NBeats,
    CnnGru,
    XGBoost,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Lstm,
        ModelKind::BiLstm,
        ModelKind::NBeats,
        ModelKind::CnnGru,
        ModelKind::XGBoost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Lstm => "LSTM",
            ModelKind::BiLstm => "BiLSTM",
            ModelKind::NBeats => "NBEATS",
            ModelKind::CnnGru => "CNNGRU",
            ModelKind::XGBoost => "XGBoost",
        }
    }

    /// Deep sequence models consume sequence windows; the tree ensemble consumes lag features.
    pub fn input_layout(&self) -> InputLayout {
        match self {
            ModelKind::XGBoost => InputLayout::Lagged,
            _ => InputLayout::Sequence,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = RulError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RulError::InvalidConfiguration(format!("unknown model kind '{s}'")))
    }
}

/// Row-major feature matrix; every row is one flattened window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: Vec<Vec<f64>>,
    /// Number of time steps per window
    pub window: usize,
    /// Number of raw features per time step
    pub n_features: usize,
}

impl FeatureMatrix {
    pub fn new(rows: Vec<Vec<f64>>, window: usize, n_features: usize) -> RulResult<Self> {
        let width = window * n_features;
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(RulError::InvalidData(format!(
                "row {bad} has {} values, expected {width} ({window} x {n_features})",
                rows[bad].len()
            )));
        }
        Ok(Self {
            rows,
            window,
            n_features,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&[f64]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    /// Value of `feature` at window step `step` within row `i`.
    pub fn at(&self, i: usize, step: usize, feature: usize) -> Option<f64> {
        if step >= self.window || feature >= self.n_features {
            return None;
        }
        self.row(i).map(|r| r[step * self.n_features + feature])
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            window: self.window,
            n_features: self.n_features,
        }
    }
}

/// `(X, y, unit_id)` aligned by row. Rows of one unit are stored in chronological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowedDataset {
    pub x: FeatureMatrix,
    pub y: Vec<f64>,
    pub units: Vec<UnitId>,
}

impl WindowedDataset {
    pub fn new(x: FeatureMatrix, y: Vec<f64>, units: Vec<UnitId>) -> RulResult<Self> {
        if x.len() != y.len() || y.len() != units.len() {
            return Err(RulError::InvalidData(format!(
                "misaligned dataset: {} feature rows, {} targets, {} unit ids",
                x.len(),
                y.len(),
                units.len()
            )));
        }
        Ok(Self { x, y, units })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Sorted unique unit identifiers.
    pub fn unique_units(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Row indices belonging to any of `units`, in dataset order.
    pub fn indices_for(&self, units: &[UnitId]) -> Vec<usize> {
        let wanted: BTreeSet<UnitId> = units.iter().copied().collect();
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| wanted.contains(u))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(indices),
            y: indices.iter().map(|&i| self.y[i]).collect(),
            units: indices.iter().map(|&i| self.units[i]).collect(),
        }
    }

    /// All rows of the given units.
    pub fn for_units(&self, units: &[UnitId]) -> Self {
        self.subset(&self.indices_for(units))
    }

    /// Rows of a single unit; fails when the unit contributed no windows.
    pub fn unit(&self, unit: UnitId) -> RulResult<Self> {
        let part = self.for_units(&[unit]);
        if part.is_empty() {
            return Err(RulError::InsufficientData(format!(
                "unit {unit} has no windows (series shorter than the window length or unknown unit)"
            )));
        }
        Ok(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> WindowedDataset {
        let x = FeatureMatrix::new(
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]],
            1,
            1,
        )
        .unwrap();
        WindowedDataset::new(x, vec![10.0, 9.0, 8.0, 20.0, 19.0], vec![3, 3, 3, 1, 1]).unwrap()
    }

    #[test]
    fn test_unique_units_sorted() {
        assert_eq!(dataset().unique_units(), vec![1, 3]);
    }

    #[test]
    fn test_unit_subset_keeps_order() {
        let unit = dataset().unit(3).unwrap();
        assert_eq!(unit.y, vec![10.0, 9.0, 8.0]);
        assert_eq!(unit.x.row(2), Some(&[3.0][..]));
    }

    #[test]
    fn test_unknown_unit_is_insufficient() {
        assert!(matches!(dataset().unit(7), Err(RulError::InsufficientData(_))));
    }

    #[test]
    fn test_misaligned_dataset_rejected() {
        let x = FeatureMatrix::new(vec![vec![1.0]], 1, 1).unwrap();
        assert!(WindowedDataset::new(x, vec![1.0, 2.0], vec![1]).is_err());
    }

    #[test]
    fn test_feature_matrix_width_checked() {
        assert!(FeatureMatrix::new(vec![vec![1.0, 2.0, 3.0]], 2, 2).is_err());
        let m = FeatureMatrix::new(vec![vec![1.0, 2.0, 3.0, 4.0]], 2, 2).unwrap();
        assert_eq!(m.at(0, 1, 0), Some(3.0));
        assert_eq!(m.at(0, 2, 0), None);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("xgboost".parse::<ModelKind>().unwrap(), ModelKind::XGBoost);
        assert_eq!("BiLSTM".parse::<ModelKind>().unwrap(), ModelKind::BiLstm);
        assert!("transformer".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::XGBoost.input_layout(), InputLayout::Lagged);
        assert_eq!(ModelKind::Lstm.input_layout(), InputLayout::Sequence);
    }
}
