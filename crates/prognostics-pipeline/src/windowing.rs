//! Sliding-window construction per unit.
//!
//! Sequence models see `window` consecutive steps and predict the RUL of the
//! step right after; the tree model sees the same steps flattened into lag
//! features. Both layouts produce one row per predicted step, aligned with its
//! target and unit id.

use rul_core::{FeatureMatrix, InputLayout, RulError, RulResult, UnitId, WindowedDataset};
use serde::{Deserialize, Serialize};

use crate::config::ConformalConfig;
use crate::scaling::MinMaxScaler;

/// One time-stamped sensor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub time_cycle: u32,
    pub features: Vec<f64>,
    pub rul: f64,
}

/// Raw records of one unit, chronological
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSeries {
    pub unit_id: UnitId,
    pub time_cycles: Vec<u32>,
    pub features: Vec<Vec<f64>>,
    pub target: Vec<f64>,
}

impl UnitSeries {
    pub fn from_records(unit_id: UnitId, mut records: Vec<SensorRecord>) -> RulResult<Self> {
        records.sort_by_key(|r| r.time_cycle);
        if let Some(first) = records.first() {
            let width = first.features.len();
            if records.iter().any(|r| r.features.len() != width) {
                return Err(RulError::InvalidData(format!(
                    "unit {unit_id} has records with differing feature counts"
                )));
            }
        }

        let mut series = Self {
            unit_id,
            time_cycles: Vec::with_capacity(records.len()),
            features: Vec::with_capacity(records.len()),
            target: Vec::with_capacity(records.len()),
        };
        for r in records {
            series.time_cycles.push(r.time_cycle);
            series.features.push(r.features);
            series.target.push(r.rul);
        }
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    fn flatten(&self, start: usize, end: usize) -> Vec<f64> {
        self.features[start..end].iter().flatten().copied().collect()
    }

    /// Sequence windows `rows[i..i+L]` predicting `target[i+L]`; needs `len > L`.
    pub fn sequence_windows(&self, window: usize) -> Vec<(Vec<f64>, f64)> {
        if self.len() <= window {
            return Vec::new();
        }
        (0..self.len() - window)
            .map(|i| (self.flatten(i, i + window), self.target[i + window]))
            .collect()
    }

    /// Lag windows `rows[i-L..i]` predicting `target[i]`; needs `len >= L`.
    pub fn lagged_windows(&self, window: usize) -> Vec<(Vec<f64>, f64)> {
        if self.len() < window {
            return Vec::new();
        }
        (window..self.len())
            .map(|i| (self.flatten(i - window, i), self.target[i]))
            .collect()
    }
}

/// Window every unit in ascending unit order and stack the rows.
///
/// Units too short for the layout are skipped with a warning.
pub fn build_windows(
    series: &[UnitSeries],
    window: usize,
    layout: InputLayout,
) -> RulResult<WindowedDataset> {
    if window == 0 {
        return Err(RulError::InvalidConfiguration("window length must be at least 1".to_string()));
    }
    let n_features = series.iter().map(UnitSeries::n_features).find(|&n| n > 0).unwrap_or(0);
    if series.iter().any(|s| !s.is_empty() && s.n_features() != n_features) {
        return Err(RulError::InvalidData("units disagree on feature count".to_string()));
    }

    let mut ordered: Vec<&UnitSeries> = series.iter().collect();
    ordered.sort_by_key(|s| s.unit_id);

    let mut rows = Vec::new();
    let mut y = Vec::new();
    let mut units = Vec::new();
    for unit in ordered {
        let windows = match layout {
            InputLayout::Sequence => unit.sequence_windows(window),
            InputLayout::Lagged => unit.lagged_windows(window),
        };
        if windows.is_empty() {
            tracing::warn!(
                "unit {} has {} steps, not enough for window length {}; skipping",
                unit.unit_id,
                unit.len(),
                window
            );
            continue;
        }
        for (x, target) in windows {
            rows.push(x);
            y.push(target);
            units.push(unit.unit_id);
        }
    }

    tracing::info!(
        "{:?} windows prepared: {} rows x {} steps x {} features",
        layout,
        rows.len(),
        window,
        n_features
    );
    WindowedDataset::new(FeatureMatrix::new(rows, window, n_features)?, y, units)
}

/// Sequence and lagged views of the same units, one per model input layout
#[derive(Debug, Clone, Default)]
pub struct ExperimentData {
    pub sequence: WindowedDataset,
    pub lagged: WindowedDataset,
}

impl ExperimentData {
    pub fn from_series(series: &[UnitSeries], window: usize) -> RulResult<Self> {
        Ok(Self {
            sequence: build_windows(series, window, InputLayout::Sequence)?,
            lagged: build_windows(series, window, InputLayout::Lagged)?,
        })
    }

    /// Min-max scale every unit, then window at `config.sequence_length`.
    ///
    /// The scaler is fitted on all records of `series` and returned so the
    /// same transform can be applied to units seen later.
    pub fn prepare(
        series: &[UnitSeries],
        config: &ConformalConfig,
    ) -> RulResult<(Self, MinMaxScaler)> {
        config.validate()?;
        let scaler = MinMaxScaler::fit_series(series)?;
        let mut scaled = series.to_vec();
        for unit in scaled.iter_mut() {
            scaler.transform_in_place(unit)?;
        }
        let data = Self::from_series(&scaled, config.sequence_length)?;
        Ok((data, scaler))
    }

    pub fn for_layout(&self, layout: InputLayout) -> &WindowedDataset {
        match layout {
            InputLayout::Sequence => &self.sequence,
            InputLayout::Lagged => &self.lagged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(unit_id: UnitId, len: u32) -> UnitSeries {
        let records = (0..len)
            .rev()
            .map(|t| SensorRecord {
                time_cycle: t,
                features: vec![t as f64, 100.0 + t as f64],
                rul: (len - 1 - t) as f64,
            })
            .collect();
        UnitSeries::from_records(unit_id, records).unwrap()
    }

    #[test]
    fn test_records_sorted_by_time() {
        let s = series(1, 4);
        assert_eq!(s.time_cycles, vec![0, 1, 2, 3]);
        assert_eq!(s.target, vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_sequence_windows() {
        let w = series(1, 5).sequence_windows(3);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].0, vec![0.0, 100.0, 1.0, 101.0, 2.0, 102.0]);
        assert_eq!(w[0].1, 1.0);
        assert_eq!(w[1].1, 0.0);
        assert!(series(1, 3).sequence_windows(3).is_empty());
    }

    #[test]
    fn test_lagged_windows() {
        let w = series(1, 5).lagged_windows(3);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].0, vec![0.0, 100.0, 1.0, 101.0, 2.0, 102.0]);
        assert_eq!(w[0].1, 1.0);
        // len == window is accepted but yields no rows
        assert!(series(1, 3).lagged_windows(3).is_empty());
    }

    #[test]
    fn test_build_windows_orders_units_and_skips_short() {
        let data = vec![series(5, 6), series(2, 6), series(9, 2)];
        let ds = build_windows(&data, 3, InputLayout::Sequence).unwrap();
        assert_eq!(ds.unique_units(), vec![2, 5]);
        assert_eq!(&ds.units[..3], &[2, 2, 2]);
        assert_eq!(ds.x.window, 3);
        assert_eq!(ds.x.n_features, 2);
    }

    #[test]
    fn test_experiment_data_layouts() {
        let data = ExperimentData::from_series(&[series(1, 10), series(2, 8)], 4).unwrap();
        assert_eq!(data.for_layout(InputLayout::Sequence).len(), 6 + 4);
        assert_eq!(data.for_layout(InputLayout::Lagged).len(), 6 + 4);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(build_windows(&[series(1, 4)], 0, InputLayout::Lagged).is_err());
    }

    #[test]
    fn test_prepare_scales_then_windows() {
        let config = ConformalConfig {
            sequence_length: 4,
            ..ConformalConfig::default()
        };
        let (data, scaler) = ExperimentData::prepare(&[series(1, 10), series(2, 8)], &config).unwrap();
        assert_eq!(scaler.n_features(), 2);
        assert_eq!(data.sequence.x.window, 4);
        assert_eq!(data.sequence.len(), 6 + 4);

        // feature 0 spans 0..=9 across both units, feature 1 spans 100..=109
        let first = data.sequence.x.row(0).unwrap();
        assert_eq!(&first[..2], &[0.0, 0.0]);
        assert!(data
            .lagged
            .x
            .rows()
            .iter()
            .flatten()
            .all(|v| (0.0..=1.0).contains(v)));
        // targets stay in RUL units
        assert_eq!(data.sequence.y[0], 5.0);
    }

    #[test]
    fn test_prepare_rejects_zero_sequence_length() {
        let config = ConformalConfig {
            sequence_length: 0,
            ..ConformalConfig::default()
        };
        assert!(ExperimentData::prepare(&[series(1, 10)], &config).is_err());
    }
}
