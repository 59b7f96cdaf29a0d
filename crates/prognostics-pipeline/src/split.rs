use rul_core::{RulError, RulResult, UnitId, WindowedDataset};
use serde::{Deserialize, Serialize};

/// Deterministic split of units into calibration and evaluation groups.
///
/// The first `floor(fraction * n)` of the sorted unique ids calibrate; the
/// rest are held out. No shuffling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSplit {
    pub calibration: Vec<UnitId>,
    pub evaluation: Vec<UnitId>,
}

impl UnitSplit {
    pub fn from_units(units: &[UnitId], fraction: f64) -> RulResult<Self> {
        let mut sorted = units.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let n_calibration = (fraction * sorted.len() as f64) as usize;
        let evaluation = sorted.split_off(n_calibration.min(sorted.len()));
        let split = Self {
            calibration: sorted,
            evaluation,
        };

        if split.calibration.is_empty() || split.evaluation.is_empty() {
            return Err(RulError::InsufficientData(format!(
                "not enough units to split: {} calibration, {} evaluation",
                split.calibration.len(),
                split.evaluation.len()
            )));
        }
        Ok(split)
    }

    pub fn from_dataset(dataset: &WindowedDataset, fraction: f64) -> RulResult<Self> {
        Self::from_units(&dataset.unique_units(), fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eighty_twenty() {
        let units: Vec<UnitId> = (1..=10).rev().collect();
        let split = UnitSplit::from_units(&units, 0.8).unwrap();
        assert_eq!(split.calibration, (1..=8).collect::<Vec<_>>());
        assert_eq!(split.evaluation, vec![9, 10]);
    }

    #[test]
    fn test_floor_of_fraction() {
        let split = UnitSplit::from_units(&[4, 2, 2, 9, 7], 0.8).unwrap();
        assert_eq!(split.calibration, vec![2, 4, 7]);
        assert_eq!(split.evaluation, vec![9]);
    }

    #[test]
    fn test_empty_group_fails_fast() {
        assert!(matches!(
            UnitSplit::from_units(&[1], 0.8),
            Err(RulError::InsufficientData(_))
        ));
        assert!(UnitSplit::from_units(&[], 0.8).is_err());
        assert!(UnitSplit::from_units(&[1, 2], 0.4).is_err());
    }
}
