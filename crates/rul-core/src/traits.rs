use crate::{FeatureMatrix, ModelKind, RulError, RulResult};

/// Trait for a fitted model that maps feature windows to RUL point forecasts
pub trait ScoringModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn predict(&self, x: &FeatureMatrix) -> RulResult<Vec<f64>>;
}

/// Trait for models that can be (re)trained on a windowed training split
pub trait TrainableModel: ScoringModel {
    fn fit(&mut self, x: &FeatureMatrix, y: &[f64]) -> RulResult<()>;
}

/// Predict and clip to `[0, inf)`.
///
/// Every call site that receives model output goes through here, so a model
/// returning negative RUL never leaks into residuals or trajectories.
pub fn clipped_predict<M>(model: &M, x: &FeatureMatrix) -> RulResult<Vec<f64>>
where
    M: ScoringModel + ?Sized,
{
    let preds = model.predict(x)?;
    if preds.len() != x.len() {
        return Err(RulError::Model(format!(
            "{} returned {} predictions for {} rows",
            model.kind(),
            preds.len(),
            x.len()
        )));
    }
    if preds.iter().any(|p| !p.is_finite()) {
        return Err(RulError::Model(format!(
            "{} produced non-finite predictions",
            model.kind()
        )));
    }
    Ok(preds.into_iter().map(|p| p.max(0.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<f64>);

    impl ScoringModel for Fixed {
        fn kind(&self) -> ModelKind {
            ModelKind::Lstm
        }

        fn predict(&self, _x: &FeatureMatrix) -> RulResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    fn rows(n: usize) -> FeatureMatrix {
        FeatureMatrix::new(vec![vec![0.0]; n], 1, 1).unwrap()
    }

    #[test]
    fn test_clipped_predict_clamps_negatives() {
        let model = Fixed(vec![3.0, -2.0, 0.5]);
        assert_eq!(clipped_predict(&model, &rows(3)).unwrap(), vec![3.0, 0.0, 0.5]);
    }

    #[test]
    fn test_clipped_predict_length_mismatch() {
        let model = Fixed(vec![1.0]);
        assert!(matches!(clipped_predict(&model, &rows(2)), Err(RulError::Model(_))));
    }

    #[test]
    fn test_clipped_predict_rejects_non_finite() {
        let model = Fixed(vec![5.0, f64::INFINITY]);
        assert!(matches!(clipped_predict(&model, &rows(2)), Err(RulError::Model(_))));

        let model = Fixed(vec![f64::NEG_INFINITY, 1.0]);
        assert!(matches!(clipped_predict(&model, &rows(2)), Err(RulError::Model(_))));

        let model = Fixed(vec![f64::NAN, 1.0]);
        assert!(clipped_predict(&model, &rows(2)).is_err());
    }
}
