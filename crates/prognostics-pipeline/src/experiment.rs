//! Fixed-split experiment: fit each model on the training units, score it on
//! the held-out units, and pick the best one by S-score.

use std::collections::BTreeMap;
use std::fmt;

use conformal_calibrator::select_best_model;
use rul_core::{clipped_predict, ModelKind, RulResult, TrainableModel, WindowedDataset};
use serde::{Deserialize, Serialize};

use crate::metrics::ModelMetrics;
use crate::split::UnitSplit;
use crate::windowing::ExperimentData;

/// One line of the experiment summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: ModelKind,
    #[serde(flatten)]
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentResults {
    metrics: BTreeMap<ModelKind, ModelMetrics>,
}

impl ExperimentResults {
    /// Record (or overwrite) the metrics of one model.
    pub fn record(&mut self, kind: ModelKind, metrics: ModelMetrics) {
        self.metrics.insert(kind, metrics);
    }

    pub fn get(&self, kind: ModelKind) -> Option<&ModelMetrics> {
        self.metrics.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn summary(&self) -> Vec<ModelSummary> {
        self.metrics
            .iter()
            .map(|(&model, &metrics)| ModelSummary { model, metrics })
            .collect()
    }

    /// Model with the lowest finite S-score.
    pub fn best_model(&self) -> RulResult<(ModelKind, f64)> {
        let (kind, score) = select_best_model(self.metrics.iter().map(|(k, m)| (*k, m.s_score)))?;
        tracing::info!("best model by S-score is {} (S-score = {:.2})", kind, score);
        Ok((kind, score))
    }
}

impl fmt::Display for ExperimentResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>10} {:>10} {:>10} {:>8} {:>12}",
            "model", "mse", "mae", "rmse", "r2", "s_score"
        )?;
        for (kind, m) in &self.metrics {
            writeln!(
                f,
                "{:>8} {:>10.4} {:>10.4} {:>10.4} {:>8.4} {:>12.4}",
                kind.as_str(),
                m.mse,
                m.mae,
                m.rmse,
                m.r2,
                m.s_score
            )?;
        }
        Ok(())
    }
}

/// Runs models over the deterministic unit split and collects their metrics.
pub struct ExperimentRunner {
    calibration_fraction: f64,
    results: ExperimentResults,
}

impl ExperimentRunner {
    pub fn new(calibration_fraction: f64) -> Self {
        Self {
            calibration_fraction,
            results: ExperimentResults::default(),
        }
    }

    /// Fit on the training units, score on the test units and record the
    /// outcome. A model that cannot be evaluated is recorded as unavailable.
    pub fn run_fixed_split(
        &mut self,
        model: &mut dyn TrainableModel,
        data: &ExperimentData,
    ) -> ModelMetrics {
        let kind = model.kind();
        let dataset = data.for_layout(kind.input_layout());
        let metrics = match self.evaluate(model, dataset) {
            Ok(m) => {
                tracing::info!(
                    "{} - MSE: {:.4}, MAE: {:.4}, RMSE: {:.4}, R2: {:.4}, S-score: {:.4}",
                    kind,
                    m.mse,
                    m.mae,
                    m.rmse,
                    m.r2,
                    m.s_score
                );
                m
            }
            Err(e) => {
                tracing::warn!("skipping {}: {}", kind, e);
                ModelMetrics::unavailable()
            }
        };
        self.results.record(kind, metrics);
        metrics
    }

    fn evaluate(
        &self,
        model: &mut dyn TrainableModel,
        dataset: &WindowedDataset,
    ) -> RulResult<ModelMetrics> {
        let split = UnitSplit::from_dataset(dataset, self.calibration_fraction)?;
        let train = dataset.for_units(&split.calibration);
        let test = dataset.for_units(&split.evaluation);
        tracing::info!(
            "fixed split for {}: {} units for training, {} units for testing",
            model.kind(),
            split.calibration.len(),
            split.evaluation.len()
        );

        model.fit(&train.x, &train.y)?;
        let preds = clipped_predict(&*model, &test.x)?;
        ModelMetrics::compute(&test.y, &preds)
    }

    pub fn results(&self) -> &ExperimentResults {
        &self.results
    }

    pub fn into_results(self) -> ExperimentResults {
        self.results
    }
}
