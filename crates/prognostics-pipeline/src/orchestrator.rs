//! Calibration Orchestrator
//!
//! Drives one scoring model through residual collection, margin estimation,
//! selection, post-processing and evaluation at three granularities: the
//! pooled evaluation set, a single unit, and a list of units laid out on one
//! shared index.
//!
//! The selected method is returned to the caller rather than kept on the
//! orchestrator. Running two calibrations that write the same persisted
//! method concurrently is the caller's problem to serialize.

use conformal_calibrator::{
    enforce_monotonic, evaluate, score_candidates, select_margin, select_target_then_width,
    CandidateMargins, CandidateSet, CoverageMetrics, CoverageRow, CoverageTable, Margin,
    MarginMethod, PredictionInterval, ResidualSet,
};
use rul_core::{clipped_predict, RulError, RulResult, ScoringModel, UnitId, WindowedDataset};
use serde::{Deserialize, Serialize};

use crate::config::ConformalConfig;
use crate::selected::SelectedMethod;
use crate::split::UnitSplit;

/// Result of the whole-evaluation-set calibration
#[derive(Debug, Clone)]
pub struct GlobalCalibration {
    pub candidates: CandidateMargins,
    /// One row per method, metrics over the pooled evaluation rows
    pub table: CoverageTable,
    /// The consensus margin, kept for later inference
    pub selected: SelectedMethod,
}

/// Result of calibrating against a single named unit
#[derive(Debug, Clone)]
pub struct SingleUnitCalibration {
    /// In-sample calibration metrics per candidate
    pub table: CoverageTable,
    pub selected: SelectedMethod,
    pub forecast: UnitForecast,
    pub unit_row: CoverageRow,
}

/// Per-unit metrics for every evaluation unit under one selected margin
#[derive(Debug, Clone)]
pub struct UnitEvaluationReport {
    pub margin: Margin,
    pub table: CoverageTable,
}

/// Post-processed forecast and interval for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitForecast {
    pub unit_id: UnitId,
    pub truth: Vec<f64>,
    pub trajectory: Vec<f64>,
    pub interval: PredictionInterval,
    pub metrics: CoverageMetrics,
}

/// One unit placed on the shared cumulative index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSegment {
    pub unit_id: UnitId,
    /// First index of the segment; the segment covers `x_start..x_start + len`
    pub x_start: usize,
    pub predictions: Vec<f64>,
    pub lower: Vec<f64>,
}

impl UnitSegment {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn x_range(&self) -> std::ops::Range<usize> {
        self.x_start..self.x_start + self.len()
    }
}

#[derive(Debug, Clone)]
pub struct RenderedUnits {
    /// Method the segments were built with
    pub selected: SelectedMethod,
    pub segments: Vec<UnitSegment>,
}

/// Calibration data derived once per orchestrator call
struct Calibration {
    preds: Vec<f64>,
    truth: Vec<f64>,
    residuals: ResidualSet,
}

pub struct CalibrationOrchestrator<'a> {
    model: &'a dyn ScoringModel,
    dataset: &'a WindowedDataset,
    config: ConformalConfig,
    split: UnitSplit,
}

impl<'a> CalibrationOrchestrator<'a> {
    /// Fails fast when the config is invalid or either unit group is empty.
    pub fn new(
        model: &'a dyn ScoringModel,
        dataset: &'a WindowedDataset,
        config: ConformalConfig,
    ) -> RulResult<Self> {
        config.validate()?;
        let split = UnitSplit::from_dataset(dataset, config.calibration_fraction)?;
        tracing::info!(
            "calibrating {}: {} calibration units, {} evaluation units",
            model.kind(),
            split.calibration.len(),
            split.evaluation.len()
        );
        Ok(Self {
            model,
            dataset,
            config,
            split,
        })
    }

    pub fn split(&self) -> &UnitSplit {
        &self.split
    }

    pub fn config(&self) -> &ConformalConfig {
        &self.config
    }

    fn calibration(&self) -> RulResult<Calibration> {
        let cal = self.dataset.for_units(&self.split.calibration);
        if cal.is_empty() {
            return Err(RulError::InsufficientData("calibration set is empty".to_string()));
        }
        let preds = clipped_predict(self.model, &cal.x)?;
        let residuals = ResidualSet::from_predictions(&cal.y, &preds)?;
        Ok(Calibration {
            preds,
            truth: cal.y,
            residuals,
        })
    }

    fn candidates(&self, calibration: &Calibration, set: CandidateSet) -> RulResult<CandidateMargins> {
        CandidateMargins::compute(
            &calibration.residuals,
            self.config.alpha,
            set,
            &self.config.estimator_settings(),
        )
    }

    /// Clipped, monotone trajectory of one unit with its aligned truth.
    fn trajectory(&self, unit: UnitId) -> RulResult<(Vec<f64>, Vec<f64>)> {
        let rows = self.dataset.unit(unit)?;
        let preds = clipped_predict(self.model, &rows.x)?;
        Ok((enforce_monotonic(&preds), rows.y))
    }

    fn forecast(&self, unit: UnitId, margin: f64) -> RulResult<UnitForecast> {
        let (trajectory, truth) = self.trajectory(unit)?;
        let interval = PredictionInterval::below(&trajectory, margin)?;
        let metrics = evaluate(&truth, &interval)?;
        Ok(UnitForecast {
            unit_id: unit,
            truth,
            trajectory,
            interval,
            metrics,
        })
    }

    /// Whole-evaluation-set intervals for every candidate method.
    ///
    /// Each evaluation unit is post-processed on its own; metrics are then
    /// computed over the pooled rows. The consensus margin is selected.
    pub fn calibrate_global(&self) -> RulResult<GlobalCalibration> {
        let calibration = self.calibration()?;
        let candidates = self.candidates(&calibration, CandidateSet::Global)?;

        let mut pooled_traj = Vec::new();
        let mut pooled_truth = Vec::new();
        for &unit in &self.split.evaluation {
            let (trajectory, truth) = self.trajectory(unit)?;
            pooled_traj.extend(trajectory);
            pooled_truth.extend(truth);
        }

        let target = self.config.target_coverage();
        let mut table = CoverageTable::default();
        for margin in candidates.iter() {
            let interval = PredictionInterval::below(&pooled_traj, margin.value)?;
            let metrics = evaluate(&pooled_truth, &interval)?;
            table.push(CoverageRow::new(margin.value, &metrics, target).with_method(margin.method));
        }
        tracing::info!("coverage results (evaluation set):\n{}", table);

        let complex = candidates.get(MarginMethod::Complex).copied().ok_or_else(|| {
            RulError::InsufficientData("global candidate set has no consensus margin".to_string())
        })?;
        Ok(GlobalCalibration {
            selected: SelectedMethod::from_margin(&complex, self.model.kind()),
            candidates,
            table,
        })
    }

    /// Select a method by coverage then width on the calibration set and
    /// apply it to one unit.
    pub fn calibrate_single_unit(&self, unit: UnitId) -> RulResult<SingleUnitCalibration> {
        let calibration = self.calibration()?;
        let candidates = self.candidates(&calibration, CandidateSet::SingleUnit)?;
        let scores = score_candidates(&candidates, &calibration.preds, &calibration.truth)?;

        let target = self.config.target_coverage();
        let chosen = select_target_then_width(&scores, target)?;
        tracing::info!(
            "unit {}: choosing {} with margin = {:.3}",
            unit,
            chosen.margin.method,
            chosen.margin.value
        );

        let forecast = self.forecast(unit, chosen.margin.value)?;
        let unit_row = CoverageRow::new(chosen.margin.value, &forecast.metrics, target)
            .with_method(chosen.margin.method)
            .with_unit(unit, forecast.trajectory.len());

        Ok(SingleUnitCalibration {
            table: CoverageTable::from_scores(&scores, target),
            selected: SelectedMethod::from_margin(&chosen.margin, self.model.kind()),
            forecast,
            unit_row,
        })
    }

    /// One row per evaluation unit under the configured margin policy.
    /// Units that cannot be evaluated are logged and skipped.
    pub fn evaluate_units(&self) -> RulResult<UnitEvaluationReport> {
        let calibration = self.calibration()?;
        let candidates = self.candidates(&calibration, CandidateSet::UnitEvaluation)?;
        let margin = select_margin(
            self.config.margin_method,
            &candidates,
            &calibration.preds,
            &calibration.truth,
        )?;

        let target = self.config.target_coverage();
        let mut table = CoverageTable::default();
        for &unit in &self.split.evaluation {
            match self.forecast(unit, margin.value) {
                Ok(forecast) => {
                    let m = &forecast.metrics;
                    tracing::info!(
                        "[unit {}] coverage: {:.3}, avg width: {:.3}, index diff: {}",
                        unit,
                        m.coverage,
                        m.avg_width,
                        m.index_diff
                    );
                    table.push(
                        CoverageRow::new(margin.value, m, target)
                            .with_unit(unit, forecast.trajectory.len()),
                    );
                }
                Err(e) => tracing::warn!("skipping unit {}: {}", unit, e),
            }
        }

        Ok(UnitEvaluationReport { margin, table })
    }

    /// Lay out several units on one index, each truncated at its first
    /// zero prediction. Without a selected method the global consensus
    /// margin is calibrated and returned with the segments.
    pub fn render_units(
        &self,
        units: &[UnitId],
        selected: Option<&SelectedMethod>,
    ) -> RulResult<RenderedUnits> {
        let selected = match selected {
            Some(s) => s.clone(),
            None => self.calibrate_global()?.selected,
        };

        let mut segments = Vec::with_capacity(units.len());
        let mut offset = 0;
        for &unit in units {
            let trajectory = match self.trajectory(unit) {
                Ok((trajectory, _)) => trajectory,
                Err(e) => {
                    tracing::warn!("skipping unit {}: {}", unit, e);
                    continue;
                }
            };
            let seg_len = trajectory
                .iter()
                .position(|&p| p <= 0.0)
                .map_or(trajectory.len(), |i| i + 1);
            let predictions = trajectory[..seg_len].to_vec();
            let interval = PredictionInterval::below(&predictions, selected.margin)?;

            segments.push(UnitSegment {
                unit_id: unit,
                x_start: offset,
                predictions,
                lower: interval.lower,
            });
            offset += seg_len + self.config.gap;
        }

        Ok(RenderedUnits { selected, segments })
    }

    /// Apply a previously selected method to one unit without recalibrating.
    pub fn predict_unit(&self, unit: UnitId, selected: &SelectedMethod) -> RulResult<UnitForecast> {
        if selected.model != self.model.kind() {
            tracing::warn!(
                "selected method was calibrated for {}, applying it to {}",
                selected.model,
                self.model.kind()
            );
        }
        self.forecast(unit, selected.margin)
    }
}
