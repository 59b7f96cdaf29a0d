//! Method Selector
//!
//! Chooses one margin out of a candidate set, and chooses the scoring model
//! whose margins get calibrated in the first place.

use std::fmt;
use std::str::FromStr;

use rul_core::{ModelKind, RulError, RulResult};
use serde::{Deserialize, Serialize};

use crate::coverage::{evaluate, CoverageMetrics};
use crate::interval::PredictionInterval;
use crate::margins::{CandidateMargins, Margin};

/// Policy used to collapse candidate margins into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginPolicy {
    /// Median of the candidates, coverage ignored
    Complex,
    /// Highest coverage on the calibration set
    Best,
}

impl MarginPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginPolicy::Complex => "complex",
            MarginPolicy::Best => "best",
        }
    }
}

impl fmt::Display for MarginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarginPolicy {
    type Err = RulError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complex" => Ok(MarginPolicy::Complex),
            "best" => Ok(MarginPolicy::Best),
            other => Err(RulError::InvalidConfiguration(format!(
                "invalid margin_method '{other}', choose either 'complex' or 'best'"
            ))),
        }
    }
}

/// A candidate margin together with its in-sample calibration metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub margin: Margin,
    pub metrics: CoverageMetrics,
}

/// Score each candidate on the calibration set using the clipped calibration predictions.
pub fn score_candidates(
    candidates: &CandidateMargins,
    preds_cal: &[f64],
    y_cal: &[f64],
) -> RulResult<Vec<CandidateScore>> {
    candidates
        .iter()
        .map(|margin| {
            let interval = PredictionInterval::below(preds_cal, margin.value)?;
            let metrics = evaluate(y_cal, &interval)?;
            tracing::info!(
                "candidate {}: margin = {:.3}, coverage = {:.3}, avg width = {:.3}",
                margin.method,
                margin.value,
                metrics.coverage,
                metrics.avg_width
            );
            Ok(CandidateScore {
                margin: *margin,
                metrics,
            })
        })
        .collect()
}

fn no_candidates() -> RulError {
    RulError::InsufficientData("no candidate margins to select from".to_string())
}

/// Candidate with the highest coverage; ties go to the earlier candidate.
pub fn select_max_coverage(scores: &[CandidateScore]) -> RulResult<&CandidateScore> {
    let mut best: Option<&CandidateScore> = None;
    for s in scores {
        if best.map_or(true, |b| s.metrics.coverage > b.metrics.coverage) {
            best = Some(s);
        }
    }
    best.ok_or_else(no_candidates)
}

/// Narrowest candidate among those reaching `target` coverage, else the one
/// whose coverage is closest to `target`.
pub fn select_target_then_width(
    scores: &[CandidateScore],
    target: f64,
) -> RulResult<&CandidateScore> {
    let mut narrowest: Option<&CandidateScore> = None;
    for s in scores.iter().filter(|s| s.metrics.coverage >= target) {
        if narrowest.map_or(true, |b| s.metrics.avg_width < b.metrics.avg_width) {
            narrowest = Some(s);
        }
    }
    if let Some(chosen) = narrowest {
        return Ok(chosen);
    }

    tracing::info!("no method meets coverage >= {:.3}; using closest coverage", target);
    let mut closest: Option<&CandidateScore> = None;
    for s in scores {
        let gap = (s.metrics.coverage - target).abs();
        if closest.map_or(true, |b| gap < (b.metrics.coverage - target).abs()) {
            closest = Some(s);
        }
    }
    closest.ok_or_else(no_candidates)
}

/// Apply a policy to a candidate set. `Best` scores candidates on the
/// calibration set it was built from, so its coverage is in-sample.
pub fn select_margin(
    policy: MarginPolicy,
    candidates: &CandidateMargins,
    preds_cal: &[f64],
    y_cal: &[f64],
) -> RulResult<Margin> {
    match policy {
        MarginPolicy::Complex => {
            let margin = candidates.consensus()?;
            tracing::info!("using 'complex' policy, median margin = {:.3}", margin.value);
            Ok(margin)
        }
        MarginPolicy::Best => {
            let scores = score_candidates(candidates, preds_cal, y_cal)?;
            let chosen = select_max_coverage(&scores)?;
            tracing::info!(
                "using 'best' policy, selected {} with margin = {:.3} (coverage = {:.3})",
                chosen.margin.method,
                chosen.margin.value,
                chosen.metrics.coverage
            );
            Ok(chosen.margin)
        }
    }
}

/// Model with the lowest finite S-score. Fails when no score is finite.
pub fn select_best_model<I>(scores: I) -> RulResult<(ModelKind, f64)>
where
    I: IntoIterator<Item = (ModelKind, f64)>,
{
    let mut best: Option<(ModelKind, f64)> = None;
    for (kind, score) in scores {
        if !score.is_finite() {
            tracing::debug!("{} has non-finite S-score, not eligible", kind);
            continue;
        }
        if best.map_or(true, |(_, b)| score < b) {
            best = Some((kind, score));
        }
    }
    best.ok_or_else(|| {
        RulError::NoValidModel("could not identify a valid 'best' model by S-score".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::margins::{CandidateSet, EstimatorSettings, MarginMethod, ResidualSet};

    fn score(method: MarginMethod, value: f64, coverage: f64, avg_width: f64) -> CandidateScore {
        CandidateScore {
            margin: Margin {
                method,
                value,
                alpha: 0.05,
            },
            metrics: CoverageMetrics {
                coverage,
                avg_width,
                index_diff: 0,
            },
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Best".parse::<MarginPolicy>().unwrap(), MarginPolicy::Best);
        assert_eq!(" complex ".parse::<MarginPolicy>().unwrap(), MarginPolicy::Complex);
        assert!(matches!(
            "widest".parse::<MarginPolicy>(),
            Err(RulError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_max_coverage_first_on_tie() {
        let scores = [
            score(MarginMethod::ParamNormal, 2.0, 0.9, 2.0),
            score(MarginMethod::Weighted, 3.0, 0.95, 3.0),
            score(MarginMethod::Bootstrap, 4.0, 0.95, 4.0),
        ];
        assert_eq!(select_max_coverage(&scores).unwrap().margin.method, MarginMethod::Weighted);
    }

    #[test]
    fn test_target_then_width() {
        let scores = [
            score(MarginMethod::ParamNormal, 2.0, 0.90, 2.0),
            score(MarginMethod::Weighted, 5.0, 0.97, 5.0),
            score(MarginMethod::Bootstrap, 4.0, 0.96, 4.0),
        ];
        let chosen = select_target_then_width(&scores, 0.95).unwrap();
        assert_eq!(chosen.margin.method, MarginMethod::Bootstrap);
    }

    #[test]
    fn test_target_fallback_closest() {
        let scores = [
            score(MarginMethod::ParamNormal, 2.0, 0.70, 2.0),
            score(MarginMethod::Weighted, 5.0, 0.91, 5.0),
            score(MarginMethod::Bootstrap, 4.0, 0.85, 4.0),
        ];
        let chosen = select_target_then_width(&scores, 0.95).unwrap();
        assert_eq!(chosen.margin.method, MarginMethod::Weighted);
    }

    #[test]
    fn test_empty_scores() {
        assert!(select_max_coverage(&[]).is_err());
        assert!(select_target_then_width(&[], 0.9).is_err());
    }

    #[test]
    fn test_select_margin_policies() {
        let y_cal = [10.0, 8.0, 6.0, 4.0, 2.0];
        let preds = [11.0, 7.0, 6.5, 5.0, 1.0];
        let residuals = ResidualSet::from_predictions(&y_cal, &preds).unwrap();
        let candidates = CandidateMargins::compute(
            &residuals,
            0.1,
            CandidateSet::UnitEvaluation,
            &EstimatorSettings::default(),
        )
        .unwrap();

        let complex = select_margin(MarginPolicy::Complex, &candidates, &preds, &y_cal).unwrap();
        assert_eq!(complex.method, MarginMethod::Complex);

        let best = select_margin(MarginPolicy::Best, &candidates, &preds, &y_cal).unwrap();
        let max_value = candidates.iter().map(|m| m.value).fold(0.0, f64::max);
        assert!(best.value <= max_value);
        assert_ne!(best.method, MarginMethod::Complex);
    }

    #[test]
    fn test_best_model_lowest_s_score() {
        let scores = vec![
            (ModelKind::Lstm, 420.0),
            (ModelKind::XGBoost, 310.5),
            (ModelKind::CnnGru, f64::NAN),
        ];
        assert_eq!(select_best_model(scores).unwrap(), (ModelKind::XGBoost, 310.5));
    }

    #[test]
    fn test_no_valid_model() {
        let scores = vec![
            (ModelKind::Lstm, f64::INFINITY),
            (ModelKind::XGBoost, f64::NAN),
        ];
        assert!(matches!(select_best_model(scores), Err(RulError::NoValidModel(_))));
        assert!(matches!(select_best_model(Vec::new()), Err(RulError::NoValidModel(_))));
    }
}
