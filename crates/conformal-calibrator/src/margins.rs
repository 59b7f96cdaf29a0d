//! Residual Margin Estimators
//!
//! Each estimator turns a population of calibration residuals and a
//! miscoverage level `alpha` into one non-negative margin. The margin is the
//! depth subtracted from a point forecast to form the interval's lower bound.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;

use crate::stats::{median, quantile_sorted, sorted};

/// Estimator that produced a margin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarginMethod {
    /// `(1 - alpha)` quantile of absolute residuals
    Naive,
    /// Gaussian assumption on signed residuals, `z * sample std`
    ParamNormal,
    /// Rank-weighted exponential quantile
    Weighted,
    /// Mean or median of bootstrap quantiles
    Bootstrap,
    /// Approximation: delegates to the set's base estimator, no leave-one-out refit
    #[serde(rename = "Jackknife+")]
    JackknifePlus,
    /// Approximation: delegates to the set's base estimator, no k-fold refit
    #[serde(rename = "CV+")]
    CvPlus,
    /// Median of the base, weighted and bootstrap margins
    #[serde(rename = "ComplexMethod")]
    Complex,
}

impl MarginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMethod::Naive => "Naive",
            MarginMethod::ParamNormal => "ParamNormal",
            MarginMethod::Weighted => "Weighted",
            MarginMethod::Bootstrap => "Bootstrap",
            MarginMethod::JackknifePlus => "Jackknife+",
            MarginMethod::CvPlus => "CV+",
            MarginMethod::Complex => "ComplexMethod",
        }
    }
}

impl fmt::Display for MarginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarginMethod {
    type Err = RulError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(MarginMethod::Naive),
            "paramnormal" | "parametric" => Ok(MarginMethod::ParamNormal),
            "weighted" => Ok(MarginMethod::Weighted),
            "bootstrap" => Ok(MarginMethod::Bootstrap),
            "jackknife+" | "jackknife" => Ok(MarginMethod::JackknifePlus),
            "cv+" | "cv" => Ok(MarginMethod::CvPlus),
            "complexmethod" | "complex" => Ok(MarginMethod::Complex),
            other => Err(RulError::InvalidConfiguration(format!(
                "unknown margin method '{other}'"
            ))),
        }
    }
}

/// How the per-resample bootstrap quantiles are reduced to one margin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapAggregate {
    Mean,
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSettings {
    /// Number of resamples `B`
    pub samples: usize,
    pub seed: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            samples: 200,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorSettings {
    pub bootstrap: BootstrapSettings,
    /// Fold count reported by the CV+ approximation
    pub fold_splits: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapSettings::default(),
            fold_splits: 5,
        }
    }
}

/// Signed calibration residuals `true - clipped_pred`. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualSet {
    residuals: Vec<f64>,
}

impl ResidualSet {
    pub fn new(residuals: Vec<f64>) -> RulResult<Self> {
        if residuals.is_empty() {
            return Err(RulError::InsufficientData(
                "residual set is empty; margin estimation needs at least one residual".to_string(),
            ));
        }
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(RulError::InvalidData("residual set contains non-finite values".to_string()));
        }
        Ok(Self { residuals })
    }

    pub fn from_predictions(y_true: &[f64], y_pred: &[f64]) -> RulResult<Self> {
        if y_true.len() != y_pred.len() {
            return Err(RulError::InvalidData(format!(
                "{} true values vs {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }
        Self::new(y_true.iter().zip(y_pred).map(|(t, p)| t - p).collect())
    }

    pub fn len(&self) -> usize {
        self.residuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residuals.is_empty()
    }

    pub fn signed(&self) -> &[f64] {
        &self.residuals
    }

    pub fn absolute(&self) -> Vec<f64> {
        self.residuals.iter().map(|r| r.abs()).collect()
    }
}

/// A margin tagged with its estimator and target miscoverage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub method: MarginMethod,
    pub value: f64,
    pub alpha: f64,
}

fn check_inputs(values: &[f64], alpha: f64) -> RulResult<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(RulError::InvalidConfiguration(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )));
    }
    if values.is_empty() {
        return Err(RulError::InsufficientData("no residuals to estimate a margin from".to_string()));
    }
    Ok(())
}

/// `(1 - alpha)` quantile of the absolute residuals, linearly interpolated.
pub fn naive_quantile_margin(abs_residuals: &[f64], alpha: f64) -> RulResult<f64> {
    check_inputs(abs_residuals, alpha)?;
    let q = quantile_sorted(&sorted(abs_residuals), 1.0 - alpha).unwrap_or(0.0);
    Ok(q.max(0.0))
}

/// Smallest residual whose cumulative weight reaches `(1 - alpha)` of the total.
///
/// Residuals are ranked ascending by magnitude and the residual at rank `k`
/// gets weight `exp(k / (n / 5))`, so the upper tail dominates the total.
pub fn weighted_exponential_margin(abs_residuals: &[f64], alpha: f64) -> RulResult<f64> {
    check_inputs(abs_residuals, alpha)?;
    let ranked = sorted(abs_residuals);
    let n = ranked.len();
    let scale = n as f64 / 5.0;

    let cdf: Vec<f64> = (0..n)
        .scan(0.0, |acc, k| {
            *acc += (k as f64 / scale).exp();
            Some(*acc)
        })
        .collect();
    let total = cdf[n - 1];
    let cutoff = (1.0 - alpha) * total;

    let idx = cdf.partition_point(|&c| c < cutoff).min(n - 1);
    Ok(ranked[idx].max(0.0))
}

/// Aggregate of `(1 - alpha)` quantiles over `B` resamples drawn with replacement.
///
/// One seed per resample is drawn from the master generator up front, so the
/// parallel resamples are order independent and reproducible.
pub fn bootstrap_margin(
    abs_residuals: &[f64],
    alpha: f64,
    settings: &BootstrapSettings,
    aggregate: BootstrapAggregate,
) -> RulResult<f64> {
    check_inputs(abs_residuals, alpha)?;
    if settings.samples == 0 {
        return Err(RulError::InvalidConfiguration(
            "bootstrap needs at least one resample".to_string(),
        ));
    }

    let n = abs_residuals.len();
    let q_level = 1.0 - alpha;
    let mut master = StdRng::seed_from_u64(settings.seed);
    let seeds: Vec<u64> = (0..settings.samples).map(|_| master.gen()).collect();

    let estimates: Vec<f64> = seeds
        .par_iter()
        .map(|&seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let resample: Vec<f64> = (0..n).map(|_| abs_residuals[rng.gen_range(0..n)]).collect();
            // n >= 1, so the quantile always exists
            quantile_sorted(&sorted(&resample), q_level).unwrap_or(0.0)
        })
        .collect();

    let value = match aggregate {
        BootstrapAggregate::Mean => estimates.iter().sum::<f64>() / estimates.len() as f64,
        BootstrapAggregate::Median => median(&estimates).unwrap_or(0.0),
    };
    Ok(value.max(0.0))
}

/// `z_{1-alpha}` times the Bessel-corrected standard deviation of the signed residuals.
///
/// Fewer than two residuals give a zero spread; a negative z (alpha > 0.5) is clamped to 0.
pub fn parametric_normal_margin(residuals: &[f64], alpha: f64) -> RulResult<f64> {
    check_inputs(residuals, alpha)?;
    let sigma = if residuals.len() < 2 {
        0.0
    } else {
        residuals.std_dev()
    };
    let normal = Normal::new(0.0, 1.0).map_err(|e| RulError::InvalidData(e.to_string()))?;
    let z = normal.inverse_cdf(1.0 - alpha);
    Ok((z * sigma).max(0.0))
}

/// Jackknife+ stand-in. No leave-one-out refit happens; the result is the base estimator's.
pub fn jackknife_plus_approx(base: f64) -> f64 {
    base
}

/// CV+ stand-in. No k-fold refit happens; the result is the base estimator's.
pub fn cv_plus_approx(base: f64, folds: usize) -> f64 {
    tracing::debug!("CV+ approximation: {} folds requested, no refit performed", folds);
    base
}

/// Consensus margin: median of the component margins.
pub fn complex_margin(components: &[f64]) -> RulResult<f64> {
    median(components)
        .map(|m| m.max(0.0))
        .ok_or_else(|| RulError::InsufficientData("no component margins to combine".to_string()))
}

/// Which family of candidates a calibration path computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSet {
    /// Whole-evaluation-set intervals: naive base, bootstrap mean
    Global,
    /// Single-unit intervals: parametric base, bootstrap median
    SingleUnit,
    /// Per-unit evaluation: parametric, weighted and bootstrap median only
    UnitEvaluation,
}

impl CandidateSet {
    pub fn base_method(&self) -> MarginMethod {
        match self {
            CandidateSet::Global => MarginMethod::Naive,
            CandidateSet::SingleUnit | CandidateSet::UnitEvaluation => MarginMethod::ParamNormal,
        }
    }

    pub fn bootstrap_aggregate(&self) -> BootstrapAggregate {
        match self {
            CandidateSet::Global => BootstrapAggregate::Mean,
            CandidateSet::SingleUnit | CandidateSet::UnitEvaluation => BootstrapAggregate::Median,
        }
    }

    pub fn methods(&self) -> Vec<MarginMethod> {
        let base = self.base_method();
        match self {
            CandidateSet::UnitEvaluation => {
                vec![base, MarginMethod::Weighted, MarginMethod::Bootstrap]
            }
            _ => vec![
                base,
                MarginMethod::Weighted,
                MarginMethod::Bootstrap,
                MarginMethod::JackknifePlus,
                MarginMethod::CvPlus,
                MarginMethod::Complex,
            ],
        }
    }
}

/// Margins from every estimator of one candidate set, same residuals and alpha.
/// Insertion order is kept; selection ties resolve to the earlier candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMargins {
    pub alpha: f64,
    margins: Vec<Margin>,
}

impl CandidateMargins {
    pub fn compute(
        residuals: &ResidualSet,
        alpha: f64,
        set: CandidateSet,
        settings: &EstimatorSettings,
    ) -> RulResult<Self> {
        let abs = residuals.absolute();

        let base = match set.base_method() {
            MarginMethod::Naive => naive_quantile_margin(&abs, alpha)?,
            _ => parametric_normal_margin(residuals.signed(), alpha)?,
        };
        let weighted = weighted_exponential_margin(&abs, alpha)?;
        let bootstrap = bootstrap_margin(&abs, alpha, &settings.bootstrap, set.bootstrap_aggregate())?;

        let mut margins = Vec::with_capacity(6);
        for method in set.methods() {
            let value = match method {
                MarginMethod::Naive | MarginMethod::ParamNormal => base,
                MarginMethod::Weighted => weighted,
                MarginMethod::Bootstrap => bootstrap,
                MarginMethod::JackknifePlus => jackknife_plus_approx(base),
                MarginMethod::CvPlus => cv_plus_approx(base, settings.fold_splits),
                MarginMethod::Complex => complex_margin(&[base, weighted, bootstrap])?,
            };
            tracing::debug!("candidate {}: margin = {:.3} (alpha={})", method, value, alpha);
            margins.push(Margin {
                method,
                value,
                alpha,
            });
        }

        Ok(Self { alpha, margins })
    }

    pub fn get(&self, method: MarginMethod) -> Option<&Margin> {
        self.margins.iter().find(|m| m.method == method)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Margin> {
        self.margins.iter()
    }

    pub fn as_slice(&self) -> &[Margin] {
        &self.margins
    }

    pub fn len(&self) -> usize {
        self.margins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.margins.is_empty()
    }

    /// Median of all candidate values, tagged as the consensus method.
    pub fn consensus(&self) -> RulResult<Margin> {
        let values: Vec<f64> = self.margins.iter().map(|m| m.value).collect();
        Ok(Margin {
            method: MarginMethod::Complex,
            value: complex_margin(&values)?,
            alpha: self.alpha,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RES: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

    #[test]
    fn test_naive_quantile_scenario() {
        let m = naive_quantile_margin(&RES, 0.2).unwrap();
        assert!((m - 4.2).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_favors_upper_tail() {
        // weights e^0..e^4, cutoff 0.8 of total lands on the last rank
        let m = weighted_exponential_margin(&RES, 0.2).unwrap();
        assert_eq!(m, 5.0);
        assert!(m >= naive_quantile_margin(&RES, 0.2).unwrap());
    }

    #[test]
    fn test_weighted_ignores_input_order() {
        let shuffled = [4.0, 1.0, 5.0, 3.0, 2.0];
        assert_eq!(
            weighted_exponential_margin(&shuffled, 0.5).unwrap(),
            weighted_exponential_margin(&RES, 0.5).unwrap()
        );
    }

    #[test]
    fn test_single_residual_degenerates() {
        assert_eq!(naive_quantile_margin(&[2.5], 0.05).unwrap(), 2.5);
        assert_eq!(weighted_exponential_margin(&[2.5], 0.05).unwrap(), 2.5);
        let b = bootstrap_margin(&[2.5], 0.05, &BootstrapSettings::default(), BootstrapAggregate::Mean)
            .unwrap();
        assert_eq!(b, 2.5);
        assert_eq!(parametric_normal_margin(&[2.5], 0.05).unwrap(), 0.0);
    }

    #[test]
    fn test_parametric_normal_value() {
        // std of [-1, 1] with ddof=1 is sqrt(2); z_0.95 ~ 1.6449
        let m = parametric_normal_margin(&[-1.0, 1.0], 0.05).unwrap();
        assert!((m - 1.6449 * 2f64.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_parametric_high_alpha_clamped() {
        assert_eq!(parametric_normal_margin(&[-3.0, 1.0, 4.0], 0.8).unwrap(), 0.0);
    }

    #[test]
    fn test_bootstrap_deterministic() {
        let res: Vec<f64> = (0..50).map(|i| ((i * 37) % 11) as f64 * 0.7).collect();
        let settings = BootstrapSettings { samples: 200, seed: 7 };
        let a = bootstrap_margin(&res, 0.1, &settings, BootstrapAggregate::Median).unwrap();
        let b = bootstrap_margin(&res, 0.1, &settings, BootstrapAggregate::Median).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());

        let max = res.iter().cloned().fold(f64::MIN, f64::max);
        assert!(a >= 0.0 && a <= max);
    }

    #[test]
    fn test_bootstrap_constant_residuals() {
        let m = bootstrap_margin(&[3.0; 10], 0.05, &BootstrapSettings::default(), BootstrapAggregate::Mean)
            .unwrap();
        assert!((m - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        assert!(matches!(
            naive_quantile_margin(&RES, 0.0),
            Err(RulError::InvalidConfiguration(_))
        ));
        assert!(naive_quantile_margin(&RES, 1.0).is_err());
        assert!(weighted_exponential_margin(&RES, f64::NAN).is_err());
    }

    #[test]
    fn test_empty_residual_set() {
        assert!(matches!(ResidualSet::new(vec![]), Err(RulError::InsufficientData(_))));
        assert!(matches!(naive_quantile_margin(&[], 0.1), Err(RulError::InsufficientData(_))));
    }

    #[test]
    fn test_residuals_from_predictions() {
        let set = ResidualSet::from_predictions(&[10.0, 5.0], &[8.0, 7.0]).unwrap();
        assert_eq!(set.signed(), &[2.0, -2.0]);
        assert_eq!(set.absolute(), vec![2.0, 2.0]);
        assert!(ResidualSet::from_predictions(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_global_candidates_layout() {
        let set = ResidualSet::new(vec![-1.0, 2.0, -3.0, 4.0, 5.0]).unwrap();
        let c = CandidateMargins::compute(&set, 0.2, CandidateSet::Global, &EstimatorSettings::default())
            .unwrap();
        assert_eq!(c.len(), 6);
        let naive = c.get(MarginMethod::Naive).unwrap().value;
        assert!((naive - 4.2).abs() < 1e-12);
        assert_eq!(c.get(MarginMethod::JackknifePlus).unwrap().value, naive);
        assert_eq!(c.get(MarginMethod::CvPlus).unwrap().value, naive);
        assert!(c.get(MarginMethod::ParamNormal).is_none());

        let mut parts = vec![
            naive,
            c.get(MarginMethod::Weighted).unwrap().value,
            c.get(MarginMethod::Bootstrap).unwrap().value,
        ];
        parts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(c.get(MarginMethod::Complex).unwrap().value, parts[1]);
    }

    #[test]
    fn test_unit_evaluation_candidates() {
        let set = ResidualSet::new(vec![-1.0, 2.0, -3.0, 4.0]).unwrap();
        let c = CandidateMargins::compute(&set, 0.1, CandidateSet::UnitEvaluation, &EstimatorSettings::default())
            .unwrap();
        let methods: Vec<_> = c.iter().map(|m| m.method).collect();
        assert_eq!(
            methods,
            vec![MarginMethod::ParamNormal, MarginMethod::Weighted, MarginMethod::Bootstrap]
        );
        let consensus = c.consensus().unwrap();
        assert_eq!(consensus.method, MarginMethod::Complex);
    }

    #[test]
    fn test_method_names_round_trip() {
        for m in CandidateSet::SingleUnit.methods() {
            assert_eq!(m.as_str().parse::<MarginMethod>().unwrap(), m);
        }
        assert_eq!(serde_json::to_string(&MarginMethod::JackknifePlus).unwrap(), "\"Jackknife+\"");
    }
}
