use std::env;
use std::str::FromStr;

use conformal_calibrator::{BootstrapSettings, EstimatorSettings, MarginPolicy};
use rul_core::{RulError, RulResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformalConfig {
    // Coverage target
    pub alpha: f64,                     // 0.05 -> 95% target coverage
    pub margin_method: MarginPolicy,    // "complex" | "best"

    // Estimators
    pub bootstrap_samples: usize,       // B = 200
    pub fold_splits: usize,             // 5, reported by the CV+ approximation
    pub random_state: u64,              // 42

    // Orchestration
    pub calibration_fraction: f64,      // 0.8 of sorted unit ids
    pub sequence_length: usize,         // 20 steps per window
    pub gap: usize,                     // 10 index steps between rendered units
}

impl Default for ConformalConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            margin_method: MarginPolicy::Best,
            bootstrap_samples: 200,
            fold_splits: 5,
            random_state: 42,
            calibration_fraction: 0.8,
            sequence_length: 20,
            gap: 10,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> RulResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RulError::InvalidConfiguration(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(default),
    }
}

impl ConformalConfig {
    pub fn from_env() -> RulResult<Self> {
        let defaults = Self::default();
        let config = Self {
            alpha: env_or("CONFORMAL_ALPHA", defaults.alpha)?,
            margin_method: env_or("CONFORMAL_MARGIN_METHOD", defaults.margin_method)?,
            bootstrap_samples: env_or("CONFORMAL_BOOTSTRAP_SAMPLES", defaults.bootstrap_samples)?,
            fold_splits: env_or("CONFORMAL_FOLD_SPLITS", defaults.fold_splits)?,
            random_state: env_or("CONFORMAL_RANDOM_STATE", defaults.random_state)?,
            calibration_fraction: env_or(
                "CONFORMAL_CALIBRATION_FRACTION",
                defaults.calibration_fraction,
            )?,
            sequence_length: env_or("CONFORMAL_SEQUENCE_LENGTH", defaults.sequence_length)?,
            gap: env_or("CONFORMAL_GAP", defaults.gap)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RulResult<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(RulError::InvalidConfiguration(format!(
                "alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.bootstrap_samples == 0 {
            return Err(RulError::InvalidConfiguration(
                "bootstrap_samples must be at least 1".to_string(),
            ));
        }
        if !(self.calibration_fraction > 0.0 && self.calibration_fraction < 1.0) {
            return Err(RulError::InvalidConfiguration(format!(
                "calibration_fraction must lie in (0, 1), got {}",
                self.calibration_fraction
            )));
        }
        if self.sequence_length == 0 {
            return Err(RulError::InvalidConfiguration(
                "sequence_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn target_coverage(&self) -> f64 {
        1.0 - self.alpha
    }

    pub fn estimator_settings(&self) -> EstimatorSettings {
        EstimatorSettings {
            bootstrap: BootstrapSettings {
                samples: self.bootstrap_samples,
                seed: self.random_state,
            },
            fold_splits: self.fold_splits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConformalConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.target_coverage() - 0.95).abs() < 1e-12);
        assert_eq!(config.estimator_settings().bootstrap.samples, 200);
    }

    #[test]
    fn test_validation_failures() {
        let bad_alpha = ConformalConfig {
            alpha: 1.0,
            ..ConformalConfig::default()
        };
        assert!(matches!(bad_alpha.validate(), Err(RulError::InvalidConfiguration(_))));

        let bad_fraction = ConformalConfig {
            calibration_fraction: 0.0,
            ..ConformalConfig::default()
        };
        assert!(bad_fraction.validate().is_err());

        let no_bootstrap = ConformalConfig {
            bootstrap_samples: 0,
            ..ConformalConfig::default()
        };
        assert!(no_bootstrap.validate().is_err());
    }

    // Only test that mutates process environment.
    #[test]
    fn test_from_env() {
        env::set_var("CONFORMAL_ALPHA", "0.1");
        env::set_var("CONFORMAL_MARGIN_METHOD", "Complex");
        let config = ConformalConfig::from_env().unwrap();
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.margin_method, MarginPolicy::Complex);

        env::set_var("CONFORMAL_MARGIN_METHOD", "widest");
        assert!(matches!(
            ConformalConfig::from_env(),
            Err(RulError::InvalidConfiguration(_))
        ));

        env::remove_var("CONFORMAL_ALPHA");
        env::remove_var("CONFORMAL_MARGIN_METHOD");
    }
}
