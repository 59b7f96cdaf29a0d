//! The calibrated method kept for reuse on unseen units.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use conformal_calibrator::{Margin, MarginMethod};
use rul_core::{ModelKind, RulResult};
use serde::{Deserialize, Serialize};

/// Method and margin chosen by a calibration run.
///
/// Returned by value from calibration and passed explicitly to inference.
/// Callers that share one across threads serialize updates themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedMethod {
    pub method: MarginMethod,
    pub margin: f64,
    pub alpha: f64,
    pub model: ModelKind,
    pub calibrated_at: DateTime<Utc>,
}

impl SelectedMethod {
    pub fn from_margin(margin: &Margin, model: ModelKind) -> Self {
        Self {
            method: margin.method,
            margin: margin.value,
            alpha: margin.alpha,
            model,
            calibrated_at: Utc::now(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> RulResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!(
            "saved selected method {} (margin = {:.3}) to {}",
            self.method,
            self.margin,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> RulResult<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let selected: Self = serde_json::from_str(&raw)?;
        tracing::debug!("loaded selected method {} from {}", selected.method, path.as_ref().display());
        Ok(selected)
    }
}
