//! Conformal Calibrator Module
//!
//! Distribution-free, one-sided prediction intervals for remaining-useful-life
//! forecasts. Residual margins are estimated with several competing
//! procedures. Trajectories are projected to be non-increasing and
//! non-negative, and candidate margins are scored and selected by coverage.

pub mod coverage;
pub mod interval;
pub mod margins;
pub mod postprocess;
pub mod report;
pub mod selector;
pub mod stats;

pub use coverage::{evaluate, index_difference, CoverageMetrics};
pub use interval::PredictionInterval;
pub use margins::{
    bootstrap_margin, complex_margin, naive_quantile_margin, parametric_normal_margin,
    weighted_exponential_margin, BootstrapAggregate, BootstrapSettings, CandidateMargins,
    CandidateSet, EstimatorSettings, Margin, MarginMethod, ResidualSet,
};
pub use postprocess::{enforce_monotonic, enforce_monotonic_in_place, is_valid_trajectory};
pub use report::{CoverageRow, CoverageTable};
pub use selector::{
    score_candidates, select_best_model, select_margin, select_max_coverage,
    select_target_then_width, CandidateScore, MarginPolicy,
};
