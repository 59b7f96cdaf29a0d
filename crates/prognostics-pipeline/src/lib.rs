pub mod config;
pub mod experiment;
pub mod metrics;
pub mod orchestrator;
pub mod scaling;
pub mod selected;
pub mod split;
pub mod windowing;

pub use config::ConformalConfig;
pub use experiment::{ExperimentResults, ExperimentRunner, ModelSummary};
pub use metrics::{s_score, ModelMetrics};
pub use orchestrator::{
    CalibrationOrchestrator, GlobalCalibration, RenderedUnits, SingleUnitCalibration,
    UnitEvaluationReport, UnitForecast, UnitSegment,
};
pub use scaling::MinMaxScaler;
pub use selected::SelectedMethod;
pub use split::UnitSplit;
pub use windowing::{build_windows, ExperimentData, SensorRecord, UnitSeries};
