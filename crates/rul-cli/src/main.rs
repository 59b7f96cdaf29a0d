//! rul-cli: Replay precomputed RUL forecasts through conformal calibration.
//!
//! Reads a CSV of `unit_id,time_cycle,rul_true,rul_pred` rows, treats the
//! forecast column as the output of the named model, and writes a coverage
//! report. Calibration knobs come from `CONFORMAL_*` environment variables.
//!
//! Usage:
//!   cargo run -p rul-cli -- --input preds.csv
//!   cargo run -p rul-cli -- --input preds.csv --mode global --output global.csv
//!   cargo run -p rul-cli -- --input preds.csv --mode unit --unit 91 --selected selected.json
//!   cargo run -p rul-cli -- --input preds.csv --mode render --units 91,92 --selected selected.json

use std::fs::File;
use std::io;

use anyhow::{bail, Context};
use conformal_calibrator::CoverageTable;
use prognostics_pipeline::{
    CalibrationOrchestrator, ConformalConfig, RenderedUnits, SelectedMethod,
};
use rul_core::{
    FeatureMatrix, ModelKind, RulResult, ScoringModel, UnitId, WindowedDataset,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct PredictionRow {
    unit_id: UnitId,
    time_cycle: u32,
    rul_true: f64,
    rul_pred: f64,
}

#[derive(Debug, Serialize)]
struct SegmentRow {
    unit_id: UnitId,
    x: usize,
    prediction: f64,
    lower: f64,
}

/// Scores by returning the stored forecast held in the single feature column.
struct ReplayModel {
    kind: ModelKind,
}

impl ScoringModel for ReplayModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn predict(&self, x: &FeatureMatrix) -> RulResult<Vec<f64>> {
        Ok(x.rows().iter().map(|r| r[0]).collect())
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn parse_units(raw: &str) -> anyhow::Result<Vec<UnitId>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse()
                .with_context(|| format!("invalid unit id '{s}'"))
        })
        .collect()
}

fn load_predictions(path: &str) -> anyhow::Result<WindowedDataset> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("failed to open {path}"))?;
    let mut rows: Vec<PredictionRow> = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.with_context(|| format!("malformed row in {path}"))?);
    }
    if rows.is_empty() {
        bail!("{path} contains no prediction rows");
    }
    rows.sort_by_key(|r| (r.unit_id, r.time_cycle));

    let x = FeatureMatrix::new(rows.iter().map(|r| vec![r.rul_pred]).collect(), 1, 1)?;
    let y = rows.iter().map(|r| r.rul_true).collect();
    let units = rows.iter().map(|r| r.unit_id).collect();
    Ok(WindowedDataset::new(x, y, units)?)
}

fn write_table(table: &CoverageTable, output: Option<&str>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("failed to create {path}"))?;
            table.write_csv(file)?;
            tracing::info!("coverage report ({} rows) saved to {}", table.len(), path);
        }
        None => table.write_csv(io::stdout().lock())?,
    }
    Ok(())
}

fn write_segments(rendered: &RenderedUnits, output: Option<&str>) -> anyhow::Result<()> {
    let sink: Box<dyn io::Write> = match output {
        Some(path) => {
            Box::new(File::create(path).with_context(|| format!("failed to create {path}"))?)
        }
        None => Box::new(io::stdout().lock()),
    };
    let mut wtr = csv::Writer::from_writer(sink);
    for seg in &rendered.segments {
        for (i, x) in seg.x_range().enumerate() {
            wtr.serialize(SegmentRow {
                unit_id: seg.unit_id,
                x,
                prediction: seg.predictions[i],
                lower: seg.lower[i],
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let input = arg_value(&args, "--input").context("--input <predictions.csv> is required")?;
    let mode = arg_value(&args, "--mode").unwrap_or("units");
    let output = arg_value(&args, "--output");
    let selected_path = arg_value(&args, "--selected");
    let kind: ModelKind = arg_value(&args, "--model").unwrap_or("LSTM").parse()?;

    let config = ConformalConfig::from_env()?;
    let dataset = load_predictions(input)?;
    tracing::info!(
        "loaded {} predictions for {} units from {}",
        dataset.len(),
        dataset.unique_units().len(),
        input
    );

    let model = ReplayModel { kind };
    let orchestrator = CalibrationOrchestrator::new(&model, &dataset, config)?;

    match mode {
        "global" => {
            let global = orchestrator.calibrate_global()?;
            if let Some(path) = selected_path {
                global.selected.save(path)?;
            }
            write_table(&global.table, output)?;
        }
        "unit" => {
            let unit: UnitId = arg_value(&args, "--unit")
                .context("--unit <id> is required in unit mode")?
                .parse()
                .context("invalid --unit value")?;
            let single = orchestrator.calibrate_single_unit(unit)?;
            if let Some(path) = selected_path {
                single.selected.save(path)?;
            }
            let mut table = single.table;
            table.push(single.unit_row);
            write_table(&table, output)?;
        }
        "units" => {
            let report = orchestrator.evaluate_units()?;
            tracing::info!(
                "evaluated {} units with {} margin {:.3}",
                report.table.len(),
                report.margin.method,
                report.margin.value
            );
            write_table(&report.table, output)?;
        }
        "render" => {
            let units = match arg_value(&args, "--units") {
                Some(raw) => parse_units(raw)?,
                None => orchestrator.split().evaluation.clone(),
            };
            let selected = match selected_path {
                Some(path) => Some(
                    SelectedMethod::load(path)
                        .with_context(|| format!("failed to load selected method from {path}"))?,
                ),
                None => None,
            };
            let rendered = orchestrator.render_units(&units, selected.as_ref())?;
            tracing::info!(
                "rendered {} units with {} margin {:.3}",
                rendered.segments.len(),
                rendered.selected.method,
                rendered.selected.margin
            );
            write_segments(&rendered, output)?;
        }
        other => bail!("unknown mode '{other}', expected global, unit, units or render"),
    }

    Ok(())
}
