//! Tabular coverage reports handed to persistence or display.

use std::fmt;
use std::io::Write;

use rul_core::{RulResult, UnitId};
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMetrics;
use crate::margins::MarginMethod;
use crate::selector::CandidateScore;

const CSV_HEADER: [&str; 8] = [
    "unit_id",
    "method",
    "num_predictions",
    "margin",
    "coverage",
    "avg_width",
    "index_diff",
    "target_coverage",
];

/// One report row: a method, a unit, or both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRow {
    pub unit_id: Option<UnitId>,
    pub method: Option<MarginMethod>,
    pub num_predictions: Option<usize>,
    pub margin: f64,
    pub coverage: f64,
    pub avg_width: f64,
    pub index_diff: usize,
    pub target_coverage: f64,
}

impl CoverageRow {
    pub fn new(margin: f64, metrics: &CoverageMetrics, target_coverage: f64) -> Self {
        Self {
            unit_id: None,
            method: None,
            num_predictions: None,
            margin,
            coverage: metrics.coverage,
            avg_width: metrics.avg_width,
            index_diff: metrics.index_diff,
            target_coverage,
        }
    }

    pub fn with_method(mut self, method: MarginMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_unit(mut self, unit_id: UnitId, num_predictions: usize) -> Self {
        self.unit_id = Some(unit_id);
        self.num_predictions = Some(num_predictions);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageTable {
    pub rows: Vec<CoverageRow>,
}

impl CoverageTable {
    pub fn from_scores(scores: &[CandidateScore], target_coverage: f64) -> Self {
        Self {
            rows: scores
                .iter()
                .map(|s| {
                    CoverageRow::new(s.margin.value, &s.metrics, target_coverage)
                        .with_method(s.margin.method)
                })
                .collect(),
        }
    }

    pub fn push(&mut self, row: CoverageRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn method(&self, method: MarginMethod) -> Option<&CoverageRow> {
        self.rows.iter().find(|r| r.method == Some(method))
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&CoverageRow> {
        self.rows.iter().find(|r| r.unit_id == Some(unit_id))
    }

    /// Write the table as CSV with a header row, even when there are no rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> RulResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        if self.rows.is_empty() {
            wtr.write_record(CSV_HEADER).map_err(std::io::Error::from)?;
        }
        for row in &self.rows {
            wtr.serialize(row).map_err(std::io::Error::from)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl fmt::Display for CoverageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>14} {:>10} {:>10} {:>10} {:>10} {:>6}",
            "unit", "method", "margin", "coverage", "avg_width", "target", "idx"
        )?;
        for r in &self.rows {
            let unit = r.unit_id.map(|u| u.to_string()).unwrap_or_else(|| "-".into());
            let method = r.method.map(|m| m.as_str()).unwrap_or("-");
            writeln!(
                f,
                "{:>8} {:>14} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>6}",
                unit, method, r.margin, r.coverage, r.avg_width, r.target_coverage, r.index_diff
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> CoverageMetrics {
        CoverageMetrics {
            coverage: 0.5,
            avg_width: 2.0,
            index_diff: 3,
        }
    }

    #[test]
    fn test_csv_schema() {
        let mut table = CoverageTable::default();
        table.push(CoverageRow::new(1.5, &metrics(), 0.95).with_method(MarginMethod::CvPlus));
        table.push(CoverageRow::new(2.0, &metrics(), 0.95).with_unit(7, 12));

        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "unit_id,method,num_predictions,margin,coverage,avg_width,index_diff,target_coverage"
        );
        assert_eq!(lines.next().unwrap(), ",CV+,,1.5,0.5,2.0,3,0.95");
        assert_eq!(lines.next().unwrap(), "7,,12,2.0,0.5,2.0,3,0.95");
    }

    #[test]
    fn test_lookup() {
        let mut table = CoverageTable::default();
        table.push(CoverageRow::new(1.0, &metrics(), 0.9).with_method(MarginMethod::Weighted));
        assert!(table.method(MarginMethod::Weighted).is_some());
        assert!(table.method(MarginMethod::Naive).is_none());
        assert!(table.to_string().contains("Weighted"));
    }

    #[test]
    fn test_empty_table_writes_header() {
        let mut buf = Vec::new();
        CoverageTable::default().write_csv(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap().trim_end(),
            "unit_id,method,num_predictions,margin,coverage,avg_width,index_diff,target_coverage"
        );
    }
}
