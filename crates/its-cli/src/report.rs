//! JSON and CSV artifacts.

use anyhow::{Context, Result};
use its_inference::{
    CiRow, FittedModel, ForestEntry, ForestPanel, GroupSeries, LrTestResult, Projection, SummaryRow,
};
use serde::Serialize;
use std::path::Path;

/// Everything written for one named model.
#[derive(Debug, Serialize)]
pub struct ModelReport<'a> {
    pub name: &'a str,
    pub pattern: &'a str,
    pub category: Option<&'a str>,
    pub fit: &'a FittedModel,
    pub ci: &'a [CiRow],
    pub projection: &'a Projection,
    pub groups: &'a [GroupSeries],
    /// Harmonics vs no harmonics, when both fits succeeded.
    pub seasonality_lr: Option<LrTestResult>,
}

/// File-name-safe form of an artifact name.
pub fn slug(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let s = s.trim_matches('_').to_string();
    if s.is_empty() { "model".to_string() } else { s }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_ci_csv(path: &Path, rows: &[CiRow]) -> Result<()> {
    write_rows(path, rows)
}

pub fn write_forest(dir: &Path, name: &str, entries: &[ForestEntry], panels: &[ForestPanel]) -> Result<()> {
    let stem = format!("forest_{}", slug(name));
    write_json(&dir.join(format!("{stem}.json")), &panels)?;
    write_rows(&dir.join(format!("{stem}.csv")), entries)
}

/// Summary table with a single header row of `period: label` columns.
pub fn write_summary_table(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if let Some(first) = rows.first() {
        let mut header = vec!["name".to_string()];
        header.extend(first.cells.iter().map(|c| {
            if c.period.is_empty() { c.label.clone() } else { format!("{}: {}", c.period, c.label) }
        }));
        wtr.write_record(&header)?;
    }
    for row in rows {
        let mut record = vec![row.name.clone()];
        record.extend(row.cells.iter().map(|c| c.pcnt.clone()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
