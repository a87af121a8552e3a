//! Monthly rate table loading.

use anyhow::{Context, Result};
use its_core::{DataQualityReport, ObservationTable};
use std::path::Path;

/// Read the joined monthly table from a CSV file.
pub fn read_table(path: &Path) -> Result<(ObservationTable, DataQualityReport)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result.context("failed to read CSV row")?;
        records.push(record.iter().map(str::to_string).collect::<Vec<String>>());
    }
    if records.is_empty() {
        anyhow::bail!("{} contains no data rows", path.display());
    }

    let (table, report) = ObservationTable::from_records(&headers, records)
        .with_context(|| format!("invalid input table {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = table.len(), series = table.names().len(), "table loaded");
    Ok((table, report))
}
