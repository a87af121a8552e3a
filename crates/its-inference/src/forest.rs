//! Cross-group comparison: interaction effects of many requests as one
//! flat collection, and its layout into forest panels.

use std::collections::BTreeMap;

use its_core::{AnalysisConfig, ObservationTable, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::ci::{ChangeType, ci_table, decompose_term_key};
use crate::pipeline::{ModelRequest, get_model};

/// One interaction effect of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForestEntry {
    /// Breakdown label (request label or category).
    pub category: String,
    /// Effect kind.
    pub change: ChangeType,
    /// Non-reference group level, with any request suffix.
    pub group: String,
    /// Percent change.
    pub coef: f64,
    /// Lower bound, percent change.
    pub lower: f64,
    /// Upper bound, percent change.
    pub upper: f64,
    /// Error bar, percent-change scale.
    pub error: f64,
    /// Formatted interval.
    pub pcnt: String,
}

/// Fit `request` and keep its group-level effects.
pub fn pcnt_change(
    table: &ObservationTable,
    request: &ModelRequest,
    config: &AnalysisConfig,
) -> Result<Vec<ForestEntry>> {
    let its = get_model(table, request, config)?;
    let category = request
        .label
        .clone()
        .or(its.category)
        .unwrap_or_else(|| request.pattern.clone());
    let suffix = request.group_suffix.as_deref().unwrap_or("");

    let rows = ci_table(&its.model, config.model.alpha, config.model.round_to)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let (change, level) = decompose_term_key(&row.term)?;
            Some(ForestEntry {
                category: category.clone(),
                change,
                group: format!("{level}{suffix}"),
                coef: row.coef,
                lower: row.lower,
                upper: row.upper,
                error: row.error,
                pcnt: row.pcnt,
            })
        })
        .collect())
}

/// Run every request (in parallel) and concatenate the entries in request order.
///
/// The first failing request aborts the whole collection.
pub fn forest(
    table: &ObservationTable,
    requests: &[ModelRequest],
    config: &AnalysisConfig,
) -> Result<Vec<ForestEntry>> {
    let per_request: Vec<Vec<ForestEntry>> = requests
        .par_iter()
        .map(|req| pcnt_change(table, req, config))
        .collect::<Result<_>>()?;
    Ok(per_request.into_iter().flatten().collect())
}

/// One cell of the forest grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForestPanel {
    /// Row label.
    pub category: String,
    /// Column.
    pub change: ChangeType,
    /// Column heading.
    pub heading: &'static str,
    /// Entries in input order.
    pub entries: Vec<ForestEntry>,
}

/// Arrange entries into `(category, change)` panels restricted to `columns`.
///
/// Panels are ordered by category, then by change type in display order.
pub fn forest_panels(entries: &[ForestEntry], columns: &[ChangeType]) -> Vec<ForestPanel> {
    let mut grid: BTreeMap<(&str, ChangeType), Vec<ForestEntry>> = BTreeMap::new();
    for e in entries.iter().filter(|e| columns.contains(&e.change)) {
        grid.entry((e.category.as_str(), e.change)).or_default().push(e.clone());
    }
    grid.into_iter()
        .map(|((category, change), entries)| ForestPanel {
            category: category.to_string(),
            change,
            heading: change.heading(),
            entries,
        })
        .collect()
}
