//! Per-request analysis: subset → filter → derive → specify → fit.

use its_core::{AnalysisConfig, Error, Observation, ObservationTable, Result};
use serde::{Deserialize, Serialize};

use crate::covariance::CovarianceKind;
use crate::design::{GroupSchema, InteractionGroup, ModelSpec, is_binary_flag, relabel_binary};
use crate::fit::{FittedModel, fit_poisson};
use crate::regressors::{RegressorTable, derive_regressors};

/// One analysis request: which series, and how to break it down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Glob over series names.
    pub pattern: String,
    /// Panel analysis over a `group_N` column.
    #[serde(default)]
    pub interaction: Option<InteractionGroup>,
    /// Keep only the "true" rows of this 0/1 `group_N` column when its
    /// category is constant.
    #[serde(default)]
    pub flatten: Option<usize>,
    /// Appended to every group label in reports.
    #[serde(default)]
    pub group_suffix: Option<String>,
    /// Report label; defaults to the category of the breakdown column.
    #[serde(default)]
    pub label: Option<String>,
}

impl ModelRequest {
    /// Single-series request.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            interaction: None,
            flatten: None,
            group_suffix: None,
            label: None,
        }
    }

    /// Panel request over `interaction`.
    pub fn with_interaction(mut self, interaction: InteractionGroup) -> Self {
        self.interaction = Some(interaction);
        self
    }

    /// Enable flattening on `group_N`.
    pub fn with_flatten(mut self, column: usize) -> Self {
        self.flatten = Some(column);
        self
    }

    /// Suffix for group labels.
    pub fn with_group_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.group_suffix = Some(suffix.into());
        self
    }

    /// Report label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Index of the `category_N` column describing this request.
    pub fn category_column(&self) -> usize {
        self.interaction.as_ref().map(|g| g.column).unwrap_or(0)
    }
}

/// A fitted request together with the data it was fitted on.
#[derive(Debug, Clone)]
pub struct ItsModel {
    /// Fitted model.
    pub model: FittedModel,
    /// Regressor table (all rows, including those outside the estimation sample).
    pub data: RegressorTable,
    /// First category label of the breakdown column.
    pub category: Option<String>,
}

/// Keep only rows where the 0/1 column is true, if its category is constant.
pub fn flatten(rows: Vec<Observation>, column: usize) -> Vec<Observation> {
    if !is_binary_flag(&rows, column) {
        return rows;
    }
    let first = rows.first().and_then(|r| r.category(column));
    if !rows.iter().all(|r| r.category(column) == first) {
        return rows;
    }
    rows.into_iter()
        .filter(|r| r.group(column).is_some_and(|g| g.trim().parse::<f64>() == Ok(1.0)))
        .collect()
}

fn apply_schema(rows: Vec<Observation>, group: &InteractionGroup) -> Result<Vec<Observation>> {
    let relabel = match group.schema {
        GroupSchema::Categorical => false,
        GroupSchema::BinaryFlag => true,
        GroupSchema::Infer => is_binary_flag(&rows, group.column),
    };
    if relabel { relabel_binary(rows, group.column) } else { Ok(rows) }
}

/// Run one request end to end.
pub fn get_model(
    table: &ObservationTable,
    request: &ModelRequest,
    config: &AnalysisConfig,
) -> Result<ItsModel> {
    let mut rows = table.subset(&request.pattern)?;

    if let Some(group) = &request.interaction {
        if rows.iter().all(|r| r.groups.len() <= group.column) {
            return Err(Error::Configuration(format!(
                "series '{}' have no column {}",
                request.pattern,
                group.column_name()
            )));
        }
        rows.retain(|r| r.group(group.column).is_some());
    }
    if let Some(cutoff) = config.exclude_from {
        rows.retain(|r| r.date < cutoff);
    }
    if let Some(column) = request.flatten {
        rows = flatten(rows, column);
    }
    if let Some(group) = &request.interaction {
        rows = apply_schema(rows, group)?;
    }
    if rows.is_empty() {
        return Err(Error::Configuration(format!(
            "no rows left for '{}' after filtering",
            request.pattern
        )));
    }

    let category_column = request.category_column();
    let category = rows.iter().find_map(|r| r.category(category_column)).map(str::to_string);

    let group_column = request.interaction.as_ref().map(|g| g.column);
    let data = derive_regressors(&rows, group_column, &config.cutoffs)?;

    let column_name = request.interaction.as_ref().map(|g| g.column_name());
    let interaction = request
        .interaction
        .as_ref()
        .zip(column_name.as_deref())
        .map(|(g, name)| (name, g.reference.as_str()));
    let spec = ModelSpec::build(&data, interaction, config.model.harmonics)?;

    let max_lags = config.model.max_lags;
    let kind = if request.interaction.is_some() {
        CovarianceKind::HacGroupSum { max_lags }
    } else {
        CovarianceKind::Hac { max_lags }
    };

    tracing::debug!(pattern = %request.pattern, n_rows = data.len(), ?kind, "fitting request");
    let model = fit_poisson(spec, &data, kind, &config.model)?;
    Ok(ItsModel { model, data, category })
}
