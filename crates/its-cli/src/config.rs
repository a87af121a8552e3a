//! Run configuration (YAML or JSON).

use anyhow::Result;
use chrono::NaiveDate;
use its_core::{AnalysisConfig, Cutoffs, ModelConfig, ObservationTable};
use its_inference::{ChangeType, ModelRequest};
use serde::Deserialize;
use std::path::Path;

/// A model whose fit, intervals and projections are written to `models/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedRequest {
    /// Artifact name.
    pub name: String,
    #[serde(flatten)]
    pub request: ModelRequest,
}

/// A forest report: requests concatenated into one grid.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestConfig {
    pub name: String,
    /// Change-type columns to keep, in display order.
    #[serde(default = "all_change_types")]
    pub columns: Vec<ChangeType>,
    pub requests: Vec<ModelRequest>,
}

fn all_change_types() -> Vec<ChangeType> {
    ChangeType::ALL.to_vec()
}

/// One row of a summary table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRowConfig {
    pub label: String,
    pub pattern: String,
}

/// A summary table: one single-series model per row.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub rows: Vec<TableRowConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Interruption dates; defaults to 2020-03-01 and 2021-03-01.
    #[serde(default)]
    pub cutoffs: Option<Cutoffs>,
    /// Drop rows dated on or after this month (incomplete trailing data).
    #[serde(default)]
    pub exclude_from: Option<NaiveDate>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub models: Vec<NamedRequest>,
    #[serde(default)]
    pub forests: Vec<ForestConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_cutoffs() -> Result<Cutoffs> {
    let first = NaiveDate::from_ymd_opt(2020, 3, 1);
    let second = NaiveDate::from_ymd_opt(2021, 3, 1);
    match (first, second) {
        (Some(a), Some(b)) => Ok(Cutoffs::new(a, b)?),
        _ => anyhow::bail!("invalid default cutoff dates"),
    }
}

impl RunConfig {
    /// Configuration used when no file is given: one single-series model per
    /// series name. Series carrying group labels need an explicit request.
    pub fn for_table(table: &ObservationTable) -> Self {
        let models = table
            .names()
            .into_iter()
            .filter(|name| {
                let grouped = table
                    .rows()
                    .iter()
                    .any(|r| &r.name == name && r.groups.iter().any(Option::is_some));
                if grouped {
                    tracing::info!(series = %name, "grouped series skipped without a config");
                }
                !grouped
            })
            .map(|n| NamedRequest { request: ModelRequest::new(n.clone()), name: n })
            .collect();
        Self { models, ..Self::default() }
    }

    /// Analysis configuration shared by every request.
    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        self.model.validate()?;
        let cutoffs = match self.cutoffs {
            Some(c) => c,
            None => default_cutoffs()?,
        };
        let mut cfg = AnalysisConfig::new(cutoffs).with_model(self.model.clone());
        if let Some(d) = self.exclude_from {
            cfg = cfg.with_exclude_from(d);
        }
        Ok(cfg)
    }
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}
