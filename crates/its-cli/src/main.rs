//! Interrupted time-series CLI

mod config;
mod input;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use its_core::{AnalysisConfig, ModelConfig, ObservationTable};
use its_inference::{
    ModelRequest, ci_table, forest, forest_panels, get_model, group_series,
    hypotest::HARMONIC_LR_DF, lr_test, project, summary_row,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::config::{ForestConfig, NamedRequest, RunConfig, TableConfig, read_run_config};
use crate::report::{ModelReport, slug};

#[derive(Parser)]
#[command(name = "its-cli")]
#[command(about = "Interrupted time-series analysis of monthly indicator rates")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Joined monthly table (CSV)
    #[arg(long)]
    input_file: PathBuf,

    /// Output directory
    #[arg(long)]
    output_dir: PathBuf,

    /// Run configuration (YAML, or JSON with a .json extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = auto)
    #[arg(long, default_value = "0")]
    threads: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    if cli.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global();
    }

    let (table, quality) = input::read_table(&cli.input_file)?;
    let run = match &cli.config {
        Some(path) => read_run_config(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => RunConfig::for_table(&table),
    };
    let analysis = run.analysis_config()?;

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;
    report::write_json(&cli.output_dir.join("data_quality.json"), &quality)?;

    cmd_models(&table, &run.models, &analysis, &cli.output_dir)?;
    for f in &run.forests {
        cmd_forest(&table, f, &analysis, &cli.output_dir)?;
    }
    for t in &run.tables {
        cmd_table(&table, t, &analysis, &cli.output_dir)?;
    }
    tracing::info!(
        models = run.models.len(),
        forests = run.forests.len(),
        tables = run.tables.len(),
        "run complete"
    );
    Ok(())
}

fn cmd_models(
    table: &ObservationTable,
    models: &[NamedRequest],
    analysis: &AnalysisConfig,
    out_dir: &Path,
) -> Result<()> {
    if models.is_empty() {
        return Ok(());
    }
    let dir = out_dir.join("models");
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    models.par_iter().map(|m| write_model(table, m, analysis, &dir)).collect::<Result<Vec<()>>>()?;
    Ok(())
}

fn write_model(
    table: &ObservationTable,
    named: &NamedRequest,
    analysis: &AnalysisConfig,
    dir: &Path,
) -> Result<()> {
    let its = get_model(table, &named.request, analysis)
        .with_context(|| format!("model '{}' failed", named.name))?;
    let alpha = analysis.model.alpha;
    let ci = ci_table(&its.model, alpha, analysis.model.round_to)?;
    let projection = project(&its.model, &its.data, alpha)?;
    let groups = group_series(&its.model, &its.data)?;
    let seasonality_lr = if analysis.model.harmonics {
        seasonality_test(table, &named.request, analysis, &its.model)
    } else {
        None
    };

    let stem = slug(&named.name);
    let report = ModelReport {
        name: &named.name,
        pattern: &named.request.pattern,
        category: its.category.as_deref(),
        fit: &its.model,
        ci: &ci,
        projection: &projection,
        groups: &groups,
        seasonality_lr,
    };
    report::write_json(&dir.join(format!("{stem}.json")), &report)?;
    report::write_ci_csv(&dir.join(format!("{stem}_ci.csv")), &ci)?;
    tracing::info!(name = %named.name, n_obs = its.model.n_obs(), "model written");
    Ok(())
}

/// Likelihood-ratio test of the harmonic terms; `None` if the reduced fit fails.
fn seasonality_test(
    table: &ObservationTable,
    request: &ModelRequest,
    analysis: &AnalysisConfig,
    full: &its_inference::FittedModel,
) -> Option<its_inference::LrTestResult> {
    let reduced_cfg = analysis
        .clone()
        .with_model(ModelConfig { harmonics: false, ..analysis.model.clone() });
    match get_model(table, request, &reduced_cfg).and_then(|m| lr_test(&m.model, full, HARMONIC_LR_DF)) {
        Ok(lr) => Some(lr),
        Err(e) => {
            tracing::warn!(pattern = %request.pattern, error = %e, "seasonality test skipped");
            None
        }
    }
}

fn cmd_forest(
    table: &ObservationTable,
    cfg: &ForestConfig,
    analysis: &AnalysisConfig,
    out_dir: &Path,
) -> Result<()> {
    let entries = forest(table, &cfg.requests, analysis)
        .with_context(|| format!("forest '{}' failed", cfg.name))?;
    let panels = forest_panels(&entries, &cfg.columns);
    report::write_forest(out_dir, &cfg.name, &entries, &panels)?;
    tracing::info!(name = %cfg.name, entries = entries.len(), panels = panels.len(), "forest written");
    Ok(())
}

fn cmd_table(
    table: &ObservationTable,
    cfg: &TableConfig,
    analysis: &AnalysisConfig,
    out_dir: &Path,
) -> Result<()> {
    let rows = cfg
        .rows
        .par_iter()
        .map(|row| {
            let its = get_model(table, &ModelRequest::new(row.pattern.clone()), analysis)?;
            summary_row(&its.model, row.label.clone(), analysis.model.alpha, analysis.model.round_to)
        })
        .collect::<its_core::Result<Vec<_>>>()
        .with_context(|| format!("table '{}' failed", cfg.name))?;
    let path = out_dir.join(format!("table_{}.csv", slug(&cfg.name)));
    report::write_summary_table(&path, &rows)?;
    Ok(())
}
