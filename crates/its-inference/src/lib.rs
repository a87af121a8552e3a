//! # its-inference
//!
//! Segmented Poisson regression for interrupted time series.
//!
//! This crate provides:
//! - Regressor derivation for two interruption dates
//! - Typed model specifications with optional categorical interaction
//! - Newton–Raphson Poisson fitting with Newey–West or Driscoll–Kraay covariance
//! - Percent-change intervals, counterfactual projection, forest aggregation
//!
//! ## Architecture
//!
//! The fitter is written against the `LogDensityModel` trait from its-core.
//! Every stage is a pure function of its inputs; requests share only the
//! read-only observation table and are fanned out with rayon.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Percent-change intervals and term-name decomposition.
pub mod ci;
/// Counterfactual projections.
pub mod counterfactual;
/// HAC and panel HAC covariance estimators.
pub mod covariance;
/// Model specification and design matrix.
pub mod design;
/// Model fitting.
pub mod fit;
/// Forest aggregation.
pub mod forest;
/// Likelihood-ratio test.
pub mod hypotest;
/// Request pipeline.
pub mod pipeline;
/// Poisson regression model.
pub mod regression;
/// Regressor derivation.
pub mod regressors;

pub use ci::{ChangeType, CiRow, SummaryRow, ci_table, decompose_term_key, percent_change, summary_row};
pub use counterfactual::{GroupSeries, Projection, ProjectionPoint, group_series, project};
pub use covariance::CovarianceKind;
pub use design::{GroupSchema, InteractionGroup, ModelSpec, Term};
pub use fit::{FittedModel, Prediction, fit_poisson};
pub use forest::{ForestEntry, ForestPanel, forest, forest_panels, pcnt_change};
pub use hypotest::{LrTestResult, lr_test};
pub use pipeline::{ItsModel, ModelRequest, get_model};
pub use regression::PoissonRegressionModel;
pub use regressors::{BaseTerm, Harmonic, RATE_SCALE, RegressorRow, RegressorTable, derive_regressors};
