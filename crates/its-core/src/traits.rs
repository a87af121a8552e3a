//! Core traits
//!
//! Inference code (fitters, covariance estimators) depends on this trait
//! rather than on a concrete regression model.

use crate::Result;

/// A model with a twice-differentiable negative log-likelihood.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names, in parameter order.
    fn parameter_names(&self) -> Vec<String>;

    /// Starting point for optimisation.
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-likelihood (up to an additive constant).
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of [`Self::nll`].
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Hessian of [`Self::nll`], row-major `dim × dim`.
    fn hessian_nll(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Per-observation score contributions `∂ log L_i / ∂θ`, row-major `n × dim`.
    fn score_obs(&self, params: &[f64]) -> Result<Vec<f64>>;
}
