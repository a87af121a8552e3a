//! Model fitting: Newton–Raphson maximum likelihood + robust covariance.

use nalgebra::{DMatrix, DVector};
use its_core::{ConvergenceDiagnostics, Error, LogDensityModel, ModelConfig, Result};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::covariance::{CovarianceKind, hac_covariance, hac_groupsum_covariance};
use crate::design::{ModelSpec, Term};
use crate::regression::PoissonRegressionModel;
use crate::regressors::{RegressorRow, RegressorTable};

/// Maximum number of step halvings per Newton iteration.
const MAX_HALVINGS: usize = 40;

/// Two-sided standard-normal critical value for level `alpha`.
pub fn normal_critical_value(alpha: f64) -> Result<f64> {
    if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {alpha}")));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Validation(format!("failed to construct normal distribution: {e}")))?;
    Ok(normal.inverse_cdf(1.0 - 0.5 * alpha))
}

/// Outcome of the Newton iterations.
#[derive(Debug, Clone)]
pub struct NewtonOutcome {
    /// Final parameters.
    pub parameters: Vec<f64>,
    /// Iterations performed.
    pub n_iter: usize,
    /// NLL after each iteration (first entry: starting point).
    pub nll_trace: Vec<f64>,
    /// Converged within budget.
    pub converged: bool,
    /// Largest absolute parameter change in the last iteration.
    pub max_change: f64,
}

fn solve_spd(h: &DMatrix<f64>, g: &DVector<f64>) -> Result<DVector<f64>> {
    if let Some(chol) = h.clone().cholesky() {
        return Ok(chol.solve(g));
    }
    h.clone()
        .lu()
        .solve(g)
        .ok_or_else(|| Error::Computation("information matrix is singular".to_string()))
}

/// Minimise `model.nll` by Newton–Raphson with step halving.
///
/// Converged when the largest absolute parameter change drops below `tol`.
pub fn newton_minimize(
    model: &dyn LogDensityModel,
    max_iter: usize,
    tol: f64,
) -> Result<NewtonOutcome> {
    let p = model.dim();
    let mut params = model.parameter_init();
    let mut nll = model.nll(&params)?;
    let mut nll_trace = vec![nll];
    let mut max_change = f64::INFINITY;

    for iter in 1..=max_iter {
        let g = DVector::from_vec(model.grad_nll(&params)?);
        let h = DMatrix::from_row_slice(p, p, &model.hessian_nll(&params)?);
        let step = solve_spd(&h, &g)?;

        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_HALVINGS {
            let trial: Vec<f64> = params.iter().zip(step.iter()).map(|(b, s)| b - scale * s).collect();
            match model.nll(&trial) {
                Ok(v) if v <= nll + 1e-12 * nll.abs().max(1.0) => {
                    accepted = Some((trial, v));
                    break;
                }
                _ => scale *= 0.5,
            }
        }
        let Some((next, next_nll)) = accepted else {
            return Err(Error::Computation(format!(
                "line search failed to decrease the NLL at iteration {iter}"
            )));
        };

        max_change = next.iter().zip(&params).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        params = next;
        nll = next_nll;
        nll_trace.push(nll);
        tracing::debug!(iter, nll, max_change, scale, "newton step");

        if max_change < tol {
            return Ok(NewtonOutcome {
                parameters: params,
                n_iter: iter,
                nll_trace,
                converged: true,
                max_change,
            });
        }
    }

    Ok(NewtonOutcome { parameters: params, n_iter: max_iter, nll_trace, converged: false, max_change })
}

/// Model-based prediction with a delta-method interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Predicted rate.
    pub predicted: f64,
    /// Standard error of the linear predictor.
    pub se_linear: f64,
    /// Lower bound.
    pub ci_lower: f64,
    /// Upper bound.
    pub ci_upper: f64,
}

impl Prediction {
    /// Multiply point and bounds by `factor` (e.g. per-1,000 reporting).
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            predicted: self.predicted * factor,
            se_linear: self.se_linear,
            ci_lower: self.ci_lower * factor,
            ci_upper: self.ci_upper * factor,
        }
    }
}

/// A converged fit. Read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct FittedModel {
    spec: ModelSpec,
    term_names: Vec<String>,
    coefficients: Vec<f64>,
    /// Row-major `k × k`.
    covariance: Vec<f64>,
    std_errors: Vec<f64>,
    log_likelihood: f64,
    loglik_trace: Vec<f64>,
    converged: bool,
    n_iter: usize,
    n_obs: usize,
    covariance_kind: CovarianceKind,
}

impl FittedModel {
    /// Specification the model was fitted with.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Coefficient names.
    pub fn term_names(&self) -> &[String] {
        &self.term_names
    }

    /// Log-scale coefficients.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.term_names.iter().position(|n| n == name).map(|i| self.coefficients[i])
    }

    /// Robust covariance element `(i, j)`.
    pub fn cov(&self, i: usize, j: usize) -> f64 {
        self.covariance[i * self.coefficients.len() + j]
    }

    /// Robust covariance as a matrix.
    pub fn covariance_matrix(&self) -> DMatrix<f64> {
        let k = self.coefficients.len();
        DMatrix::from_row_slice(k, k, &self.covariance)
    }

    /// Robust standard errors.
    pub fn std_errors(&self) -> &[f64] {
        &self.std_errors
    }

    /// Full log-likelihood at the optimum.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Log-likelihood after each Newton iteration.
    pub fn loglik_trace(&self) -> &[f64] {
        &self.loglik_trace
    }

    /// Always true for a model returned by [`fit_poisson`].
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Newton iterations used.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Observations in the estimation sample.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Covariance estimator used.
    pub fn covariance_kind(&self) -> CovarianceKind {
        self.covariance_kind
    }

    /// Wald intervals `coef ± z·se` on the log scale.
    pub fn conf_int(&self, alpha: f64) -> Result<Vec<(f64, f64)>> {
        let z = normal_critical_value(alpha)?;
        Ok(self
            .coefficients
            .iter()
            .zip(&self.std_errors)
            .map(|(b, se)| (b - z * se, b + z * se))
            .collect())
    }

    fn linear_predictor(&self, x: &[f64]) -> f64 {
        x.iter().zip(&self.coefficients).map(|(a, b)| a * b).sum()
    }

    fn linear_variance(&self, x: &[f64]) -> f64 {
        let k = x.len();
        let mut v = 0.0;
        for i in 0..k {
            if x[i] == 0.0 {
                continue;
            }
            for j in 0..k {
                v += x[i] * self.covariance[i * k + j] * x[j];
            }
        }
        v.max(0.0)
    }

    /// Predicted rate (unit exposure) with interval, one per row of `table`.
    ///
    /// `table` may be any regressor table over the same specification,
    /// including counterfactual copies.
    pub fn predict(&self, table: &RegressorTable, alpha: f64) -> Result<Vec<Prediction>> {
        let z = normal_critical_value(alpha)?;
        Ok(table.rows().iter().map(|row| self.predict_row(row, z)).collect())
    }

    fn predict_row(&self, row: &RegressorRow, z: f64) -> Prediction {
        let x = self.spec.design_row(row);
        let eta = self.linear_predictor(&x);
        let se = self.linear_variance(&x).sqrt();
        Prediction {
            predicted: eta.exp(),
            se_linear: se,
            ci_lower: (eta - z * se).exp(),
            ci_upper: (eta + z * se).exp(),
        }
    }

    /// Rate from the intervention-free terms only (intercept, trend, level, season).
    pub fn baseline_trend(&self, table: &RegressorTable) -> Vec<f64> {
        table
            .rows()
            .iter()
            .map(|row| {
                self.spec
                    .terms()
                    .iter()
                    .zip(&self.coefficients)
                    .filter(|(t, _)| t.is_baseline())
                    .map(|(t, b)| t.value(row) * b)
                    .sum::<f64>()
                    .exp()
            })
            .collect()
    }
}

/// Fit the Poisson rate model for `spec` on the complete rows of `table`.
///
/// Rows with a missing numerator, denominator or value are excluded from
/// the estimation sample. An unconverged fit is an
/// [`Error::Convergence`] carrying the iteration diagnostics.
pub fn fit_poisson(
    spec: ModelSpec,
    table: &RegressorTable,
    kind: CovarianceKind,
    config: &ModelConfig,
) -> Result<FittedModel> {
    config.validate()?;
    let rows: Vec<&RegressorRow> = table.estimation_rows().collect();
    let k = spec.dim();
    if rows.len() <= k {
        return Err(Error::Validation(format!(
            "estimation sample has {} rows for {} parameters",
            rows.len(),
            k
        )));
    }

    let mut y = Vec::with_capacity(rows.len());
    let mut exposure = Vec::with_capacity(rows.len());
    for r in &rows {
        // estimation_rows() guarantees both are present.
        y.push(r.numerator.unwrap_or_default());
        exposure.push(r.denominator.unwrap_or(1.0));
    }
    let x = spec.design_matrix(rows.iter().copied());
    let term_names = spec.term_names();
    let mut model = PoissonRegressionModel::new(x, y, &exposure, term_names.clone())?;
    if let Some(idx) = spec.terms().iter().position(|t| *t == Term::Intercept) {
        model = model.with_intercept_at(idx);
    }

    let outcome = newton_minimize(&model, config.max_iter, config.tol)?;
    let ll_offset = model.loglike(&outcome.parameters)? + model.nll(&outcome.parameters)?;
    let loglik_trace: Vec<f64> = outcome.nll_trace.iter().map(|nll| ll_offset - nll).collect();

    if !outcome.converged {
        tracing::warn!(n_iter = outcome.n_iter, max_change = outcome.max_change, "fit did not converge");
        return Err(Error::Convergence(ConvergenceDiagnostics {
            n_iter: outcome.n_iter,
            max_iter: config.max_iter,
            loglik_trace,
            max_param_change: outcome.max_change,
        }));
    }

    let beta = &outcome.parameters;
    let info = DMatrix::from_row_slice(k, k, &model.hessian_nll(beta)?);
    let bread_inv = info
        .try_inverse()
        .ok_or_else(|| Error::Computation("information matrix is singular".to_string()))?;
    let scores = DMatrix::from_row_slice(rows.len(), k, &model.score_obs(beta)?);

    let cov = match kind {
        CovarianceKind::Hac { max_lags } => hac_covariance(&scores, &bread_inv, max_lags)?,
        CovarianceKind::HacGroupSum { max_lags } => {
            let periods: Vec<i32> = rows.iter().map(|r| r.time).collect();
            hac_groupsum_covariance(&scores, &bread_inv, &periods, max_lags)?
        }
    };

    let std_errors: Vec<f64> = (0..k).map(|j| cov[(j, j)].max(0.0).sqrt()).collect();
    let covariance: Vec<f64> = (0..k).flat_map(|i| (0..k).map(move |j| (i, j))).map(|ij| cov[ij]).collect();
    let log_likelihood = model.loglike(beta)?;

    tracing::info!(
        n_obs = rows.len(),
        n_params = k,
        loglik = log_likelihood,
        n_iter = outcome.n_iter,
        "fit complete"
    );

    Ok(FittedModel {
        spec,
        term_names,
        coefficients: outcome.parameters,
        covariance,
        std_errors,
        log_likelihood,
        loglik_trace,
        converged: true,
        n_iter: outcome.n_iter,
        n_obs: rows.len(),
        covariance_kind: kind,
    })
}
