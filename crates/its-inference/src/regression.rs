//! Poisson regression with log link and exposure offset.
//!
//! Model:
//! `y_i ~ Poisson(exp(eta_i))`, `eta_i = X_i * beta + log(exposure_i)`
//!
//! NLL (up to additive constant): `sum_i exp(eta_i) - y_i * eta_i`

use its_core::{Error, LogDensityModel, Result};
use statrs::function::gamma::ln_gamma;

#[inline]
fn row_dot(x_row: &[f64], beta: &[f64]) -> f64 {
    debug_assert_eq!(x_row.len(), beta.len());
    x_row.iter().zip(beta).map(|(&x, &b)| x * b).sum()
}

/// Dense row-major design matrix.
#[derive(Debug, Clone)]
struct DenseX {
    n: usize,
    p: usize,
    data: Vec<f64>, // length n*p, row-major
}

impl DenseX {
    fn from_rows(x: Vec<Vec<f64>>) -> Result<Self> {
        let n = x.len();
        let p = x.first().map(|r| r.len()).unwrap_or(0);
        if n == 0 || p == 0 {
            return Err(Error::Validation("X must be non-empty (n>0, p>0)".to_string()));
        }
        let mut data = Vec::with_capacity(n * p);
        for (i, row) in x.into_iter().enumerate() {
            if row.len() != p {
                return Err(Error::Validation(format!(
                    "X must be rectangular: row {} has len {}, expected {}",
                    i,
                    row.len(),
                    p
                )));
            }
            for v in row {
                if !v.is_finite() {
                    return Err(Error::Validation("X must contain only finite values".to_string()));
                }
                data.push(v);
            }
        }
        Ok(Self { n, p, data })
    }

    #[inline]
    fn row(&self, i: usize) -> &[f64] {
        let start = i * self.p;
        &self.data[start..start + self.p]
    }
}

/// Poisson rate regression: counts `y`, exposures entering as `log` offset.
#[derive(Debug, Clone)]
pub struct PoissonRegressionModel {
    x: DenseX,
    y: Vec<f64>,
    offset: Vec<f64>,
    names: Vec<String>,
    intercept: Option<usize>,
}

impl PoissonRegressionModel {
    /// Create a model from row-wise `X`, counts `y` and positive `exposure`.
    ///
    /// `names` labels the columns of `X`.
    pub fn new(
        x: Vec<Vec<f64>>,
        y: Vec<f64>,
        exposure: &[f64],
        names: Vec<String>,
    ) -> Result<Self> {
        let x = DenseX::from_rows(x)?;
        if y.len() != x.n {
            return Err(Error::Validation(format!(
                "y has wrong length: expected n={}, got {}",
                x.n,
                y.len()
            )));
        }
        if exposure.len() != x.n {
            return Err(Error::Validation(format!(
                "exposure has wrong length: expected n={}, got {}",
                x.n,
                exposure.len()
            )));
        }
        if names.len() != x.p {
            return Err(Error::Validation(format!(
                "expected {} column names, got {}",
                x.p,
                names.len()
            )));
        }
        if y.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::Validation("y must contain non-negative finite counts".to_string()));
        }
        if exposure.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::Validation("exposure must be positive and finite".to_string()));
        }
        let offset = exposure.iter().map(|e| e.ln()).collect();
        Ok(Self { x, y, offset, names, intercept: None })
    }

    /// Mark column `idx` as the constant; it is started at the pooled log rate.
    pub fn with_intercept_at(mut self, idx: usize) -> Self {
        if idx < self.x.p {
            self.intercept = Some(idx);
        }
        self
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.x.n
    }

    #[inline]
    fn eta(&self, i: usize, params: &[f64]) -> f64 {
        row_dot(self.x.row(i), params) + self.offset[i]
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.x.p {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.x.p,
                params.len()
            )));
        }
        if params.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("params must contain only finite values".to_string()));
        }
        Ok(())
    }

    /// Full log-likelihood including the `-ln(y!)` constant.
    pub fn loglike(&self, params: &[f64]) -> Result<f64> {
        let nll = self.nll(params)?;
        let constant: f64 = self.y.iter().map(|&y| ln_gamma(y + 1.0)).sum();
        Ok(-nll - constant)
    }
}

impl LogDensityModel for PoissonRegressionModel {
    fn dim(&self) -> usize {
        self.x.p
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        let mut init = vec![0.0; self.x.p];
        if let Some(idx) = self.intercept {
            let total_y: f64 = self.y.iter().sum();
            let total_e: f64 = self.offset.iter().map(|o| o.exp()).sum();
            if total_y > 0.0 && total_e > 0.0 {
                init[idx] = (total_y / total_e).ln();
            }
        }
        init
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.check_params(params)?;
        let mut nll = 0.0;
        for i in 0..self.x.n {
            let eta = self.eta(i, params);
            let mu = eta.exp();
            nll += mu - self.y[i] * eta;
        }
        if !nll.is_finite() {
            return Err(Error::Computation("Poisson NLL is not finite".to_string()));
        }
        Ok(nll)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_params(params)?;
        let mut grad = vec![0.0; self.x.p];
        for i in 0..self.x.n {
            let mu = self.eta(i, params).exp();
            let err = mu - self.y[i];
            for (g, &xij) in grad.iter_mut().zip(self.x.row(i)) {
                *g += err * xij;
            }
        }
        Ok(grad)
    }

    fn hessian_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_params(params)?;
        let p = self.x.p;
        let mut h = vec![0.0; p * p];
        for i in 0..self.x.n {
            let mu = self.eta(i, params).exp();
            let row = self.x.row(i);
            for a in 0..p {
                let wa = mu * row[a];
                if wa == 0.0 {
                    continue;
                }
                for b in a..p {
                    h[a * p + b] += wa * row[b];
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                h[a * p + b] = h[b * p + a];
            }
        }
        Ok(h)
    }

    fn score_obs(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_params(params)?;
        let p = self.x.p;
        let mut out = vec![0.0; self.x.n * p];
        for i in 0..self.x.n {
            let resid = self.y[i] - self.eta(i, params).exp();
            for (o, &xij) in out[i * p..(i + 1) * p].iter_mut().zip(self.x.row(i)) {
                *o = resid * xij;
            }
        }
        Ok(out)
    }
}
