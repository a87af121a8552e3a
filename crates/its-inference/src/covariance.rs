//! Heteroskedasticity- and autocorrelation-robust sandwich covariance.
//!
//! Both estimators have the form `V = H⁻¹ S H⁻¹`, where `H` is the observed
//! information and `S` a Bartlett-weighted sum of lagged score
//! cross-products:
//!
//! `S = Γ₀ + Σ_{l=1..L} w_l (Γ_l + Γ_lᵀ)`, `w_l = 1 − l/(L+1)`.
//!
//! - [`hac_covariance`] (Newey–West) uses per-observation scores in time order.
//! - [`hac_groupsum_covariance`] (Driscoll–Kraay) first sums scores over all
//!   groups observed in the same period, which makes it robust to
//!   cross-sectional correlation between groups as well as serial correlation.
//!
//! # References
//!
//! - Newey & West (1987), "A simple, positive semi-definite, heteroskedasticity
//!   and autocorrelation consistent covariance matrix."
//! - Driscoll & Kraay (1998), "Consistent covariance matrix estimation with
//!   spatially dependent panel data."

use std::collections::BTreeSet;

use nalgebra::DMatrix;
use its_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Covariance estimator attached to a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CovarianceKind {
    /// Single series: Newey–West over observations.
    Hac {
        /// Maximum lag.
        max_lags: usize,
    },
    /// Panel: Newey–West over per-period score sums.
    HacGroupSum {
        /// Maximum lag.
        max_lags: usize,
    },
}

/// Bartlett kernel weights `w_0..=w_L`.
pub fn bartlett_weights(max_lags: usize) -> Vec<f64> {
    let denom = (max_lags + 1) as f64;
    (0..=max_lags).map(|l| 1.0 - l as f64 / denom).collect()
}

/// `S = w_0 XᵀX + Σ_l w_l (X_{l:}ᵀ X_{:-l} + transpose)` for rows of `x` in time order.
pub fn hac_meat(x: &DMatrix<f64>, max_lags: usize) -> DMatrix<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let weights = bartlett_weights(max_lags);

    let mut meat = x.transpose() * x * weights[0];
    for (lag, &w) in weights.iter().enumerate().skip(1) {
        if lag >= n {
            break;
        }
        let lead = x.rows(lag, n - lag);
        let lagged = x.rows(0, n - lag);
        let s = lead.transpose() * lagged;
        meat += (&s + s.transpose()) * w;
    }
    debug_assert_eq!(meat.nrows(), p);
    meat
}

/// Sum score rows sharing a period id.
///
/// Output row `i` holds period `first + i`; periods with no observations
/// between the first and last one are zero rows, so lags count calendar
/// periods rather than observed ones.
pub fn group_sums(scores: &DMatrix<f64>, period_ids: &[i32]) -> Result<DMatrix<f64>> {
    if period_ids.len() != scores.nrows() {
        return Err(Error::Validation(format!(
            "period_ids length ({}) != n ({})",
            period_ids.len(),
            scores.nrows()
        )));
    }
    let p = scores.ncols();
    let (Some(&first), Some(&last)) = (period_ids.iter().min(), period_ids.iter().max()) else {
        return Ok(DMatrix::zeros(0, p));
    };
    let n_periods = usize::try_from(last - first)
        .map_err(|_| Error::Computation("period range overflow".into()))?
        + 1;
    let mut sums = DMatrix::zeros(n_periods, p);
    for (i, &t) in period_ids.iter().enumerate() {
        let row = (t - first) as usize;
        for j in 0..p {
            sums[(row, j)] += scores[(i, j)];
        }
    }
    Ok(sums)
}

fn sandwich(bread_inv: &DMatrix<f64>, meat: &DMatrix<f64>) -> DMatrix<f64> {
    let v = bread_inv * meat * bread_inv;
    // Symmetrize to remove round-off asymmetry.
    (&v + v.transpose()) * 0.5
}

fn check_shapes(scores: &DMatrix<f64>, bread_inv: &DMatrix<f64>) -> Result<()> {
    let p = scores.ncols();
    if bread_inv.nrows() != p || bread_inv.ncols() != p {
        return Err(Error::Validation(format!(
            "bread has shape {}x{}, expected {p}x{p}",
            bread_inv.nrows(),
            bread_inv.ncols()
        )));
    }
    if scores.nrows() == 0 {
        return Err(Error::Validation("scores must be non-empty".into()));
    }
    Ok(())
}

/// Newey–West covariance from per-observation scores (rows in time order).
pub fn hac_covariance(
    scores: &DMatrix<f64>,
    bread_inv: &DMatrix<f64>,
    max_lags: usize,
) -> Result<DMatrix<f64>> {
    check_shapes(scores, bread_inv)?;
    Ok(sandwich(bread_inv, &hac_meat(scores, max_lags)))
}

/// Driscoll–Kraay covariance: HAC over per-period score sums.
///
/// Applies the cluster small-sample correction `T/(T−1) · (n−1)/(n−k)`
/// with `T` observed periods, `n` observations and `k` parameters.
pub fn hac_groupsum_covariance(
    scores: &DMatrix<f64>,
    bread_inv: &DMatrix<f64>,
    period_ids: &[i32],
    max_lags: usize,
) -> Result<DMatrix<f64>> {
    check_shapes(scores, bread_inv)?;
    let sums = group_sums(scores, period_ids)?;
    let cov = sandwich(bread_inv, &hac_meat(&sums, max_lags));

    let t = period_ids.iter().collect::<BTreeSet<_>>().len() as f64;
    let n = scores.nrows() as f64;
    let k = scores.ncols() as f64;
    let correction = if t > 1.0 && n > k { (t / (t - 1.0)) * ((n - 1.0) / (n - k)) } else { 1.0 };
    Ok(cov * correction)
}
