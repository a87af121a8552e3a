//! Likelihood-ratio test between nested fits.

use its_core::{Error, Result};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::fit::FittedModel;

/// Degrees of freedom used when comparing models with and without harmonics.
pub const HARMONIC_LR_DF: f64 = 2.0;

/// Result of a likelihood-ratio test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LrTestResult {
    /// `−2 (ℓ_smaller − ℓ_bigger)`.
    pub statistic: f64,
    /// Degrees of freedom of the reference χ².
    pub df: f64,
    /// Upper-tail probability.
    pub p_value: f64,
}

/// χ² survival probability of the likelihood-ratio statistic.
pub fn lr_statistic_pvalue(ll_smaller: f64, ll_bigger: f64, df: f64) -> Result<LrTestResult> {
    if !(df.is_finite() && df > 0.0) {
        return Err(Error::Validation(format!("df must be positive, got {df}")));
    }
    let statistic = -2.0 * (ll_smaller - ll_bigger);
    if !statistic.is_finite() {
        return Err(Error::Computation("likelihood-ratio statistic is not finite".to_string()));
    }
    let chi2 = ChiSquared::new(df)
        .map_err(|e| Error::Validation(format!("failed to construct chi-squared distribution: {e}")))?;
    // A negative statistic means the smaller model fits better; no evidence against it.
    let p_value = if statistic <= 0.0 { 1.0 } else { chi2.sf(statistic) };
    Ok(LrTestResult { statistic, df, p_value })
}

/// Compare a nested `smaller` model against `bigger`.
pub fn lr_test(smaller: &FittedModel, bigger: &FittedModel, df: f64) -> Result<LrTestResult> {
    lr_statistic_pvalue(smaller.log_likelihood(), bigger.log_likelihood(), df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_df_survival_is_exponential() {
        // χ²(2) survival is exp(−x/2).
        let r = lr_statistic_pvalue(-105.0, -102.0, 2.0).unwrap();
        assert_relative_eq!(r.statistic, 6.0, epsilon = 1e-12);
        assert_relative_eq!(r.p_value, (-3.0_f64).exp(), epsilon = 1e-10);
    }

    #[test]
    fn test_better_smaller_model_has_unit_pvalue() {
        let r = lr_statistic_pvalue(-100.0, -101.0, 2.0).unwrap();
        assert_eq!(r.p_value, 1.0);
    }

    #[test]
    fn test_invalid_df() {
        assert!(lr_statistic_pvalue(-1.0, -1.0, 0.0).is_err());
    }
}
