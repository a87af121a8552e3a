//! Error types for interrupted time-series analysis

use std::fmt;

use thiserror::Error;

/// Analysis error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller or configuration mistake (unmatched pattern, missing cutoff,
    /// degenerate interaction group, unknown reference level).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Maximum-likelihood fit did not converge within its iteration budget
    #[error("Convergence error: {0}")]
    Convergence(ConvergenceDiagnostics),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Diagnostic summary attached to a failed fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceDiagnostics {
    /// Iterations performed.
    pub n_iter: usize,
    /// Iteration budget.
    pub max_iter: usize,
    /// Log-likelihood after each iteration (first entry is the starting point).
    pub loglik_trace: Vec<f64>,
    /// Largest absolute parameter change in the final iteration.
    pub max_param_change: f64,
}

impl fmt::Display for ConvergenceDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.loglik_trace.last().copied().unwrap_or(f64::NAN);
        write!(
            f,
            "failed to converge after {}/{} iterations (loglik={:.6}, max |dbeta|={:.3e})",
            self.n_iter, self.max_iter, last, self.max_param_change
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
