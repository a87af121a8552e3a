//! Analysis configuration value types.
//!
//! All values are immutable once built and are threaded explicitly through
//! every stage; nothing here is process-wide state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The two interruption dates (start-of-month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CutoffsRaw")]
pub struct Cutoffs {
    first: NaiveDate,
    second: NaiveDate,
}

#[derive(Deserialize)]
struct CutoffsRaw {
    first: NaiveDate,
    second: NaiveDate,
}

impl TryFrom<CutoffsRaw> for Cutoffs {
    type Error = Error;

    fn try_from(raw: CutoffsRaw) -> Result<Self> {
        Cutoffs::new(raw.first, raw.second)
    }
}

impl Cutoffs {
    /// Create cutoffs; `first` must precede `second`.
    pub fn new(first: NaiveDate, second: NaiveDate) -> Result<Self> {
        if first >= second {
            return Err(Error::Configuration(format!(
                "first cutoff ({first}) must precede second cutoff ({second})"
            )));
        }
        Ok(Self { first, second })
    }

    /// First interruption date.
    pub fn first(&self) -> NaiveDate {
        self.first
    }

    /// Second interruption date.
    pub fn second(&self) -> NaiveDate {
        self.second
    }
}

/// Fitting and reporting knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Maximum lag of the Bartlett-weighted HAC covariance.
    pub max_lags: usize,
    /// Newton iteration budget; the only timeout-like control.
    pub max_iter: usize,
    /// Convergence tolerance on the largest absolute parameter change.
    pub tol: f64,
    /// Two-sided interval level.
    pub alpha: f64,
    /// Decimal places in formatted percent-change strings.
    pub round_to: usize,
    /// Append the `s1`/`c1` annual harmonic pair.
    pub harmonics: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { max_lags: 2, max_iter: 200, tol: 1e-8, alpha: 0.05, round_to: 2, harmonics: true }
    }
}

impl ModelConfig {
    /// Reject values no fit could honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(Error::Configuration("max_iter must be >= 1".into()));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(Error::Configuration(format!("tol must be positive, got {}", self.tol)));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Configuration(format!("alpha must be in (0, 1), got {}", self.alpha)));
        }
        Ok(())
    }
}

/// Everything one analysis request needs besides the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Interruption dates.
    pub cutoffs: Cutoffs,
    /// Rows dated on or after this month are an incomplete trailing period
    /// and are dropped before modelling.
    #[serde(default)]
    pub exclude_from: Option<NaiveDate>,
    /// Fitting options.
    #[serde(default)]
    pub model: ModelConfig,
}

impl AnalysisConfig {
    /// Config with default model options and no excluded period.
    pub fn new(cutoffs: Cutoffs) -> Self {
        Self { cutoffs, exclude_from: None, model: ModelConfig::default() }
    }

    /// Set the start of the trailing partial period.
    pub fn with_exclude_from(mut self, date: NaiveDate) -> Self {
        self.exclude_from = Some(date);
        self
    }

    /// Replace the model options.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }
}
