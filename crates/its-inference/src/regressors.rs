//! Segmented-regression regressors derived from a monthly series.
//!
//! For a subset of observations and two cutoff dates this computes, per row:
//! - `time`: months since January of the first observed year (1-based)
//! - `step`/`step2`: 1 once `time` exceeds the cutoff month index
//! - `slope`/`slope2`: `max(time − cutoff month index, 0)`
//! - `mar20`/`april20`: first and second month after the first cutoff
//! - `s1`/`c1`: one annual harmonic pair
//!
//! The cutoff month index is `time − 1` of the row dated exactly on the
//! cutoff, i.e. the last pre-intervention month.

use std::collections::HashSet;
use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate};
use its_core::{Cutoffs, Error, Observation, Result};
use serde::{Deserialize, Serialize};

/// Scale applied to `value` for reporting (rate per 1,000).
pub const RATE_SCALE: f64 = 1000.0;

/// Harmonic period in months.
const SEASONAL_PERIOD: f64 = 12.0;

/// Trend and intervention regressors present in every specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseTerm {
    /// Months since the start of the first observed year.
    Time,
    /// Level shift after the first cutoff.
    Step,
    /// Trend change after the first cutoff.
    Slope,
    /// First month after the first cutoff.
    Mar20,
    /// Second month after the first cutoff.
    April20,
    /// Level shift after the second cutoff.
    Step2,
    /// Trend change after the second cutoff.
    Slope2,
}

impl BaseTerm {
    /// Specification order.
    pub const ALL: [BaseTerm; 7] = [
        BaseTerm::Time,
        BaseTerm::Step,
        BaseTerm::Slope,
        BaseTerm::Mar20,
        BaseTerm::April20,
        BaseTerm::Step2,
        BaseTerm::Slope2,
    ];

    /// Terms crossed with the grouping variable in panel specifications.
    pub const INTERACTED: [BaseTerm; 4] =
        [BaseTerm::Step, BaseTerm::Slope, BaseTerm::Step2, BaseTerm::Slope2];

    /// Regressor name.
    pub fn name(self) -> &'static str {
        match self {
            BaseTerm::Time => "time",
            BaseTerm::Step => "step",
            BaseTerm::Slope => "slope",
            BaseTerm::Mar20 => "mar20",
            BaseTerm::April20 => "april20",
            BaseTerm::Step2 => "step2",
            BaseTerm::Slope2 => "slope2",
        }
    }

    /// Everything except the secular trend is an intervention regressor.
    pub fn is_intervention(self) -> bool {
        self != BaseTerm::Time
    }
}

/// Annual seasonal covariates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Harmonic {
    /// `sin(2πk/12)`
    S1,
    /// `cos(2πk/12)`
    C1,
}

impl Harmonic {
    /// Both harmonics, in specification order.
    pub const ALL: [Harmonic; 2] = [Harmonic::S1, Harmonic::C1];

    /// Regressor name.
    pub fn name(self) -> &'static str {
        match self {
            Harmonic::S1 => "s1",
            Harmonic::C1 => "c1",
        }
    }
}

/// One observation with its derived regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorRow {
    /// Start-of-month date.
    pub date: NaiveDate,
    /// Series identifier.
    pub name: String,
    /// Interaction-group level (after any relabelling).
    pub group: Option<String>,
    /// Paired category label.
    pub category: Option<String>,
    /// Event count.
    pub numerator: Option<f64>,
    /// Exposure count.
    pub denominator: Option<f64>,
    /// Raw rate.
    pub value: Option<f64>,
    /// `value` per 1,000.
    pub rate: Option<f64>,
    /// 1-based month index.
    pub time: i32,
    /// Level-shift indicator, first cutoff.
    pub step: f64,
    /// Trend-change ramp, first cutoff.
    pub slope: f64,
    /// First-month transient dummy.
    pub mar20: f64,
    /// Second-month transient dummy.
    pub april20: f64,
    /// Level-shift indicator, second cutoff.
    pub step2: f64,
    /// Trend-change ramp, second cutoff.
    pub slope2: f64,
    /// Seasonal sine.
    pub s1: f64,
    /// Seasonal cosine.
    pub c1: f64,
}

impl RegressorRow {
    /// Value of a trend/intervention regressor.
    pub fn base(&self, term: BaseTerm) -> f64 {
        match term {
            BaseTerm::Time => f64::from(self.time),
            BaseTerm::Step => self.step,
            BaseTerm::Slope => self.slope,
            BaseTerm::Mar20 => self.mar20,
            BaseTerm::April20 => self.april20,
            BaseTerm::Step2 => self.step2,
            BaseTerm::Slope2 => self.slope2,
        }
    }

    /// Value of a seasonal regressor.
    pub fn harmonic(&self, h: Harmonic) -> f64 {
        match h {
            Harmonic::S1 => self.s1,
            Harmonic::C1 => self.c1,
        }
    }

    fn zero(&mut self, term: BaseTerm) {
        match term {
            // The trend is never an intervention; leave it alone.
            BaseTerm::Time => {}
            BaseTerm::Step => self.step = 0.0,
            BaseTerm::Slope => self.slope = 0.0,
            BaseTerm::Mar20 => self.mar20 = 0.0,
            BaseTerm::April20 => self.april20 = 0.0,
            BaseTerm::Step2 => self.step2 = 0.0,
            BaseTerm::Slope2 => self.slope2 = 0.0,
        }
    }

    /// Row belongs to the estimation sample.
    pub fn is_complete(&self) -> bool {
        matches!(
            (self.numerator, self.denominator, self.value),
            (Some(n), Some(d), Some(_)) if n >= 0.0 && d > 0.0
        )
    }
}

/// Regressor table for one analysis request, sorted by `(time, group)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressorTable {
    rows: Vec<RegressorRow>,
    cutoffs: Cutoffs,
    cutoff_index: (i32, i32),
    levels: Vec<String>,
}

impl RegressorTable {
    /// All rows.
    pub fn rows(&self) -> &[RegressorRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cutoff dates used for derivation.
    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    /// Last pre-intervention month index for the first cutoff.
    pub fn first_cutoff_index(&self) -> i32 {
        self.cutoff_index.0
    }

    /// Last pre-intervention month index for the second cutoff.
    pub fn second_cutoff_index(&self) -> i32 {
        self.cutoff_index.1
    }

    /// Rows entering the estimation sample.
    pub fn estimation_rows(&self) -> impl Iterator<Item = &RegressorRow> {
        self.rows.iter().filter(|r| r.is_complete())
    }

    /// Distinct group levels in the order first observed in the input
    /// (rows without a level skipped).
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Copy of the table with the given regressors set to zero.
    pub fn with_zeroed(&self, terms: &[BaseTerm]) -> Self {
        let mut out = self.clone();
        for row in &mut out.rows {
            for &t in terms {
                row.zero(t);
            }
        }
        out
    }
}

fn month_index(date: NaiveDate, min_year: i32) -> i32 {
    12 * (date.year() - min_year) + date.month() as i32
}

fn cutoff_month_index(rows: &[Observation], cutoff: NaiveDate, min_year: i32) -> Result<i32> {
    rows.iter()
        .find(|r| r.date == cutoff)
        .map(|r| month_index(r.date, min_year) - 1)
        .ok_or_else(|| {
            Error::Configuration(format!("cutoff date {cutoff} is not present in the series"))
        })
}

/// Derive the segmented-regression regressors for one analysis subset.
///
/// `group_column` selects the `group_N`/`category_N` pair whose labels are
/// carried onto each row (the interaction group in panel analyses). Each
/// `(group, time)` pair must occur at most once.
pub fn derive_regressors(
    observations: &[Observation],
    group_column: Option<usize>,
    cutoffs: &Cutoffs,
) -> Result<RegressorTable> {
    let min_year = observations
        .iter()
        .map(|r| r.date.year())
        .min()
        .ok_or_else(|| Error::Validation("cannot derive regressors from an empty series".into()))?;

    let cut1 = cutoff_month_index(observations, cutoffs.first(), min_year)?;
    let cut2 = cutoff_month_index(observations, cutoffs.second(), min_year)?;

    let label_idx = group_column.unwrap_or(0);
    let mut rows: Vec<RegressorRow> = observations
        .iter()
        .map(|obs| {
            let time = month_index(obs.date, min_year);
            RegressorRow {
                date: obs.date,
                name: obs.name.clone(),
                group: group_column.and_then(|idx| obs.group(idx)).map(str::to_string),
                category: obs.category(label_idx).map(str::to_string),
                numerator: obs.numerator,
                denominator: obs.denominator,
                value: obs.value,
                rate: obs.value.map(|v| RATE_SCALE * v),
                time,
                step: if time > cut1 { 1.0 } else { 0.0 },
                slope: f64::from((time - cut1).max(0)),
                mar20: if time == cut1 + 1 { 1.0 } else { 0.0 },
                april20: if time == cut1 + 2 { 1.0 } else { 0.0 },
                step2: if time > cut2 { 1.0 } else { 0.0 },
                slope2: f64::from((time - cut2).max(0)),
                s1: 0.0,
                c1: 0.0,
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let levels: Vec<String> = rows
        .iter()
        .filter_map(|r| r.group.as_deref())
        .filter(|g| seen.insert(*g))
        .map(str::to_string)
        .collect();

    rows.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.group.cmp(&b.group)));

    for pair in rows.windows(2) {
        if pair[0].time == pair[1].time && pair[0].group == pair[1].group {
            return Err(Error::Validation(format!(
                "duplicate observation for time {} (date {}, group {:?})",
                pair[1].time, pair[1].date, pair[1].group
            )));
        }
    }

    // Phase is anchored to January of the first observed year.
    for row in &mut rows {
        let k = f64::from(row.time - 1);
        row.s1 = (2.0 * PI * k / SEASONAL_PERIOD).sin();
        row.c1 = (2.0 * PI * k / SEASONAL_PERIOD).cos();
    }

    tracing::debug!(
        n_rows = rows.len(),
        first_cutoff_index = cut1,
        second_cutoff_index = cut2,
        "derived regressors"
    );

    Ok(RegressorTable { rows, cutoffs: *cutoffs, cutoff_index: (cut1, cut2), levels })
}
