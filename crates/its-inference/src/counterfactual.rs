//! Counterfactual projection: the fitted model re-evaluated with
//! intervention regressors switched off.

use chrono::NaiveDate;
use its_core::Result;
use serde::Serialize;

use crate::fit::{FittedModel, Prediction};
use crate::regressors::{BaseTerm, RATE_SCALE, RegressorTable};

/// Zeroed for the "neither intervention" scenario.
pub const NO_INTERVENTION_TERMS: [BaseTerm; 6] = [
    BaseTerm::Slope,
    BaseTerm::Step,
    BaseTerm::Mar20,
    BaseTerm::April20,
    BaseTerm::Slope2,
    BaseTerm::Step2,
];

/// Zeroed for the "no second intervention" scenario.
pub const NO_SECOND_INTERVENTION_TERMS: [BaseTerm; 2] = [BaseTerm::Slope2, BaseTerm::Step2];

/// Observed, fitted and counterfactual rates (per 1,000) at one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionPoint {
    /// Row date.
    pub date: NaiveDate,
    /// Group level, if any.
    pub group: Option<String>,
    /// Observed rate.
    pub observed: Option<f64>,
    /// Model prediction.
    pub fitted: Prediction,
    /// Neither intervention; set from the first cutoff on.
    pub no_interventions: Option<Prediction>,
    /// First intervention only; set from the second cutoff on.
    pub no_second: Option<Prediction>,
}

/// Factual and counterfactual series for one fitted model.
#[derive(Debug, Clone, Serialize)]
pub struct Projection {
    /// First cutoff date.
    pub first_cutoff: NaiveDate,
    /// Second cutoff date.
    pub second_cutoff: NaiveDate,
    /// One point per row of the regressor table, in table order.
    pub points: Vec<ProjectionPoint>,
}

/// Project `model` over `table` under both counterfactual scenarios.
///
/// Before its cutoff each scenario coincides with the fitted series, so it
/// is only reported from the cutoff date on.
pub fn project(model: &FittedModel, table: &RegressorTable, alpha: f64) -> Result<Projection> {
    let first = table.cutoffs().first();
    let second = table.cutoffs().second();

    let fitted = model.predict(table, alpha)?;
    let none = model.predict(&table.with_zeroed(&NO_INTERVENTION_TERMS), alpha)?;
    let no_second = model.predict(&table.with_zeroed(&NO_SECOND_INTERVENTION_TERMS), alpha)?;

    let points = table
        .rows()
        .iter()
        .zip(fitted)
        .zip(none.into_iter().zip(no_second))
        .map(|((row, f), (cf, cf2))| ProjectionPoint {
            date: row.date,
            group: row.group.clone(),
            observed: row.rate,
            fitted: f.scaled(RATE_SCALE),
            no_interventions: (row.date >= first).then(|| cf.scaled(RATE_SCALE)),
            no_second: (row.date >= second).then(|| cf2.scaled(RATE_SCALE)),
        })
        .collect();

    Ok(Projection { first_cutoff: first, second_cutoff: second, points })
}

/// Observed vs fitted rate (per 1,000) for one group level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSeries {
    /// Group level (`None` for a single series).
    pub group: Option<String>,
    /// Dates in time order.
    pub dates: Vec<NaiveDate>,
    /// Observed rates.
    pub observed: Vec<Option<f64>>,
    /// Predicted rates.
    pub predicted: Vec<f64>,
}

/// Split fitted and observed rates by group level, levels in first-seen order.
pub fn group_series(model: &FittedModel, table: &RegressorTable) -> Result<Vec<GroupSeries>> {
    let preds = model.predict(table, 0.05)?;
    let mut out: Vec<GroupSeries> = Vec::new();
    for (row, p) in table.rows().iter().zip(preds) {
        let idx = match out.iter().position(|s| s.group == row.group) {
            Some(i) => i,
            None => {
                out.push(GroupSeries {
                    group: row.group.clone(),
                    dates: Vec::new(),
                    observed: Vec::new(),
                    predicted: Vec::new(),
                });
                out.len() - 1
            }
        };
        let series = &mut out[idx];
        series.dates.push(row.date);
        series.observed.push(row.rate);
        series.predicted.push(RATE_SCALE * p.predicted);
    }
    Ok(out)
}
