//! Percent-change confidence intervals extracted from a fitted model.

use std::fmt;

use its_core::Result;
use serde::{Deserialize, Serialize};

use crate::fit::FittedModel;

/// Separator between a column name and a categorical level in term names.
const LEVEL_MARKER: &str = "[T.";

/// Kind of effect an interaction coefficient measures.
///
/// Ordering follows the display order of forest reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Level difference between groups over the whole study period.
    Baseline,
    /// Slope change after the first cutoff.
    Slope,
    /// Slope change after the second cutoff.
    Slope2,
    /// Level shift at the first cutoff.
    Step,
    /// Level shift at the second cutoff.
    Step2,
}

impl ChangeType {
    /// All change types in display order.
    pub const ALL: [ChangeType; 5] =
        [ChangeType::Baseline, ChangeType::Slope, ChangeType::Slope2, ChangeType::Step, ChangeType::Step2];

    /// Short name as used in term names.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Baseline => "baseline",
            ChangeType::Slope => "slope",
            ChangeType::Slope2 => "slope2",
            ChangeType::Step => "step",
            ChangeType::Step2 => "step2",
        }
    }

    /// Column heading of a forest panel.
    pub fn heading(self) -> &'static str {
        match self {
            ChangeType::Baseline => "Study period\nBaseline difference",
            ChangeType::Slope => "First interruption vs. pre-period\nSlope change",
            ChangeType::Slope2 => "Second vs. first interruption\nSlope change",
            ChangeType::Step => "First interruption\nLevel shift",
            ChangeType::Step2 => "Second interruption\nLevel shift",
        }
    }

    /// Parse a short name.
    pub fn from_name(name: &str) -> Option<Self> {
        ChangeType::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coefficient on the percent-change scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CiRow {
    /// Coefficient name.
    pub term: String,
    /// Point estimate, percent change.
    pub coef: f64,
    /// Lower bound, percent change.
    pub lower: f64,
    /// Upper bound, percent change.
    pub upper: f64,
    /// `coef − lower` on the log scale, then transformed like the others.
    pub error: f64,
    /// `"{coef}% ({lower}% to {upper}%)"`.
    pub pcnt: String,
}

/// `100·(exp(x) − 1)`: log-scale coefficient to percent change.
pub fn percent_change(x: f64) -> f64 {
    100.0 * x.exp_m1()
}

/// Round half away from zero to `digits` decimals.
pub fn round_to(x: f64, digits: usize) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let r = (x * scale).round() / scale;
    if r.is_finite() { r } else { x }
}

/// Shortest round-trip rendering, always with a fractional part (`50` → `"50.0"`).
pub fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 { format!("{x:.1}") } else { format!("{x}") }
}

/// `"{coef}% ({lower}% to {upper}%)"` with each value rounded to `digits`.
pub fn format_percent(coef: f64, lower: f64, upper: f64, digits: usize) -> String {
    format!(
        "{}% ({}% to {}%)",
        format_float(round_to(coef, digits)),
        format_float(round_to(lower, digits)),
        format_float(round_to(upper, digits)),
    )
}

/// Percent-change rows for every coefficient of `model`, in term order.
pub fn ci_table(model: &FittedModel, alpha: f64, digits: usize) -> Result<Vec<CiRow>> {
    let bounds = model.conf_int(alpha)?;
    Ok(model
        .term_names()
        .iter()
        .zip(model.coefficients())
        .zip(bounds)
        .map(|((term, &b), (lo, hi))| {
            let coef = percent_change(b);
            let lower = percent_change(lo);
            let upper = percent_change(hi);
            CiRow {
                term: term.clone(),
                coef,
                lower,
                upper,
                error: percent_change(b - lo),
                pcnt: format_percent(coef, lower, upper, digits),
            }
        })
        .collect())
}

/// Split a categorical term name into `(change type, level)`.
///
/// `step:group_0[T.F]` → `(Step, "F")`; a bare level indicator such as
/// `group_0[T.F]` is the `Baseline` difference. Names without a level
/// marker, or with an unrecognised prefix, yield `None`.
pub fn decompose_term_key(key: &str) -> Option<(ChangeType, String)> {
    let (head, tail) = key.split_once(LEVEL_MARKER)?;
    let change = match head.split_once(':') {
        Some((term, _)) => ChangeType::from_name(term)?,
        None => ChangeType::Baseline,
    };
    Some((change, tail.trim_end_matches(']').to_string()))
}

/// Coefficients reported in the per-model summary table.
const SUMMARY_TERMS: [(&str, &str, &str); 7] = [
    ("time", "", "Pre-interruption monthly slope"),
    ("mar20", "", "First month after interruption"),
    ("april20", "", "Second month after interruption"),
    ("slope", "First interruption period", "Change in slope"),
    ("step", "First interruption period", "Level shift"),
    ("slope2", "Second interruption period", "Change in slope"),
    ("step2", "Second interruption period", "Level shift"),
];

/// A summary-table cell: two-level column heading and the formatted interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryCell {
    /// Period heading (empty for whole-series terms).
    pub period: String,
    /// Effect label including the interval level.
    pub label: String,
    /// Formatted percent change.
    pub pcnt: String,
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Row label.
    pub name: String,
    /// Cells in fixed column order.
    pub cells: Vec<SummaryCell>,
}

/// Trend and intervention effects of a single-series model as one table row.
pub fn summary_row(
    model: &FittedModel,
    name: impl Into<String>,
    alpha: f64,
    digits: usize,
) -> Result<SummaryRow> {
    let rows = ci_table(model, alpha, digits)?;
    let level = format_float(round_to(100.0 * (1.0 - alpha), 2));
    let level = level.trim_end_matches(".0");
    let cells = SUMMARY_TERMS
        .iter()
        .map(|&(term, period, label)| {
            let pcnt = rows
                .iter()
                .find(|r| r.term == term)
                .map(|r| r.pcnt.clone())
                .unwrap_or_default();
            SummaryCell {
                period: period.to_string(),
                label: format!("{label} ({level}% CI)"),
                pcnt,
            }
        })
        .collect();
    Ok(SummaryRow { name: name.into(), cells })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_percent_change_values() {
        assert_eq!(percent_change(0.0), 0.0);
        assert_relative_eq!(percent_change(1.5_f64.ln()), 50.0, epsilon = 1e-10);
        assert_relative_eq!(percent_change(0.5_f64.ln()), -50.0, epsilon = 1e-10);
    }

    #[test]
    fn test_percent_change_is_monotonic() {
        let xs: Vec<f64> = (-40..=40).map(|i| i as f64 * 0.05).collect();
        for pair in xs.windows(2) {
            assert!(percent_change(pair[1]) > percent_change(pair[0]));
        }
    }

    #[test]
    fn test_format_percent_matches_float_str() {
        assert_eq!(format_percent(50.0, 41.234, 59.999, 2), "50.0% (41.23% to 60.0%)");
        assert_eq!(format_percent(-3.14159, -10.0, 4.5, 2), "-3.14% (-10.0% to 4.5%)");
        assert_eq!(format_percent(1.23456, 0.5, 2.0, 3), "1.235% (0.5% to 2.0%)");
    }

    #[test]
    fn test_decompose_interaction_terms() {
        assert_eq!(
            decompose_term_key("step:group_0[T.F]"),
            Some((ChangeType::Step, "F".to_string()))
        );
        assert_eq!(
            decompose_term_key("slope2:group_1[T.Recorded autism]"),
            Some((ChangeType::Slope2, "Recorded autism".to_string()))
        );
        assert_eq!(
            decompose_term_key("group_0[T.30-39]"),
            Some((ChangeType::Baseline, "30-39".to_string()))
        );
        assert_eq!(
            decompose_term_key("step:group_0[T.St. Helens]"),
            Some((ChangeType::Step, "St. Helens".to_string()))
        );
        assert_eq!(decompose_term_key("step"), None);
        assert_eq!(decompose_term_key("Intercept"), None);
    }

    #[test]
    fn test_change_type_display_order() {
        let mut v = vec![ChangeType::Step2, ChangeType::Baseline, ChangeType::Step, ChangeType::Slope];
        v.sort();
        assert_eq!(v, vec![ChangeType::Baseline, ChangeType::Slope, ChangeType::Step, ChangeType::Step2]);
        assert_eq!(ChangeType::from_name("slope2"), Some(ChangeType::Slope2));
        assert_eq!(ChangeType::from_name("mar20"), None);
    }
}
