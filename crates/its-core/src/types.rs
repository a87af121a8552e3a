//! Monthly indicator observations and the in-memory table they live in.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pattern::NamePattern;
use crate::{Error, Result};

/// One indicator-series observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Start-of-month date.
    pub date: NaiveDate,
    /// Series identifier.
    pub name: String,
    /// Event count (`None` when missing or non-numeric).
    pub numerator: Option<f64>,
    /// Exposure count (`None` when missing or non-numeric).
    pub denominator: Option<f64>,
    /// Rate, `numerator / denominator`.
    pub value: Option<f64>,
    /// `group_N` labels, indexed by N.
    pub groups: Vec<Option<String>>,
    /// `category_N` labels, indexed by N.
    pub categories: Vec<Option<String>>,
}

impl Observation {
    /// Observation without subgroup columns.
    pub fn new(
        date: NaiveDate,
        name: impl Into<String>,
        numerator: Option<f64>,
        denominator: Option<f64>,
        value: Option<f64>,
    ) -> Self {
        Self {
            date,
            name: name.into(),
            numerator,
            denominator,
            value,
            groups: Vec::new(),
            categories: Vec::new(),
        }
    }

    /// Attach a `group_N`/`category_N` pair at index `idx`.
    pub fn with_group(
        mut self,
        idx: usize,
        group: Option<&str>,
        category: Option<&str>,
    ) -> Self {
        if self.groups.len() <= idx {
            self.groups.resize(idx + 1, None);
            self.categories.resize(idx + 1, None);
        }
        self.groups[idx] = group.map(str::to_string);
        self.categories[idx] = category.map(str::to_string);
        self
    }

    /// `group_N` label, if present.
    pub fn group(&self, idx: usize) -> Option<&str> {
        self.groups.get(idx).and_then(|g| g.as_deref())
    }

    /// `category_N` label, if present.
    pub fn category(&self, idx: usize) -> Option<&str> {
        self.categories.get(idx).and_then(|c| c.as_deref())
    }

    /// Usable for estimation: all three numeric fields present and positive exposure.
    pub fn is_complete(&self) -> bool {
        matches!(
            (self.numerator, self.denominator, self.value),
            (Some(n), Some(d), Some(_)) if n >= 0.0 && d > 0.0
        )
    }
}

/// Counts of fields coerced to missing while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataQualityReport {
    /// Rows read.
    pub n_rows: usize,
    /// Non-empty `numerator` fields that were not numeric.
    pub numerator_coerced: usize,
    /// Non-empty `denominator` fields that were not numeric.
    pub denominator_coerced: usize,
    /// Non-empty `value` fields that were not numeric.
    pub value_coerced: usize,
}

impl DataQualityReport {
    /// Any field coerced?
    pub fn has_warnings(&self) -> bool {
        self.numerator_coerced + self.denominator_coerced + self.value_coerced > 0
    }
}

/// Parse a numeric field; anything unparsable or non-finite is missing.
///
/// Returns `(value, coerced)` where `coerced` flags a non-empty field that
/// failed to parse.
pub fn coerce_numeric(raw: &str) -> (Option<f64>, bool) {
    let s = raw.trim();
    if s.is_empty() {
        return (None, false);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => (Some(v), false),
        Ok(_) => (None, false),
        Err(_) => (None, true),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("invalid date '{raw}': {e}")))
}

fn field_at<F: AsRef<str>>(record: &[F], j: usize) -> &str {
    record.get(j).map(|f| f.as_ref()).unwrap_or("")
}

fn optional_label(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Shared, read-only observation table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationTable {
    rows: Vec<Observation>,
}

impl ObservationTable {
    /// Wrap already-typed rows.
    pub fn new(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    /// Build from header + string records (e.g. a CSV reader's output).
    ///
    /// Required columns: `date`, `name`, `numerator`, `denominator`, `value`.
    /// `group_N`/`category_N` pairs are optional. Non-numeric numeric fields
    /// become missing and are counted in the returned report.
    pub fn from_records<H, R, F>(headers: &[H], records: R) -> Result<(Self, DataQualityReport)>
    where
        H: AsRef<str>,
        R: IntoIterator<Item = Vec<F>>,
        F: AsRef<str>,
    {
        let find = |col: &str| -> Result<usize> {
            headers.iter().position(|h| h.as_ref().trim() == col).ok_or_else(|| {
                Error::Validation(format!("input table is missing required column '{col}'"))
            })
        };
        let i_date = find("date")?;
        let i_name = find("name")?;
        let i_num = find("numerator")?;
        let i_den = find("denominator")?;
        let i_val = find("value")?;

        // (N, group column, category column)
        let mut pairs: Vec<(usize, Option<usize>, Option<usize>)> = Vec::new();
        for (j, h) in headers.iter().enumerate() {
            let h = h.as_ref().trim();
            let (is_group, suffix) = if let Some(s) = h.strip_prefix("group_") {
                (true, s)
            } else if let Some(s) = h.strip_prefix("category_") {
                (false, s)
            } else {
                continue;
            };
            let Ok(n) = suffix.parse::<usize>() else { continue };
            let k = match pairs.iter().position(|p| p.0 == n) {
                Some(k) => k,
                None => {
                    pairs.push((n, None, None));
                    pairs.len() - 1
                }
            };
            if is_group {
                pairs[k].1 = Some(j);
            } else {
                pairs[k].2 = Some(j);
            }
        }
        let n_pairs = pairs.iter().map(|p| p.0 + 1).max().unwrap_or(0);

        let mut report = DataQualityReport::default();
        let mut rows = Vec::new();
        for (line, record) in records.into_iter().enumerate() {
            let field = |j: usize| field_at(&record, j);
            let date = parse_date(field(i_date))
                .map_err(|e| Error::Validation(format!("row {}: {e}", line + 1)))?;
            let (numerator, c_num) = coerce_numeric(field(i_num));
            let (denominator, c_den) = coerce_numeric(field(i_den));
            let (value, c_val) = coerce_numeric(field(i_val));
            report.numerator_coerced += usize::from(c_num);
            report.denominator_coerced += usize::from(c_den);
            report.value_coerced += usize::from(c_val);

            let mut groups = vec![None; n_pairs];
            let mut categories = vec![None; n_pairs];
            for &(n, g, c) in &pairs {
                groups[n] = g.and_then(|j| optional_label(field(j)));
                categories[n] = c.and_then(|j| optional_label(field(j)));
            }
            rows.push(Observation {
                date,
                name: field(i_name).trim().to_string(),
                numerator,
                denominator,
                value,
                groups,
                categories,
            });
        }
        report.n_rows = rows.len();

        if report.has_warnings() {
            tracing::warn!(
                numerator = report.numerator_coerced,
                denominator = report.denominator_coerced,
                value = report.value_coerced,
                "non-numeric fields coerced to missing"
            );
        }
        Ok((Self { rows }, report))
    }

    /// All rows.
    pub fn rows(&self) -> &[Observation] {
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

    /// Distinct series names, in first-seen order.
    pub fn names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Rows whose `name` matches the glob `pattern`.
    ///
    /// Zero matching names is a configuration error, never an empty result.
    pub fn subset(&self, pattern: &str) -> Result<Vec<Observation>> {
        let pat = NamePattern::new(pattern)?;
        let rows: Vec<Observation> =
            self.rows.iter().filter(|r| pat.matches(&r.name)).cloned().collect();
        if rows.is_empty() {
            return Err(Error::Configuration(format!(
                "pattern did not match any series: {pattern}"
            )));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<&'static str> {
        vec!["date", "name", "numerator", "denominator", "value", "group_0", "category_0"]
    }

    #[test]
    fn test_coerce_numeric_policy() {
        assert_eq!(coerce_numeric("12"), (Some(12.0), false));
        assert_eq!(coerce_numeric(" 0.5 "), (Some(0.5), false));
        assert_eq!(coerce_numeric(""), (None, false));
        assert_eq!(coerce_numeric("[REDACTED]"), (None, true));
        assert_eq!(coerce_numeric("nan"), (None, false));
    }

    #[test]
    fn test_from_records_coerces_placeholder_to_missing() {
        let records = vec![
            vec!["2020-01-01", "a_rate", "10", "1000", "0.01", "1", "autism"],
            vec!["2020-02-01", "a_rate", "[REDACTED]", "1000", "[REDACTED]", "0", "autism"],
        ];
        let (table, report) = ObservationTable::from_records(&headers(), records).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(report.n_rows, 2);
        assert_eq!(report.numerator_coerced, 1);
        assert_eq!(report.value_coerced, 1);
        let row = &table.rows()[1];
        assert_eq!(row.numerator, None);
        assert_eq!(row.value, None);
        assert_eq!(row.denominator, Some(1000.0));
        assert!(!row.is_complete());
        assert_eq!(row.group(0), Some("0"));
        assert_eq!(row.category(0), Some("autism"));
    }

    #[test]
    fn test_from_records_accepts_datetime_suffix() {
        let records = vec![vec!["2021-03-01 00:00:00", "x", "1", "2", "0.5", "", ""]];
        let (table, _) = ObservationTable::from_records(&headers(), records).unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert_eq!(row.group(0), None);
    }

    #[test]
    fn test_missing_required_column() {
        let err = ObservationTable::from_records(&["date", "name"], Vec::<Vec<&str>>::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_subset_no_match_is_configuration_error() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let table = ObservationTable::new(vec![Observation::new(
            d,
            "antidepressant_rate",
            Some(1.0),
            Some(10.0),
            Some(0.1),
        )]);
        let err = table.subset("nonexistent_*").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(table.subset("antidepressant_*").unwrap().len(), 1);
    }

    #[test]
    fn test_names_first_seen_order() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let table = ObservationTable::new(vec![
            Observation::new(d, "b", None, None, None),
            Observation::new(d, "a", None, None, None),
            Observation::new(d, "b", None, None, None),
        ]);
        assert_eq!(table.names(), vec!["b".to_string(), "a".to_string()]);
    }
}
