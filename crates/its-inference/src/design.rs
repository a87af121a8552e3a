//! Model specification: typed term list and design-matrix generation.
//!
//! A specification always contains an intercept and the trend/intervention
//! terms `time, step, slope, mar20, april20, step2, slope2`. A panel
//! specification adds, for every non-reference level `l` of the grouping
//! column, a level indicator and the crosses `{step, slope, step2, slope2} × l`.
//! Harmonics `s1, c1` go last and are never interacted.
//!
//! Term names follow the `term:column[T.level]` convention so that reports
//! can decompose a coefficient name back into `(change type, level)`.

use its_core::{Error, Observation, Result};
use serde::{Deserialize, Serialize};

use crate::regressors::{BaseTerm, Harmonic, RegressorRow, RegressorTable};

/// How the values of a grouping column are to be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSchema {
    /// Levels are used as-is.
    Categorical,
    /// 0/1 flag relabelled from the paired category column.
    BinaryFlag,
    /// Decide from the values (0/1-only columns are flags).
    #[default]
    Infer,
}

/// Interaction group of a panel analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionGroup {
    /// N of the `group_N`/`category_N` pair.
    pub column: usize,
    /// Reference level (after relabelling).
    pub reference: String,
    /// Value interpretation.
    #[serde(default)]
    pub schema: GroupSchema,
}

impl InteractionGroup {
    /// Categorical group with content sniffing.
    pub fn new(column: usize, reference: impl Into<String>) -> Self {
        Self { column, reference: reference.into(), schema: GroupSchema::Infer }
    }

    /// Set the schema explicitly.
    pub fn with_schema(mut self, schema: GroupSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Column name, `group_N`.
    pub fn column_name(&self) -> String {
        format!("group_{}", self.column)
    }
}

fn flag_value(raw: &str) -> Option<bool> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v == 1.0 => Some(true),
        Ok(v) if v == 0.0 => Some(false),
        _ => None,
    }
}

/// True if every present value of `group_N` is numerically 0 or 1.
///
/// Compatibility shim for [`GroupSchema::Infer`]; an all-missing column is
/// not a flag.
pub fn is_binary_flag(rows: &[Observation], column: usize) -> bool {
    let mut any = false;
    for v in rows.iter().filter_map(|r| r.group(column)) {
        if flag_value(v).is_none() {
            return false;
        }
        any = true;
    }
    any
}

/// Replace 0/1 flag values with `"Recorded {category}"` / `"No recorded {category}"`.
pub fn relabel_binary(rows: Vec<Observation>, column: usize) -> Result<Vec<Observation>> {
    rows.into_iter()
        .map(|mut obs| {
            let Some(raw) = obs.group(column) else { return Ok(obs) };
            let flag = flag_value(raw).ok_or_else(|| {
                Error::Validation(format!("group_{column} value '{raw}' is not a 0/1 flag"))
            })?;
            let category = obs.category(column).unwrap_or("").to_string();
            let label = if flag {
                format!("Recorded {category}")
            } else {
                format!("No recorded {category}")
            };
            obs.groups[column] = Some(label);
            Ok(obs)
        })
        .collect()
}

/// Move `reference` to the front of `levels`, keeping the others in order.
///
/// Fails when `reference` is not an observed level or fewer than two levels
/// are observed (an interaction with no contrast).
pub fn reorder_levels(levels: &[String], reference: &str) -> Result<Vec<String>> {
    if levels.len() < 2 {
        return Err(Error::Configuration(format!(
            "interaction group needs at least two observed levels, found {:?}",
            levels
        )));
    }
    if !levels.iter().any(|l| l == reference) {
        return Err(Error::Configuration(format!(
            "reference level '{reference}' is not among observed levels {:?}",
            levels
        )));
    }
    let mut out = Vec::with_capacity(levels.len());
    out.push(reference.to_string());
    out.extend(levels.iter().filter(|l| *l != reference).cloned());
    Ok(out)
}

/// One column of the design matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    /// Constant.
    Intercept,
    /// Trend or intervention regressor.
    Base {
        /// Regressor.
        term: BaseTerm,
    },
    /// Indicator of a non-reference group level.
    Level {
        /// Level label.
        level: String,
    },
    /// Intervention regressor crossed with a non-reference level.
    Interaction {
        /// Regressor.
        term: BaseTerm,
        /// Level label.
        level: String,
    },
    /// Seasonal regressor.
    Harmonic {
        /// Harmonic.
        harmonic: Harmonic,
    },
}

impl Term {
    /// Column value for `row`.
    pub fn value(&self, row: &RegressorRow) -> f64 {
        let in_level = |level: &str| row.group.as_deref() == Some(level);
        match self {
            Term::Intercept => 1.0,
            Term::Base { term } => row.base(*term),
            Term::Level { level } => {
                if in_level(level) {
                    1.0
                } else {
                    0.0
                }
            }
            Term::Interaction { term, level } => {
                if in_level(level) {
                    row.base(*term)
                } else {
                    0.0
                }
            }
            Term::Harmonic { harmonic } => row.harmonic(*harmonic),
        }
    }

    /// Part of the intervention-free baseline (intercept, trend, level, season).
    pub fn is_baseline(&self) -> bool {
        match self {
            Term::Intercept | Term::Level { .. } | Term::Harmonic { .. } => true,
            Term::Base { term } => !term.is_intervention(),
            Term::Interaction { .. } => false,
        }
    }
}

/// Grouping column and its ordered levels (reference first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionBlock {
    /// Column name, e.g. `group_0`.
    pub column: String,
    /// Levels; `levels[0]` is the reference.
    pub levels: Vec<String>,
}

impl InteractionBlock {
    /// Reference level.
    pub fn reference(&self) -> &str {
        &self.levels[0]
    }
}

/// Ordered list of typed regression terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    terms: Vec<Term>,
    interaction: Option<InteractionBlock>,
}

impl ModelSpec {
    /// Build the specification for `table`.
    ///
    /// `interaction` is `(column name, reference level)`; its levels are read
    /// from the table's `group` labels.
    pub fn build(
        table: &RegressorTable,
        interaction: Option<(&str, &str)>,
        harmonics: bool,
    ) -> Result<Self> {
        let block = match interaction {
            Some((column, reference)) => Some(InteractionBlock {
                column: column.to_string(),
                levels: reorder_levels(table.levels(), reference)?,
            }),
            None => None,
        };

        let mut terms = vec![Term::Intercept];
        if let Some(b) = &block {
            terms.extend(b.levels[1..].iter().map(|l| Term::Level { level: l.clone() }));
        }
        terms.extend(BaseTerm::ALL.iter().map(|&term| Term::Base { term }));
        if let Some(b) = &block {
            for &term in &BaseTerm::INTERACTED {
                terms.extend(
                    b.levels[1..].iter().map(|l| Term::Interaction { term, level: l.clone() }),
                );
            }
        }
        if harmonics {
            terms.extend(Harmonic::ALL.iter().map(|&harmonic| Term::Harmonic { harmonic }));
        }

        Ok(Self { terms, interaction: block })
    }

    /// Terms in column order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of columns.
    pub fn dim(&self) -> usize {
        self.terms.len()
    }

    /// Interaction block, if this is a panel specification.
    pub fn interaction(&self) -> Option<&InteractionBlock> {
        self.interaction.as_ref()
    }

    /// Coefficient name of a term.
    pub fn term_name(&self, term: &Term) -> String {
        let column = self.interaction.as_ref().map(|b| b.column.as_str()).unwrap_or("group");
        match term {
            Term::Intercept => "Intercept".to_string(),
            Term::Base { term } => term.name().to_string(),
            Term::Level { level } => format!("{column}[T.{level}]"),
            Term::Interaction { term, level } => format!("{}:{column}[T.{level}]", term.name()),
            Term::Harmonic { harmonic } => harmonic.name().to_string(),
        }
    }

    /// All coefficient names, in column order.
    pub fn term_names(&self) -> Vec<String> {
        self.terms.iter().map(|t| self.term_name(t)).collect()
    }

    /// Design row for one regressor row.
    pub fn design_row(&self, row: &RegressorRow) -> Vec<f64> {
        self.terms.iter().map(|t| t.value(row)).collect()
    }

    /// Row-wise design matrix.
    pub fn design_matrix<'a, I>(&self, rows: I) -> Vec<Vec<f64>>
    where
        I: IntoIterator<Item = &'a RegressorRow>,
    {
        rows.into_iter().map(|r| self.design_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regressors::derive_regressors;
    use chrono::NaiveDate;
    use its_core::Cutoffs;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn ymd(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn panel(levels: &[&str]) -> RegressorTable {
        let mut obs = Vec::new();
        for g in levels {
            for i in 0..36 {
                let d = ymd(2019 + i / 12, (i % 12) as u32 + 1);
                obs.push(
                    Observation::new(d, "x", Some(5.0), Some(100.0), Some(0.05))
                        .with_group(0, Some(g), Some("sex")),
                );
            }
        }
        let cut = Cutoffs::new(ymd(2020, 3), ymd(2021, 3)).unwrap();
        derive_regressors(&obs, Some(0), &cut).unwrap()
    }

    #[test]
    fn test_reorder_moves_reference_first() {
        let out = reorder_levels(&s(&["F", "M", "U"]), "M").unwrap();
        assert_eq!(out, s(&["M", "F", "U"]));
    }

    #[test]
    fn test_reorder_rejects_unknown_reference() {
        let err = reorder_levels(&s(&["F", "M"]), "X").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_reorder_rejects_single_level() {
        let err = reorder_levels(&s(&["M"]), "M").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_single_series_spec() {
        let t = panel(&["only"]);
        let spec = ModelSpec::build(&t, None, true).unwrap();
        assert_eq!(
            spec.term_names(),
            s(&["Intercept", "time", "step", "slope", "mar20", "april20", "step2", "slope2", "s1", "c1"])
        );
        let no_season = ModelSpec::build(&t, None, false).unwrap();
        assert_eq!(no_season.dim(), 8);
    }

    #[test]
    fn test_panel_spec_names_and_values() {
        let t = panel(&["F", "M"]);
        let spec = ModelSpec::build(&t, Some(("group_0", "M")), true).unwrap();
        let names = spec.term_names();
        assert_eq!(names[1], "group_0[T.F]");
        assert!(names.contains(&"step:group_0[T.F]".to_string()));
        assert!(names.contains(&"slope2:group_0[T.F]".to_string()));
        assert!(!names.iter().any(|n| n.contains("T.M")));
        assert_eq!(&names[names.len() - 2..], &s(&["s1", "c1"]));
        assert_eq!(spec.interaction().unwrap().reference(), "M");

        let row_f = t.rows().iter().find(|r| r.group.as_deref() == Some("F") && r.time == 30).unwrap();
        let row_m = t.rows().iter().find(|r| r.group.as_deref() == Some("M") && r.time == 30).unwrap();
        let slope_f = names.iter().position(|n| n == "slope:group_0[T.F]").unwrap();
        assert_eq!(spec.design_row(row_f)[slope_f], row_f.slope);
        assert_eq!(spec.design_row(row_m)[slope_f], 0.0);
    }

    #[test]
    fn test_panel_spec_single_level_fails() {
        let t = panel(&["M"]);
        assert!(matches!(
            ModelSpec::build(&t, Some(("group_0", "M")), true),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_binary_flag_detection_and_relabel() {
        let d = ymd(2020, 1);
        let rows = vec![
            Observation::new(d, "x", None, None, None).with_group(0, Some("1"), Some("autism")),
            Observation::new(d, "x", None, None, None).with_group(0, Some("0"), Some("autism")),
            Observation::new(d, "x", None, None, None).with_group(0, None, Some("autism")),
        ];
        assert!(is_binary_flag(&rows, 0));
        let out = relabel_binary(rows, 0).unwrap();
        assert_eq!(out[0].group(0), Some("Recorded autism"));
        assert_eq!(out[1].group(0), Some("No recorded autism"));
        assert_eq!(out[2].group(0), None);
    }

    #[test]
    fn test_non_flag_column_not_binary() {
        let d = ymd(2020, 1);
        let rows = vec![
            Observation::new(d, "x", None, None, None).with_group(0, Some("1"), None),
            Observation::new(d, "x", None, None, None).with_group(0, Some("30-39"), None),
        ];
        assert!(!is_binary_flag(&rows, 0));
        assert!(relabel_binary(rows, 0).is_err());
    }

    #[test]
    fn test_baseline_terms() {
        assert!(Term::Intercept.is_baseline());
        assert!(Term::Base { term: BaseTerm::Time }.is_baseline());
        assert!(!Term::Base { term: BaseTerm::Mar20 }.is_baseline());
        assert!(!Term::Interaction { term: BaseTerm::Step, level: "a".into() }.is_baseline());
        assert!(Term::Harmonic { harmonic: Harmonic::C1 }.is_baseline());
    }
}
