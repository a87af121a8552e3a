//! End-to-end scenarios on synthetic monthly series.
//!
//! - Noise-free step recovery on a single series
//! - Configuration failures (no matching series, degenerate interaction)
//! - Missing-value equivalence with physically removed rows
//! - Panel fit on seeded Poisson data, forest aggregation
//! - Counterfactual identity and the likelihood-ratio test for seasonality

use approx::assert_relative_eq;
use chrono::{Datelike, NaiveDate};
use its_core::{AnalysisConfig, Cutoffs, Error, ModelConfig, Observation, ObservationTable};
use its_inference::{
    ChangeType, InteractionGroup, ModelRequest, ci_table, forest, forest_panels, get_model,
    hypotest::HARMONIC_LR_DF, lr_test, project,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ymd(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn month(i: i32) -> NaiveDate {
    ymd(2019 + i / 12, (i % 12) as u32 + 1)
}

fn config(first: NaiveDate, second: NaiveDate) -> AnalysisConfig {
    AnalysisConfig::new(Cutoffs::new(first, second).unwrap())
}

/// 36 months from 2019-01: 10/1000 flat, ×1.5 from month 13 on.
fn step_table() -> ObservationTable {
    let den = 100_000.0;
    let rows = (0..36)
        .map(|i| {
            let rate = if i >= 12 { 0.015 } else { 0.010 };
            Observation::new(month(i), "drug_all_rate", Some(rate * den), Some(den), Some(rate))
        })
        .collect();
    ObservationTable::new(rows)
}

/// Two-group panel with Poisson noise; group "B" gets an extra ×1.3 step.
fn noisy_panel(seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let den = 1_000_000.0;
    let mut rows = Vec::new();
    for (group, level, extra_step) in [("A", 1.0, 1.0), ("B", 1.1, 1.3)] {
        for i in 0..48 {
            let t = f64::from(i);
            let season = (0.1 * (2.0 * std::f64::consts::PI * t / 12.0).sin()).exp();
            let mut rate = 0.01 * level * (1.0 + 0.003 * t) * season;
            if i >= 14 {
                rate *= 1.2 * extra_step;
            }
            let count = Poisson::new(rate * den).unwrap().sample(&mut rng);
            rows.push(
                Observation::new(month(i), "drug_sex_rate", Some(count), Some(den), Some(count / den))
                    .with_group(0, Some(group), Some("sex")),
            );
        }
    }
    ObservationTable::new(rows)
}

// ---------------------------------------------------------------------------
// Single series
// ---------------------------------------------------------------------------

#[test]
fn step_of_fifty_percent_is_recovered() {
    let cfg = config(ymd(2020, 1), ymd(2021, 1));
    let its = get_model(&step_table(), &ModelRequest::new("drug_*"), &cfg).unwrap();
    assert_eq!(its.data.first_cutoff_index(), 12);

    let rows = ci_table(&its.model, 0.05, 2).unwrap();
    let pc = |term: &str| rows.iter().find(|r| r.term == term).unwrap().coef;
    assert_relative_eq!(pc("step"), 50.0, epsilon = 1e-4);
    for term in ["slope", "step2", "slope2"] {
        assert!(pc(term).abs() < 1e-4, "{term}: {}", pc(term));
    }
    let step = rows.iter().find(|r| r.term == "step").unwrap();
    assert!(step.pcnt.starts_with("50.0% ("), "{}", step.pcnt);
}

#[test]
fn unmatched_pattern_is_configuration_error() {
    let cfg = config(ymd(2020, 1), ymd(2021, 1));
    let err = get_model(&step_table(), &ModelRequest::new("nonexistent_*"), &cfg).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
}

#[test]
fn missing_cutoff_is_configuration_error() {
    let cfg = config(ymd(2018, 1), ymd(2021, 1));
    let err = get_model(&step_table(), &ModelRequest::new("drug_*"), &cfg).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
}

#[test]
fn single_level_interaction_fails_fast() {
    let rows = step_table()
        .rows()
        .iter()
        .map(|r| r.clone().with_group(0, Some("F"), Some("sex")))
        .collect();
    let table = ObservationTable::new(rows);
    let cfg = config(ymd(2020, 1), ymd(2021, 1));
    let request = ModelRequest::new("drug_*").with_interaction(InteractionGroup::new(0, "F"));
    let err = get_model(&table, &request, &cfg).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
}

/// Fit the same seeded series twice: once with month `index` redacted, once
/// with that month removed. Coefficients must agree.
fn assert_redaction_matches_removal(index: usize) {
    let mut rng = StdRng::seed_from_u64(7);
    let headers = ["date", "name", "numerator", "denominator", "value"];
    let records: Vec<Vec<String>> = (0..36)
        .map(|i| {
            let rate = 0.02 * if i >= 14 { 0.9 } else { 1.0 };
            let num = Poisson::new(rate * 50_000.0).unwrap().sample(&mut rng);
            vec![
                month(i).to_string(),
                "drug_all_rate".to_string(),
                num.to_string(),
                "50000".to_string(),
                (num / 50_000.0).to_string(),
            ]
        })
        .collect();

    let mut redacted = records.clone();
    redacted[index][4] = "[REDACTED]".to_string();
    let mut removed = records;
    removed.remove(index);

    let (t_redacted, report) = ObservationTable::from_records(&headers, redacted).unwrap();
    assert_eq!(report.value_coerced, 1);
    let (t_removed, _) = ObservationTable::from_records(&headers, removed).unwrap();

    let cfg = config(ymd(2020, 3), ymd(2021, 3));
    let a = get_model(&t_redacted, &ModelRequest::new("drug_*"), &cfg).unwrap();
    let b = get_model(&t_removed, &ModelRequest::new("drug_*"), &cfg).unwrap();

    let row = a.data.rows().iter().find(|r| r.date == month(index as i32)).unwrap();
    assert_eq!(row.rate, None);
    assert_eq!(a.model.n_obs(), b.model.n_obs());
    assert_eq!(a.model.term_names(), b.model.term_names());
    for (x, y) in a.model.coefficients().iter().zip(b.model.coefficients()) {
        assert_relative_eq!(*x, *y, epsilon = 1e-10);
    }
}

#[test]
fn redacted_value_matches_removed_row() {
    assert_redaction_matches_removal(20);
}

#[test]
fn redacted_first_month_matches_removed_first_month() {
    assert_redaction_matches_removal(0);
}

#[test]
fn non_convergence_surfaces_diagnostics() {
    let cfg = config(ymd(2020, 1), ymd(2021, 1))
        .with_model(ModelConfig { max_iter: 2, ..ModelConfig::default() });
    match get_model(&step_table(), &ModelRequest::new("drug_*"), &cfg) {
        Err(Error::Convergence(d)) => {
            assert_eq!(d.max_iter, 2);
            assert_eq!(d.loglik_trace.len(), 3);
            assert!(d.loglik_trace.windows(2).all(|w| w[1] >= w[0]));
        }
        other => panic!("expected convergence error, got {other:?}"),
    }
}

#[test]
fn counterfactual_equals_intervention_free_trend() {
    let cfg = config(ymd(2020, 3), ymd(2021, 3));
    let table = noisy_panel(11);
    let rows = table.rows().iter().filter(|r| r.group(0) == Some("A")).cloned().collect();
    let its = get_model(&ObservationTable::new(rows), &ModelRequest::new("drug_*"), &cfg).unwrap();

    let proj = project(&its.model, &its.data, 0.05).unwrap();
    let baseline = its.model.baseline_trend(&its.data);
    for (p, b) in proj.points.iter().zip(&baseline) {
        match &p.no_interventions {
            Some(cf) => assert_relative_eq!(cf.predicted, 1000.0 * b, max_relative = 1e-12),
            None => {
                assert!(p.date < cfg.cutoffs.first());
                assert_relative_eq!(p.fitted.predicted, 1000.0 * b, max_relative = 1e-12);
            }
        }
    }
    assert!(proj.points.iter().all(|p| p.no_second.is_none() || p.date.year() >= 2021));
}

#[test]
fn harmonics_improve_fit_on_seasonal_series() {
    let table = noisy_panel(3);
    let rows = table.rows().iter().filter(|r| r.group(0) == Some("A")).cloned().collect();
    let table = ObservationTable::new(rows);
    let seasonal = config(ymd(2020, 3), ymd(2021, 3));
    let flat = seasonal
        .clone()
        .with_model(ModelConfig { harmonics: false, ..ModelConfig::default() });

    let big = get_model(&table, &ModelRequest::new("drug_*"), &seasonal).unwrap();
    let small = get_model(&table, &ModelRequest::new("drug_*"), &flat).unwrap();
    let lr = lr_test(&small.model, &big.model, HARMONIC_LR_DF).unwrap();
    assert!(lr.statistic > 0.0);
    assert!(lr.p_value < 1e-6, "p = {}", lr.p_value);
}

// ---------------------------------------------------------------------------
// Panel
// ---------------------------------------------------------------------------

#[test]
fn panel_interaction_recovers_group_step() {
    let cfg = config(ymd(2020, 3), ymd(2021, 3));
    let request = ModelRequest::new("drug_sex_*").with_interaction(InteractionGroup::new(0, "A"));
    let its = get_model(&noisy_panel(42), &request, &cfg).unwrap();

    let m = &its.model;
    let step_b = m.coefficient("step:group_0[T.B]").unwrap();
    assert!((step_b - 1.3_f64.ln()).abs() < 0.05, "step:B = {step_b}");
    let level_b = m.coefficient("group_0[T.B]").unwrap();
    assert!((level_b - 1.1_f64.ln()).abs() < 0.05, "level B = {level_b}");
    assert!(m.std_errors().iter().all(|se| se.is_finite() && *se >= 0.0));
    assert_eq!(m.n_obs(), 96);
}

#[test]
fn forest_collects_group_effects_in_request_order() {
    let cfg = config(ymd(2020, 3), ymd(2021, 3));
    let table = noisy_panel(5);
    let requests = vec![
        ModelRequest::new("drug_sex_*").with_interaction(InteractionGroup::new(0, "A")),
        ModelRequest::new("drug_sex_*")
            .with_interaction(InteractionGroup::new(0, "A"))
            .with_group_suffix(" new")
            .with_label("sex (new)"),
    ];
    let entries = forest(&table, &requests, &cfg).unwrap();
    assert_eq!(entries.len(), 10);
    assert!(entries[..5].iter().all(|e| e.category == "sex" && e.group == "B"));
    assert!(entries[5..].iter().all(|e| e.category == "sex (new)" && e.group == "B new"));

    let changes: Vec<ChangeType> = entries[..5].iter().map(|e| e.change).collect();
    assert_eq!(
        changes,
        vec![ChangeType::Baseline, ChangeType::Step, ChangeType::Slope, ChangeType::Step2, ChangeType::Slope2]
    );

    let panels = forest_panels(&entries, &ChangeType::ALL);
    assert_eq!(panels.len(), 10);
    assert_eq!(panels[0].category, "sex");
    assert_eq!(panels[0].change, ChangeType::Baseline);
}

#[test]
fn forest_fails_fast_on_unmatched_request() {
    let cfg = config(ymd(2020, 3), ymd(2021, 3));
    let requests = vec![
        ModelRequest::new("drug_sex_*").with_interaction(InteractionGroup::new(0, "A")),
        ModelRequest::new("nonexistent_*"),
    ];
    let err = forest(&noisy_panel(1), &requests, &cfg).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
}
