//! Population-level calibration check: the premature discontinuation rate
//! observed over a full run must land on the configured cumulative target,
//! not on the inflated value produced by compounding the raw rate per visit.

mod common;

use common::{pin_stable, quiet_spec};
use macula_core::DiscontinuationCause;
use macula_engine::{run, EngineKind, RunConfig};

#[test]
fn test_cumulative_premature_rate_matches_target() {
    let mut spec = quiet_spec();
    pin_stable(&mut spec);
    spec.discontinuation.premature.target_cumulative_rate = 0.145;
    spec.discontinuation.premature.expected_visits = 13.0;
    // No follow-up schedule: a premature stop is final here, so each patient
    // contributes at most one event and exactly 13 evaluations.
    spec.monitoring.clear();

    let mut config = RunConfig::new(10_000, 2.46, 20_240_117);
    // Enroll everyone within the first few days so every patient completes
    // the same 13-visit schedule inside the horizon.
    config.arrivals_per_week = Some(20_000.0);

    let result = run(&spec, EngineKind::AgentStepped, &config).unwrap();
    assert_eq!(result.summary.enrolled, 10_000);

    let premature = result
        .patients
        .iter()
        .filter(|p| {
            p.episodes
                .iter()
                .any(|ep| ep.cause == DiscontinuationCause::Premature)
        })
        .count();
    let rate = premature as f64 / result.summary.enrolled as f64;

    assert!(
        (rate - 0.145).abs() < 0.015,
        "premature rate {rate:.4} outside 14.5% +/- 1.5pp"
    );
    // Compounding the cumulative rate per visit would give
    // 1 - (1 - 0.145)^13 = 0.87; the calibrated rate must stay nowhere near.
    assert!(rate < 0.30, "premature rate {rate:.4} looks compounded");

    // With every other cause switched off, nothing else may ever fire.
    assert!(result
        .patients
        .iter()
        .flat_map(|p| &p.episodes)
        .all(|ep| ep.cause == DiscontinuationCause::Premature));
}

#[test]
fn test_visit_schedule_gives_expected_evaluation_count() {
    let mut spec = quiet_spec();
    pin_stable(&mut spec);
    spec.monitoring.clear();

    let mut config = RunConfig::new(200, 2.46, 7);
    config.arrivals_per_week = Some(20_000.0);

    let result = run(&spec, EngineKind::AgentStepped, &config).unwrap();
    // With no discontinuation at all, the pinned-stable schedule produces 13
    // treatment visits inside ~2.5 years for every patient. This anchors the
    // expected_visits figure the premature calibration divides over.
    for p in &result.patients {
        assert_eq!(p.history.len(), 13, "patient {} visit count", p.id);
        assert!(p.history.iter().all(|r| r.treatment_given));
    }
}
