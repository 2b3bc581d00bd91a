//! Population accounting over full runs: conservation of patients across
//! outcome buckets, vision bounds, and early-stop behavior.

use macula_core::OutcomeStatus;
use macula_engine::{conservation_audit, run, EngineKind, RunConfig};
use macula_protocol::loader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn test_patients_are_conserved_across_buckets() {
    let _ = env_logger::builder().is_test(true).try_init();
    let spec = loader::reference_protocol().unwrap();
    let config = RunConfig::new(400, 5.0, 3);

    for engine in [EngineKind::AgentStepped, EngineKind::EventDriven] {
        let result = run(&spec, engine, &config).unwrap();
        // assemble() already audits at a coarse grid; re-check densely.
        conservation_audit(&result.patients, result.horizon_days, 73).unwrap();

        // At the horizon every enrolled patient sits in exactly one bucket.
        let mut buckets = 0usize;
        for p in &result.patients {
            match p.status_at(result.horizon_days) {
                OutcomeStatus::NotYetEnrolled => {}
                _ => buckets += 1,
            }
        }
        assert_eq!(buckets, result.summary.enrolled);
        assert_eq!(
            result.summary.enrolled,
            result.summary.on_treatment_at_horizon
                + result.summary.in_monitoring_at_horizon
                + result.summary.deaths
                + result
                    .patients
                    .iter()
                    .filter(|p| matches!(
                        p.status_at(result.horizon_days),
                        OutcomeStatus::Discontinued(_)
                    ))
                    .count()
        );
    }
}

#[test]
fn test_vision_and_timeline_bounds_hold_over_a_long_run() {
    let spec = loader::reference_protocol().unwrap();
    let result = run(&spec, EngineKind::AgentStepped, &RunConfig::new(500, 5.0, 17)).unwrap();

    let mut saw_discontinuation = false;
    for p in &result.patients {
        for (i, r) in p.history.iter().enumerate() {
            assert!((0.0..=100.0).contains(&r.vision_letters));
            assert_eq!(r.visit_index, i);
            if i > 0 {
                assert!(r.day >= p.history[i - 1].day);
                assert_ne!(r.disease_state.as_str(), "naive");
            }
        }
        saw_discontinuation |= !p.episodes.is_empty();
    }
    // A 5-year cohort with the reference rules produces discontinuations.
    assert!(saw_discontinuation);
    assert!(result.summary.deaths > 0);
}

#[test]
fn test_early_stop_yields_a_consistent_partial_result() {
    let spec = loader::reference_protocol().unwrap();
    let flag = Arc::new(AtomicBool::new(true));

    for engine in [EngineKind::AgentStepped, EngineKind::EventDriven] {
        let mut config = RunConfig::new(200, 3.0, 5);
        config.stop_flag = Some(Arc::clone(&flag));
        // Flag raised before the run: whatever subset comes back must still
        // pass the audit, with no half-written timelines.
        let result = run(&spec, engine, &config).unwrap();
        assert!(result.patients.len() <= 200);
        conservation_audit(&result.patients, result.horizon_days, 36).unwrap();
    }

    // An unset flag changes nothing.
    let mut config = RunConfig::new(50, 2.0, 5);
    config.stop_flag = Some(Arc::new(AtomicBool::new(false)));
    let with_flag = run(&spec, EngineKind::AgentStepped, &config).unwrap();
    let without = run(&spec, EngineKind::AgentStepped, &RunConfig::new(50, 2.0, 5)).unwrap();
    assert_eq!(with_flag.summary.total_injections, without.summary.total_injections);
}

#[test]
fn test_early_stop_never_keeps_truncated_timelines() {
    let spec = loader::reference_protocol().unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let mut config = RunConfig::new(50, 3.0, 9);
    config.stop_flag = Some(flag);

    let result = run(&spec, EngineKind::EventDriven, &config).unwrap();
    // Every kept patient's event chain ran to its natural end. A patient
    // whose next visit was still queued when the flag was observed must be
    // excluded, not kept with an empty or cut-short history.
    for p in &result.patients {
        assert!(
            !p.history.is_empty() || p.enrollment_day > result.horizon_days,
            "patient {} kept with a truncated timeline (enrolled day {})",
            p.id,
            p.enrollment_day
        );
    }
}
