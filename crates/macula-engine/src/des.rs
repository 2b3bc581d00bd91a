//! Event-driven (DES) simulation driver.
//!
//! A global priority queue of (day, patient, kind) entries is drained in
//! chronological order; executing an event enqueues the patient's next one.
//! The per-patient RNG streams and the visit pipeline are identical to the
//! agent-stepped driver, so the two produce statistically equivalent
//! population outcomes from the same seed family.

use crate::enrollment;
use crate::output::SimulationResult;
use crate::patient::Patient;
use crate::visit::{process_visit, Components, VisitKind};
use crate::{enrollment_stream, patient_stream, RunConfig};
use macula_core::{MaculaError, PatientId, SimDay};
use macula_protocol::ProtocolSpec;
use rand_chacha::ChaCha8Rng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering;

/// One scheduled simulation event. Ordering is (day, patient, kind) so the
/// queue drains deterministically when days tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SimEvent {
    day: SimDay,
    patient_id: PatientId,
    kind: VisitKind,
}

/// Runs the event-driven driver.
pub fn run_event_driven(
    spec: &ProtocolSpec,
    run: &RunConfig,
) -> Result<SimulationResult, MaculaError> {
    run.validate()?;
    let components = Components::from_spec(spec)?;
    let horizon = run.horizon_days();

    let arrivals = {
        let mut rng = enrollment_stream(run.seed);
        enrollment::sample_arrival_days(run.effective_arrival_rate(spec), run.n_patients, &mut rng)?
    };

    log::info!(
        "event-driven run: {} patients, horizon {horizon} days, seed {}",
        run.n_patients,
        run.seed
    );

    let mut patients: Vec<Patient> = Vec::with_capacity(run.n_patients);
    let mut rngs: Vec<ChaCha8Rng> = Vec::with_capacity(run.n_patients);
    let mut queue: BinaryHeap<Reverse<SimEvent>> = BinaryHeap::with_capacity(run.n_patients);

    for (id, &arrival) in arrivals.iter().enumerate() {
        let mut rng = patient_stream(run.seed, id);
        let patient = components.enroll_patient(id, arrival, &mut rng)?;
        if arrival <= horizon {
            queue.push(Reverse(SimEvent {
                day: arrival,
                patient_id: id,
                kind: VisitKind::Treatment,
            }));
        }
        patients.push(patient);
        rngs.push(rng);
    }

    let mut stopped = false;
    while let Some(Reverse(event)) = queue.pop() {
        if let Some(flag) = &run.stop_flag {
            if flag.load(Ordering::Relaxed) {
                // Put the unprocessed event back so its patient is counted
                // as in-flight below, not kept with a truncated timeline.
                queue.push(Reverse(event));
                stopped = true;
                break;
            }
        }
        debug_assert!(event.day <= horizon, "event scheduled past the horizon");
        let id = event.patient_id;
        let next = process_visit(
            &mut patients[id],
            event.day,
            &components,
            horizon,
            &mut rngs[id],
        )?;
        if let Some(visit) = next {
            debug_assert!(visit.day >= event.day, "events must move forward in time");
            queue.push(Reverse(SimEvent {
                day: visit.day,
                patient_id: id,
                kind: visit.kind,
            }));
        }
    }

    if stopped {
        // Early stop: drop patients whose event chains were cut short so the
        // partial result contains only complete, well-formed timelines.
        let mut in_flight = vec![false; patients.len()];
        for Reverse(event) in queue.drain() {
            in_flight[event.patient_id] = true;
        }
        let kept: Vec<Patient> = patients
            .into_iter()
            .zip(in_flight)
            .filter_map(|(p, cut)| (!cut).then_some(p))
            .collect();
        log::warn!(
            "event-driven run stopped early: {} complete timelines kept",
            kept.len()
        );
        return SimulationResult::assemble(spec, run, "event_driven", kept);
    }

    log::info!("event-driven run complete: {} patients simulated", patients.len());
    SimulationResult::assemble(spec, run, "event_driven", patients)
}
