//! Agent-stepped (ABS) simulation driver.
//!
//! Patients never interact, so the population is advanced patient-by-patient
//! in parallel with rayon. Each patient owns an independent `ChaCha8Rng`
//! stream derived from the master seed and their id, which keeps runs
//! reproducible regardless of thread scheduling and lets the event-driven
//! driver consume the exact same streams.

use crate::enrollment;
use crate::output::SimulationResult;
use crate::patient::Patient;
use crate::visit::{process_visit, Components, ScheduledVisit, VisitKind};
use crate::{enrollment_stream, patient_stream, RunConfig};
use macula_core::{MaculaError, SimDay};
use macula_protocol::ProtocolSpec;
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::Ordering;

/// Advances one patient from enrollment to their last visit before the
/// horizon. Visit N+1 cannot be computed before visit N resolves: state
/// carries forward, so each timeline is strictly sequential.
pub(crate) fn simulate_patient<R: Rng>(
    patient: &mut Patient,
    components: &Components,
    horizon: SimDay,
    rng: &mut R,
) -> Result<(), MaculaError> {
    let mut next = Some(ScheduledVisit {
        day: patient.enrollment_day,
        kind: VisitKind::Treatment,
    });
    while let Some(visit) = next {
        if visit.day > horizon {
            break;
        }
        next = process_visit(patient, visit.day, components, horizon, rng)?;
    }
    Ok(())
}

/// Runs the agent-stepped driver.
pub fn run_agent_stepped(
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
        "agent-stepped run: {} patients, horizon {horizon} days, seed {}",
        run.n_patients,
        run.seed
    );

    let simulated: Vec<Option<Patient>> = arrivals
        .par_iter()
        .enumerate()
        .map(|(id, &arrival)| -> Result<Option<Patient>, MaculaError> {
            if let Some(flag) = &run.stop_flag {
                // Early stop: patients not yet reached are absent from the
                // result, never half-mutated.
                if flag.load(Ordering::Relaxed) {
                    return Ok(None);
                }
            }
            let mut rng = patient_stream(run.seed, id);
            let mut patient = components.enroll_patient(id, arrival, &mut rng)?;
            if arrival <= horizon {
                simulate_patient(&mut patient, &components, horizon, &mut rng)?;
            }
            Ok(Some(patient))
        })
        .collect::<Result<_, _>>()?;

    let patients: Vec<Patient> = simulated.into_iter().flatten().collect();
    log::info!("agent-stepped run complete: {} patients simulated", patients.len());
    SimulationResult::assemble(spec, run, "agent_stepped", patients)
}
