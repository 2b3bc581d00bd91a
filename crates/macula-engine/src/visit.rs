//! The shared per-visit pipeline.
//!
//! Both drivers (agent-stepped and event-driven) advance patients through
//! this single implementation, which is what makes them statistically
//! equivalent: each visit samples the disease transition, the vision
//! outcome, evaluates discontinuation exactly once, records the visit, and
//! returns the next scheduled visit (None closes the timeline or leaves the
//! patient waiting past the horizon).

use crate::discontinuation::{DiscontinuationManager, MonitoringOutcome};
use crate::disease::DiseaseModel;
use crate::intervals::{ActivitySignal, IntervalEngine};
use crate::patient::{DiscontinuationEpisode, Patient};
use crate::vision::VisionModel;
use macula_core::{
    DiscontinuationCause, DiseaseState, MaculaError, SimDay, TreatmentPhase, VisitRecord,
    DAYS_PER_YEAR,
};
use macula_protocol::ProtocolSpec;
use rand::Rng;

/// Kind of scheduled visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisitKind {
    Treatment,
    Monitoring,
}

/// The next visit a patient is due for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledVisit {
    pub day: SimDay,
    pub kind: VisitKind,
}

/// The protocol-configured engine components, built once per run and shared
/// immutably across all patients.
#[derive(Debug, Clone)]
pub struct Components {
    pub disease: DiseaseModel,
    pub vision: VisionModel,
    pub intervals: IntervalEngine,
    pub discontinuation: DiscontinuationManager,
    baseline_age: macula_protocol::AgeDistribution,
}

impl Components {
    pub fn from_spec(spec: &ProtocolSpec) -> Result<Self, MaculaError> {
        Ok(Self {
            disease: DiseaseModel::new(spec)?,
            vision: VisionModel::new(spec),
            intervals: IntervalEngine::new(spec),
            discontinuation: DiscontinuationManager::new(spec)?,
            baseline_age: spec.baseline_age,
        })
    }

    /// Creates a patient at their arrival day with sampled age and baseline
    /// vision.
    pub fn enroll_patient<R: Rng>(
        &self,
        id: macula_core::PatientId,
        arrival_day: SimDay,
        rng: &mut R,
    ) -> Result<Patient, MaculaError> {
        let a = self.baseline_age;
        let age = if a.std > 0.0 {
            use rand_distr::Distribution;
            rand_distr::Normal::new(a.mean, a.std)
                .map_err(|e| MaculaError::sampling(format!("age distribution: {e}")))?
                .sample(rng)
                .clamp(a.min, a.max)
        } else {
            a.mean
        };
        let baseline = self.vision.sample_baseline(rng)?;
        Ok(Patient::enroll(id, arrival_day, age, baseline))
    }
}

/// Processes one visit for a patient, returning the next scheduled visit.
///
/// Returns `Ok(None)` when the timeline produces no further visits before
/// the horizon: terminal/censoring discontinuation, monitoring exhausted, or
/// the next visit falling past the horizon (the patient then stays in their
/// current bucket at horizon end, never forced terminal).
pub fn process_visit<R: Rng>(
    patient: &mut Patient,
    day: SimDay,
    components: &Components,
    horizon: SimDay,
    rng: &mut R,
) -> Result<Option<ScheduledVisit>, MaculaError> {
    debug_assert!(!patient.closed, "visit processed on closed timeline");
    match patient.phase {
        TreatmentPhase::Loading | TreatmentPhase::Maintenance => {
            treatment_visit(patient, day, components, horizon, rng)
        }
        TreatmentPhase::Monitoring(cause) => {
            monitoring_visit(patient, day, cause, components, horizon, rng)
        }
    }
}

fn treatment_visit<R: Rng>(
    patient: &mut Patient,
    day: SimDay,
    components: &Components,
    horizon: SimDay,
    rng: &mut R,
) -> Result<Option<ScheduledVisit>, MaculaError> {
    let visit_index = patient.history.len();
    let first_visit = visit_index == 0;
    let interval_since_last = patient
        .last_visit_day
        .map_or(0, |last| day.saturating_sub(last));

    // Disease and vision evolve over the elapsed interval. The enrollment
    // visit records the sampled baseline unchanged: the first transition out
    // of naive happens at the second visit.
    if !first_visit {
        let treated_since_last = patient.last_injection_day.is_some();
        let next_state =
            components
                .disease
                .sample_next_state(patient.disease_state, treated_since_last, rng)?;
        patient.previous_state = patient.disease_state;
        patient.disease_state = next_state;

        let days_since_injection = patient.last_injection_day.map(|d| day.saturating_sub(d));
        let outcome = components.vision.sample_outcome(
            patient.disease_state,
            treated_since_last,
            days_since_injection,
            patient.true_vision,
            patient.baseline_vision,
            rng,
        )?;
        patient.true_vision = outcome.true_vision;
        patient.observed_vision = outcome.observed_vision;
    }

    // Poor-vision streak includes this visit's reading.
    if patient.observed_vision < components.discontinuation.poor_vision_threshold() {
        patient.poor_vision_streak += 1;
    } else {
        patient.poor_vision_streak = 0;
    }

    // Discontinuation: exactly once per visit, first match wins.
    patient.mark_discontinuation_evaluated(visit_index);
    let fired = components.discontinuation.evaluate(
        patient,
        day,
        interval_since_last,
        rng,
        components.intervals.stable_visits_for_planned(),
    );

    if let Some(cause) = fired {
        return discontinue(patient, day, visit_index, cause, components, horizon);
    }

    // Inject and adjust the schedule.
    patient.injections += 1;
    patient.last_injection_day = Some(day);

    let interval_for_next = match patient.phase {
        TreatmentPhase::Loading => {
            patient.loading_given += 1;
            if patient.loading_given >= components.intervals.loading_doses() {
                patient.phase = TreatmentPhase::Maintenance;
                patient.interval_days = components.intervals.initial_maintenance_interval();
                patient.interval_days
            } else {
                components.intervals.loading_interval()
            }
        }
        TreatmentPhase::Maintenance => {
            let signal = ActivitySignal::judge(patient.disease_state, patient.previous_state);
            patient.interval_days = components.intervals.adjust(patient.interval_days, signal);
            if components.intervals.at_max(patient.interval_days)
                && signal == ActivitySignal::Inactive
            {
                patient.max_interval_streak += 1;
            } else {
                patient.max_interval_streak = 0;
            }
            patient.interval_days
        }
        TreatmentPhase::Monitoring(_) => unreachable!("treatment visit in monitoring phase"),
    };

    patient.record_visit(VisitRecord {
        day,
        visit_index,
        phase: patient.phase,
        disease_state: patient.disease_state,
        vision_letters: patient.observed_vision,
        treatment_given: true,
        interval_used_days: interval_for_next,
        discontinuation: None,
        retreatment: false,
    });

    let next = day + interval_for_next;
    if next > horizon {
        // Still on treatment when the simulation ends.
        return Ok(None);
    }
    Ok(Some(ScheduledVisit {
        day: next,
        kind: VisitKind::Treatment,
    }))
}

fn discontinue(
    patient: &mut Patient,
    day: SimDay,
    visit_index: usize,
    cause: DiscontinuationCause,
    components: &Components,
    horizon: SimDay,
) -> Result<Option<ScheduledVisit>, MaculaError> {
    let plan = components.discontinuation.plan_for(cause);
    let monitoring_until =
        plan.map(|p| day + (p.duration_years * DAYS_PER_YEAR).round() as SimDay);

    patient.episodes.push(DiscontinuationEpisode {
        cause,
        day,
        vision_at_stop: patient.true_vision,
        monitoring_until,
        resumed_day: None,
    });
    patient.pending_recurrence = false;

    patient.record_visit(VisitRecord {
        day,
        visit_index,
        phase: patient.phase,
        disease_state: patient.disease_state,
        vision_letters: patient.observed_vision,
        treatment_given: false,
        interval_used_days: patient.interval_days,
        discontinuation: Some(cause),
        retreatment: false,
    });

    log::trace!(
        "patient {} discontinued ({}) on day {day}",
        patient.id,
        cause.as_str()
    );

    if let Some(plan) = plan {
        patient.phase = TreatmentPhase::Monitoring(cause);
        let next = day + plan.visit_interval_days;
        let until = monitoring_until.unwrap_or(0);
        if next <= horizon && next <= until {
            return Ok(Some(ScheduledVisit {
                day: next,
                kind: VisitKind::Monitoring,
            }));
        }
        // Horizon (or window end) before the first monitoring visit: the
        // outcome stays "discontinued, status at horizon end".
        return Ok(None);
    }

    // Terminal (mortality) or censoring (administrative): timeline closed.
    patient.closed = true;
    Ok(None)
}

fn monitoring_visit<R: Rng>(
    patient: &mut Patient,
    day: SimDay,
    cause: DiscontinuationCause,
    components: &Components,
    horizon: SimDay,
    rng: &mut R,
) -> Result<Option<ScheduledVisit>, MaculaError> {
    let visit_index = patient.history.len();

    // Untreated disease and vision evolution over the gap.
    let next_state = components
        .disease
        .sample_next_state(patient.disease_state, false, rng)?;
    patient.previous_state = patient.disease_state;
    patient.disease_state = next_state;

    let outcome = components.vision.sample_outcome(
        patient.disease_state,
        false,
        None,
        patient.true_vision,
        patient.baseline_vision,
        rng,
    )?;
    patient.true_vision = outcome.true_vision;
    patient.observed_vision = outcome.observed_vision;

    let episode = patient
        .active_episode()
        .expect("monitoring phase without an open discontinuation episode");
    let episode_day = episode.day;
    let vision_at_stop = episode.vision_at_stop;
    let monitoring_until = episode.monitoring_until.unwrap_or(0);

    // Mortality hazard keeps accruing over the monitoring gap.
    let gap_days = day.saturating_sub(patient.last_visit_day.unwrap_or(episode_day));
    patient.mark_discontinuation_evaluated(visit_index);
    let p_death = components
        .discontinuation
        .mortality_probability(patient.age_at(day), gap_days);
    if p_death > 0.0 && rng.gen_bool(p_death.min(1.0)) {
        patient.episodes.push(DiscontinuationEpisode {
            cause: DiscontinuationCause::Mortality,
            day,
            vision_at_stop: patient.true_vision,
            monitoring_until: None,
            resumed_day: None,
        });
        patient.record_visit(VisitRecord {
            day,
            visit_index,
            phase: TreatmentPhase::Monitoring(cause),
            disease_state: patient.disease_state,
            vision_letters: patient.observed_vision,
            treatment_given: false,
            interval_used_days: patient.interval_days,
            discontinuation: Some(DiscontinuationCause::Mortality),
            retreatment: false,
        });
        patient.closed = true;
        return Ok(None);
    }

    let t1 = f64::from(day.saturating_sub(episode_day));
    let t0 = f64::from(
        patient
            .last_visit_day
            .unwrap_or(episode_day)
            .saturating_sub(episode_day),
    );
    let vision_loss = vision_at_stop - patient.true_vision;

    let monitoring_outcome = components.discontinuation.monitoring_visit(
        cause,
        patient.pending_recurrence,
        t0,
        t1,
        vision_loss,
        rng,
    );

    match monitoring_outcome {
        MonitoringOutcome::Retreat => {
            // Partial recovery: a configured fraction of the loss since
            // discontinuation is regained, so post-retreatment vision lies
            // strictly between the at-recurrence and pre-stop values.
            let recovery_fraction = components.vision.recovery_fraction();
            let recovered = patient.true_vision + recovery_fraction * vision_loss.max(0.0);
            patient.true_vision = recovered.min(components.vision.ceiling_for(patient.baseline_vision));
            patient.observed_vision = patient.true_vision;

            if !patient.disease_state.is_active() {
                // A detected recurrence is by definition active disease.
                patient.disease_state = DiseaseState::Active;
            }
            patient.pending_recurrence = false;
            patient.retreatment_count += 1;
            patient.phase = TreatmentPhase::Maintenance;
            patient.interval_days = components.intervals.retreat_interval();
            patient.max_interval_streak = 0;
            patient
                .active_episode_mut()
                .expect("retreat without open episode")
                .resumed_day = Some(day);

            patient.injections += 1;
            patient.last_injection_day = Some(day);

            patient.record_visit(VisitRecord {
                day,
                visit_index,
                phase: TreatmentPhase::Monitoring(cause),
                disease_state: patient.disease_state,
                vision_letters: patient.observed_vision,
                treatment_given: true,
                interval_used_days: patient.interval_days,
                discontinuation: None,
                retreatment: true,
            });

            log::trace!(
                "patient {} retreated on day {day} after {} recurrence",
                patient.id,
                cause.as_str()
            );

            let next = day + patient.interval_days;
            if next > horizon {
                return Ok(None);
            }
            return Ok(Some(ScheduledVisit {
                day: next,
                kind: VisitKind::Treatment,
            }));
        }
        MonitoringOutcome::UndetectedRecurrence => {
            patient.pending_recurrence = true;
        }
        MonitoringOutcome::DetectedNoRetreat => {
            // Known recurrence without restart; stays eligible next visit.
            patient.pending_recurrence = true;
        }
        MonitoringOutcome::NoRecurrence => {}
    }

    patient.record_visit(VisitRecord {
        day,
        visit_index,
        phase: TreatmentPhase::Monitoring(cause),
        disease_state: patient.disease_state,
        vision_letters: patient.observed_vision,
        treatment_given: false,
        interval_used_days: patient.interval_days,
        discontinuation: None,
        retreatment: false,
    });

    let plan = components
        .discontinuation
        .plan_for(cause)
        .expect("monitoring visit for cause without a plan");
    let next = day + plan.visit_interval_days;
    if next > horizon || next > monitoring_until {
        // Monitoring schedule exhausted (bucket becomes "discontinued") or
        // horizon reached mid-monitoring (censored, never forced terminal).
        return Ok(None);
    }
    Ok(Some(ScheduledVisit {
        day: next,
        kind: VisitKind::Monitoring,
    }))
}
