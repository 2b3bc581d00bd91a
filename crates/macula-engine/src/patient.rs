//! Patient agent: the mutable record driven forward by the engine.
//!
//! A patient is owned exclusively by the simulation driver for its lifetime
//! and is never deleted: terminal patients simply stop producing visits and
//! remain in the output as a closed timeline. The invariants this type
//! enforces directly (panics, not recoverable errors) are the historically
//! documented defect classes: re-entering the naive state and evaluating
//! discontinuation more than once in a single visit.

use macula_core::{
    DiscontinuationCause, DiseaseState, OutcomeStatus, PatientId, SimDay, TreatmentPhase,
    VisitRecord,
};
use serde::Serialize;

/// One discontinuation episode. A patient may have several if retreatment
/// returns them to active therapy and they later stop again.
#[derive(Debug, Clone, Serialize)]
pub struct DiscontinuationEpisode {
    pub cause: DiscontinuationCause,
    /// Day the cause fired.
    pub day: SimDay,
    /// Underlying vision when treatment stopped; retreatment recovery and
    /// the vision-loss eligibility threshold are measured against this.
    pub vision_at_stop: f64,
    /// Last day of the monitoring window, if this cause monitors.
    pub monitoring_until: Option<SimDay>,
    /// Day retreatment returned the patient to maintenance, if it did.
    pub resumed_day: Option<SimDay>,
}

/// Mutable patient state.
#[derive(Debug, Clone, Serialize)]
pub struct Patient {
    pub id: PatientId,
    /// Arrival day from the staggered enrollment process.
    pub enrollment_day: SimDay,
    /// Age at enrollment (years); drives the mortality hazard.
    pub age_years: f64,
    pub baseline_vision: f64,
    /// Underlying vision, clamped to the baseline-dependent ceiling.
    pub true_vision: f64,
    /// Last reported vision (true vision plus measurement noise).
    pub observed_vision: f64,
    pub disease_state: DiseaseState,
    /// State at the prior visit, for the activity judgment.
    pub previous_state: DiseaseState,
    pub phase: TreatmentPhase,
    /// Current maintenance interval (days).
    pub interval_days: u32,
    /// Cumulative injections given.
    pub injections: u32,
    /// Loading doses delivered so far.
    pub loading_given: u32,
    pub last_injection_day: Option<SimDay>,
    pub last_visit_day: Option<SimDay>,
    /// Consecutive completed visits held at the maximum interval.
    pub max_interval_streak: u32,
    /// Consecutive visits with vision below the poor-response threshold.
    pub poor_vision_streak: u32,
    /// Recurrence present but not yet detected during monitoring.
    pub pending_recurrence: bool,
    pub episodes: Vec<DiscontinuationEpisode>,
    pub retreatment_count: u32,
    pub history: Vec<VisitRecord>,
    /// No further visits will ever be produced for this patient.
    pub closed: bool,
    /// Double-evaluation guard: index of the visit whose discontinuation
    /// check has already run.
    #[serde(skip)]
    discontinuation_evaluated_at: Option<usize>,
}

impl Patient {
    /// Creates a patient at their enrollment day with sampled baseline
    /// vision and age.
    pub fn enroll(id: PatientId, enrollment_day: SimDay, age_years: f64, baseline_vision: f64) -> Self {
        Self {
            id,
            enrollment_day,
            age_years,
            baseline_vision,
            true_vision: baseline_vision,
            observed_vision: baseline_vision,
            disease_state: DiseaseState::Naive,
            previous_state: DiseaseState::Naive,
            phase: TreatmentPhase::Loading,
            interval_days: 0,
            injections: 0,
            loading_given: 0,
            last_injection_day: None,
            last_visit_day: None,
            max_interval_streak: 0,
            poor_vision_streak: 0,
            pending_recurrence: false,
            episodes: Vec::new(),
            retreatment_count: 0,
            history: Vec::new(),
            closed: false,
            discontinuation_evaluated_at: None,
        }
    }

    /// Age on a given simulation day.
    pub fn age_at(&self, day: SimDay) -> f64 {
        self.age_years + f64::from(day.saturating_sub(self.enrollment_day)) / macula_core::DAYS_PER_YEAR
    }

    /// Years since treatment began.
    pub fn years_on_treatment(&self, day: SimDay) -> f64 {
        f64::from(day.saturating_sub(self.enrollment_day)) / macula_core::DAYS_PER_YEAR
    }

    /// The currently open discontinuation episode, if any.
    pub fn active_episode(&self) -> Option<&DiscontinuationEpisode> {
        self.episodes.iter().rev().find(|ep| ep.resumed_day.is_none())
    }

    /// Mutable access to the currently open episode.
    pub fn active_episode_mut(&mut self) -> Option<&mut DiscontinuationEpisode> {
        self.episodes.iter_mut().rev().find(|ep| ep.resumed_day.is_none())
    }

    /// Marks this visit's discontinuation evaluation. Panics on double
    /// evaluation — the historical defect that inflated rates past 100%.
    pub fn mark_discontinuation_evaluated(&mut self, visit_index: usize) {
        assert_ne!(
            self.discontinuation_evaluated_at,
            Some(visit_index),
            "patient {}: discontinuation evaluated twice at visit {visit_index}",
            self.id
        );
        self.discontinuation_evaluated_at = Some(visit_index);
    }

    /// Appends a visit, enforcing timeline invariants.
    pub fn record_visit(&mut self, record: VisitRecord) {
        assert!(
            !self.closed,
            "patient {}: visit recorded on a closed timeline",
            self.id
        );
        assert_eq!(
            record.visit_index,
            self.history.len(),
            "patient {}: visit index out of sequence",
            self.id
        );
        if !self.history.is_empty() {
            assert_ne!(
                record.disease_state,
                DiseaseState::Naive,
                "patient {}: re-entered naive after the first visit",
                self.id
            );
        }
        if let Some(last) = self.history.last() {
            assert!(
                record.day >= last.day,
                "patient {}: visits out of chronological order",
                self.id
            );
            // At most one discontinuation per visit is structural (a single
            // Option field); also forbid a new cause while one is open.
            if record.discontinuation.is_some() {
                assert!(
                    self.active_episode().map_or(true, |ep| ep.day == record.day),
                    "patient {}: discontinuation recorded while already discontinued",
                    self.id
                );
            }
        }
        self.last_visit_day = Some(record.day);
        self.history.push(record);
    }

    /// Whether the patient is receiving active treatment.
    pub fn is_on_treatment(&self) -> bool {
        matches!(self.phase, TreatmentPhase::Loading | TreatmentPhase::Maintenance)
            && self.active_episode().is_none()
    }

    /// The population-accounting bucket this patient occupies on `day`.
    ///
    /// Every enrolled patient is in exactly one bucket at every day; the
    /// conservation audit sums these across the cohort.
    pub fn status_at(&self, day: SimDay) -> OutcomeStatus {
        if day < self.enrollment_day {
            return OutcomeStatus::NotYetEnrolled;
        }
        let mut status = OutcomeStatus::OnTreatment;
        for ep in &self.episodes {
            if ep.day > day {
                break;
            }
            if let Some(resumed) = ep.resumed_day {
                if resumed <= day {
                    status = OutcomeStatus::OnTreatment;
                    continue;
                }
            }
            status = if ep.cause.is_terminal() {
                OutcomeStatus::Deceased
            } else if ep.cause.is_censoring() {
                OutcomeStatus::Discontinued(ep.cause)
            } else if ep.monitoring_until.map_or(false, |until| day <= until) {
                OutcomeStatus::Monitoring(ep.cause)
            } else {
                OutcomeStatus::Discontinued(ep.cause)
            };
        }
        status
    }

    /// Final observed vision, if the patient had any visits.
    pub fn final_vision(&self) -> Option<f64> {
        self.history.last().map(|r| r.vision_letters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(day: SimDay, index: usize, state: DiseaseState) -> VisitRecord {
        VisitRecord {
            day,
            visit_index: index,
            phase: TreatmentPhase::Maintenance,
            disease_state: state,
            vision_letters: 60.0,
            treatment_given: true,
            interval_used_days: 28,
            discontinuation: None,
            retreatment: false,
        }
    }

    #[test]
    #[should_panic(expected = "re-entered naive")]
    fn test_naive_reentry_panics() {
        let mut p = Patient::enroll(0, 0, 75.0, 60.0);
        p.record_visit(visit(0, 0, DiseaseState::Naive));
        p.record_visit(visit(28, 1, DiseaseState::Stable));
        p.record_visit(visit(56, 2, DiseaseState::Naive));
    }

    #[test]
    #[should_panic(expected = "evaluated twice")]
    fn test_double_discontinuation_evaluation_panics() {
        let mut p = Patient::enroll(0, 0, 75.0, 60.0);
        p.mark_discontinuation_evaluated(3);
        p.mark_discontinuation_evaluated(3);
    }

    #[test]
    fn test_sequential_evaluations_allowed() {
        let mut p = Patient::enroll(0, 0, 75.0, 60.0);
        p.mark_discontinuation_evaluated(0);
        p.mark_discontinuation_evaluated(1);
        p.mark_discontinuation_evaluated(2);
    }

    #[test]
    fn test_status_transitions_through_episode() {
        let mut p = Patient::enroll(0, 10, 75.0, 60.0);
        p.episodes.push(DiscontinuationEpisode {
            cause: DiscontinuationCause::Planned,
            day: 200,
            vision_at_stop: 65.0,
            monitoring_until: Some(500),
            resumed_day: Some(400),
        });
        assert_eq!(p.status_at(5), OutcomeStatus::NotYetEnrolled);
        assert_eq!(p.status_at(100), OutcomeStatus::OnTreatment);
        assert_eq!(
            p.status_at(300),
            OutcomeStatus::Monitoring(DiscontinuationCause::Planned)
        );
        assert_eq!(p.status_at(450), OutcomeStatus::OnTreatment);
    }

    #[test]
    fn test_status_after_monitoring_window_is_discontinued() {
        let mut p = Patient::enroll(0, 0, 75.0, 60.0);
        p.episodes.push(DiscontinuationEpisode {
            cause: DiscontinuationCause::Premature,
            day: 100,
            vision_at_stop: 60.0,
            monitoring_until: Some(300),
            resumed_day: None,
        });
        assert_eq!(
            p.status_at(250),
            OutcomeStatus::Monitoring(DiscontinuationCause::Premature)
        );
        assert_eq!(
            p.status_at(301),
            OutcomeStatus::Discontinued(DiscontinuationCause::Premature)
        );
    }

    #[test]
    fn test_deceased_is_terminal() {
        let mut p = Patient::enroll(0, 0, 80.0, 55.0);
        p.episodes.push(DiscontinuationEpisode {
            cause: DiscontinuationCause::Mortality,
            day: 150,
            vision_at_stop: 50.0,
            monitoring_until: None,
            resumed_day: None,
        });
        assert_eq!(p.status_at(150), OutcomeStatus::Deceased);
        assert_eq!(p.status_at(10_000), OutcomeStatus::Deceased);
    }
}
