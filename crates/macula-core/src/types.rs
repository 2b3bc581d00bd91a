//! Core data types for the MACULA treatment-pathway simulation.

use serde::{Deserialize, Serialize};

/// Patient identifier within a single simulation run.
pub type PatientId = usize;

/// Day offset from the start of the simulation.
pub type SimDay = u32;

/// Mean calendar-year length used for all rate conversions.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Disease activity state.
///
/// Abstract proxy for combined anatomical/functional disease activity.
/// `Naive` is the pre-treatment entry state only: once a patient has
/// transitioned out of it, it is never re-entered (the engine asserts this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseState {
    Naive,
    Stable,
    Active,
    HighlyActive,
}

impl DiseaseState {
    /// All states, in matrix-row order.
    pub const ALL: [DiseaseState; 4] = [
        DiseaseState::Naive,
        DiseaseState::Stable,
        DiseaseState::Active,
        DiseaseState::HighlyActive,
    ];

    /// Row/column index for transition-matrix lookups.
    pub fn index(self) -> usize {
        match self {
            DiseaseState::Naive => 0,
            DiseaseState::Stable => 1,
            DiseaseState::Active => 2,
            DiseaseState::HighlyActive => 3,
        }
    }

    /// Whether the state counts as active disease for interval decisions.
    pub fn is_active(self) -> bool {
        matches!(self, DiseaseState::Active | DiseaseState::HighlyActive)
    }

    /// Single point of string serialization, used only at the output-table
    /// boundary. Internal logic operates on the enum.
    pub fn as_str(self) -> &'static str {
        match self {
            DiseaseState::Naive => "naive",
            DiseaseState::Stable => "stable",
            DiseaseState::Active => "active",
            DiseaseState::HighlyActive => "highly_active",
        }
    }
}

/// Cause of treatment discontinuation, in strict evaluation-priority order.
///
/// Exactly one cause can fire per visit: the manager checks these in
/// `priority()` order and stops at the first match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuationCause {
    /// Death. Terminal; no monitoring, no retreatment.
    Mortality,
    /// Treatment failure: vision below threshold for consecutive visits.
    PoorResponse,
    /// Clinical judgment: stable too long / no further improvement expected.
    CourseComplete,
    /// Protocol-defined planned stop after sustained max interval.
    Planned,
    /// Lost to follow-up. Censoring; no monitoring schedule.
    Administrative,
    /// Patient-initiated / non-adherence. Calibrated to a target
    /// cumulative rate, not a raw per-visit probability.
    Premature,
}

impl DiscontinuationCause {
    /// All causes, in evaluation-priority order.
    pub const ALL: [DiscontinuationCause; 6] = [
        DiscontinuationCause::Mortality,
        DiscontinuationCause::PoorResponse,
        DiscontinuationCause::CourseComplete,
        DiscontinuationCause::Planned,
        DiscontinuationCause::Administrative,
        DiscontinuationCause::Premature,
    ];

    /// Evaluation priority (lower fires first).
    pub fn priority(self) -> u8 {
        match self {
            DiscontinuationCause::Mortality => 0,
            DiscontinuationCause::PoorResponse => 1,
            DiscontinuationCause::CourseComplete => 2,
            DiscontinuationCause::Planned => 3,
            DiscontinuationCause::Administrative => 4,
            DiscontinuationCause::Premature => 5,
        }
    }

    /// Terminal causes close the timeline outright.
    pub fn is_terminal(self) -> bool {
        matches!(self, DiscontinuationCause::Mortality)
    }

    /// Censoring causes end observation without monitoring.
    pub fn is_censoring(self) -> bool {
        matches!(self, DiscontinuationCause::Administrative)
    }

    /// Output-boundary string form.
    pub fn as_str(self) -> &'static str {
        match self {
            DiscontinuationCause::Mortality => "mortality",
            DiscontinuationCause::PoorResponse => "poor_response",
            DiscontinuationCause::CourseComplete => "course_complete",
            DiscontinuationCause::Planned => "planned",
            DiscontinuationCause::Administrative => "administrative",
            DiscontinuationCause::Premature => "premature",
        }
    }
}

/// Per-patient treatment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentPhase {
    /// Fixed-schedule initial injection series.
    Loading,
    /// Treat-and-extend interval adjustment.
    Maintenance,
    /// Post-discontinuation monitoring on a cause-specific schedule.
    Monitoring(DiscontinuationCause),
}

impl TreatmentPhase {
    /// Output-boundary string form.
    pub fn as_str(self) -> &'static str {
        match self {
            TreatmentPhase::Loading => "loading",
            TreatmentPhase::Maintenance => "maintenance",
            TreatmentPhase::Monitoring(_) => "monitoring",
        }
    }
}

/// Population-accounting bucket for a patient at a given time point.
///
/// Every enrolled patient is in exactly one bucket at every observed day;
/// the conservation audit sums these against the enrolled count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeStatus {
    /// Enrollment day is still in the future.
    NotYetEnrolled,
    /// Receiving active treatment (loading or maintenance).
    OnTreatment,
    /// Discontinued for a cause with a monitoring schedule still running.
    Monitoring(DiscontinuationCause),
    /// Discontinued with no further observation (censored or schedule done).
    Discontinued(DiscontinuationCause),
    /// Deceased.
    Deceased,
}

/// One row of a patient's visit history.
///
/// This is the stable contract consumed by the visualization and cost
/// layers: date, disease state, vision, treatment flag, and the
/// discontinuation/retreatment markers must remain present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Day offset from simulation start.
    pub day: SimDay,
    /// 0-based index within this patient's history.
    pub visit_index: usize,
    /// Phase the patient was in when the visit occurred.
    pub phase: TreatmentPhase,
    /// Disease state after this visit's transition.
    pub disease_state: DiseaseState,
    /// Observed vision (ETDRS letters) after this visit.
    pub vision_letters: f64,
    /// Whether an injection was given at this visit.
    pub treatment_given: bool,
    /// Post-adjustment interval (days) going forward from this visit: at
    /// treatment and retreatment visits, the interval the next visit is
    /// scheduled at. Monitoring records carry the interval held when
    /// treatment stopped.
    pub interval_used_days: u32,
    /// Discontinuation event recorded at this visit, if any.
    pub discontinuation: Option<DiscontinuationCause>,
    /// Whether a retreatment (return to maintenance) occurred at this visit.
    pub retreatment: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_indices_match_all_order() {
        for (i, state) in DiseaseState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }

    #[test]
    fn test_activity_judgment() {
        assert!(!DiseaseState::Naive.is_active());
        assert!(!DiseaseState::Stable.is_active());
        assert!(DiseaseState::Active.is_active());
        assert!(DiseaseState::HighlyActive.is_active());
    }

    #[test]
    fn test_cause_priority_is_strictly_ordered() {
        let priorities: Vec<u8> = DiscontinuationCause::ALL
            .iter()
            .map(|c| c.priority())
            .collect();
        for w in priorities.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_mortality_terminal_administrative_censoring() {
        assert!(DiscontinuationCause::Mortality.is_terminal());
        assert!(!DiscontinuationCause::Planned.is_terminal());
        assert!(DiscontinuationCause::Administrative.is_censoring());
        assert!(!DiscontinuationCause::Premature.is_censoring());
    }

    #[test]
    fn test_state_string_roundtrip_is_single_point() {
        // Serde names match as_str so the output boundary is consistent.
        let json = serde_json::to_string(&DiseaseState::HighlyActive).unwrap();
        assert_eq!(json, "\"highly_active\"");
        assert_eq!(DiseaseState::HighlyActive.as_str(), "highly_active");
    }
}
