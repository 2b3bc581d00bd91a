//! Discontinuation and retreatment manager.
//!
//! Evaluates the competing termination causes exactly once per treatment
//! visit, in strict first-match priority order: mortality, poor response,
//! course complete (clinical judgment), planned, administrative, premature.
//! The ordering is a design decision, not incidental — only one cause can
//! fire per visit, which keeps per-cause rates auditable.
//!
//! Cumulative clinical targets (the premature discontinuation rate, the
//! 1/3/5-year recurrence curves) are converted to per-visit probabilities
//! once, at construction, via [`crate::calibration`].

use crate::calibration::{per_visit_probability, CumulativeHazardCurve};
use crate::patient::Patient;
use macula_core::{DiscontinuationCause, MaculaError, SimDay, DAYS_PER_YEAR};
use macula_protocol::{DiscontinuationRules, MonitoringPlan, ProtocolSpec};
use rand::Rng;
use std::collections::BTreeMap;

/// Outcome of one monitoring visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringOutcome {
    /// No recurrence so far.
    NoRecurrence,
    /// Recurrence present but missed by this visit's assessment.
    UndetectedRecurrence,
    /// Recurrence detected, but retreatment not started (insufficient vision
    /// loss, or the restart draw failed). Monitoring continues.
    DetectedNoRetreat,
    /// Retreatment starts: the patient returns to maintenance.
    Retreat,
}

/// Monitoring plan with its precomputed recurrence hazard curve.
#[derive(Debug, Clone)]
struct MonitoringProgram {
    plan: MonitoringPlan,
    curve: CumulativeHazardCurve,
}

/// Competing-cause discontinuation manager.
#[derive(Debug, Clone)]
pub struct DiscontinuationManager {
    rules: DiscontinuationRules,
    /// Calibrated per-visit premature probability (never the raw cumulative
    /// rate).
    premature_per_visit: f64,
    monitoring: BTreeMap<DiscontinuationCause, MonitoringProgram>,
}

impl DiscontinuationManager {
    pub fn new(spec: &ProtocolSpec) -> Result<Self, MaculaError> {
        let rules = spec.discontinuation.clone();
        let premature_per_visit = per_visit_probability(
            rules.premature.target_cumulative_rate,
            rules.premature.expected_visits,
        )?;
        log::debug!(
            "premature discontinuation: cumulative target {:.3} over {:.1} visits -> per-visit {:.5}",
            rules.premature.target_cumulative_rate,
            rules.premature.expected_visits,
            premature_per_visit
        );

        let mut monitoring = BTreeMap::new();
        for (&cause, plan) in &spec.monitoring {
            let r = plan.recurrence;
            let curve = CumulativeHazardCurve::from_rates(&[
                (365, r.cumulative_rate_1y),
                (1095, r.cumulative_rate_3y),
                (1825, r.cumulative_rate_5y),
            ])?;
            monitoring.insert(cause, MonitoringProgram { plan: *plan, curve });
        }

        Ok(Self {
            rules,
            premature_per_visit,
            monitoring,
        })
    }

    /// The calibrated per-visit premature probability.
    pub fn premature_per_visit_probability(&self) -> f64 {
        self.premature_per_visit
    }

    /// Vision threshold feeding the poor-response streak.
    pub fn poor_vision_threshold(&self) -> f64 {
        self.rules.poor_response.vision_threshold_letters
    }

    /// Monitoring plan for a discontinued cause, if one exists. Terminal and
    /// censoring causes have none.
    pub fn plan_for(&self, cause: DiscontinuationCause) -> Option<&MonitoringPlan> {
        self.monitoring.get(&cause).map(|p| &p.plan)
    }

    /// Per-visit mortality probability over an elapsed interval, from the
    /// age-dependent annual hazard. Applied at treatment and monitoring
    /// visits alike: the hazard does not pause when injections do.
    pub(crate) fn mortality_probability(&self, age_years: f64, interval_days: u32) -> f64 {
        let m = &self.rules.mortality;
        let hazard = m.base_annual_rate
            * 2f64.powf((age_years - m.age_anchor_years) / m.rate_doubling_years);
        1.0 - (-hazard * f64::from(interval_days) / DAYS_PER_YEAR).exp()
    }

    /// Evaluates all competing causes for a treatment visit.
    ///
    /// Must be called exactly once per visit (the patient's guard panics
    /// otherwise). Returns the first cause that fires, or None.
    pub fn evaluate<R: Rng>(
        &self,
        patient: &Patient,
        day: SimDay,
        interval_days: u32,
        rng: &mut R,
        required_max_interval_streak: u32,
    ) -> Option<DiscontinuationCause> {
        // 1. Mortality.
        let p_death = self.mortality_probability(patient.age_at(day), interval_days);
        if p_death > 0.0 && rng.gen_bool(p_death.min(1.0)) {
            return Some(DiscontinuationCause::Mortality);
        }

        // 2. Poor response: sustained below-threshold vision.
        let pr = &self.rules.poor_response;
        if patient.poor_vision_streak >= pr.consecutive_visits
            && pr.probability > 0.0
            && rng.gen_bool(pr.probability)
        {
            return Some(DiscontinuationCause::PoorResponse);
        }

        // 3. Clinical judgment: course complete / stable too long.
        let cc = &self.rules.course_complete;
        if patient.years_on_treatment(day) >= cc.min_years_on_treatment
            && cc.per_visit_probability > 0.0
            && rng.gen_bool(cc.per_visit_probability)
        {
            return Some(DiscontinuationCause::CourseComplete);
        }

        // 4. Planned: max interval sustained long enough.
        if patient.max_interval_streak >= required_max_interval_streak
            && self.rules.planned.probability > 0.0
            && rng.gen_bool(self.rules.planned.probability)
        {
            return Some(DiscontinuationCause::Planned);
        }

        // 5. Administrative loss to follow-up.
        let pa = self.rules.administrative.per_visit_probability;
        if pa > 0.0 && rng.gen_bool(pa) {
            return Some(DiscontinuationCause::Administrative);
        }

        // 6. Premature (calibrated per-visit probability).
        if self.premature_per_visit > 0.0 && rng.gen_bool(self.premature_per_visit) {
            return Some(DiscontinuationCause::Premature);
        }

        None
    }

    /// Evaluates one monitoring visit for a patient discontinued with
    /// `cause`.
    ///
    /// `t0_days`/`t1_days` bound the window since the previous look
    /// (offsets from the discontinuation day); `vision_loss` is the letters
    /// lost since discontinuation. Detection, the vision-loss threshold, and
    /// the restart probability compound independently.
    pub fn monitoring_visit<R: Rng>(
        &self,
        cause: DiscontinuationCause,
        recurrence_pending: bool,
        t0_days: f64,
        t1_days: f64,
        vision_loss: f64,
        rng: &mut R,
    ) -> MonitoringOutcome {
        let Some(program) = self.monitoring.get(&cause) else {
            return MonitoringOutcome::NoRecurrence;
        };

        let recurred = recurrence_pending || {
            let p = program.curve.window_probability(t0_days, t1_days);
            p > 0.0 && rng.gen_bool(p.min(1.0))
        };
        if !recurred {
            return MonitoringOutcome::NoRecurrence;
        }

        if !(program.plan.detection_probability > 0.0
            && rng.gen_bool(program.plan.detection_probability))
        {
            return MonitoringOutcome::UndetectedRecurrence;
        }

        if vision_loss < program.plan.min_vision_loss_letters {
            return MonitoringOutcome::DetectedNoRetreat;
        }

        if program.plan.retreatment_probability > 0.0
            && rng.gen_bool(program.plan.retreatment_probability)
        {
            MonitoringOutcome::Retreat
        } else {
            MonitoringOutcome::DetectedNoRetreat
        }
    }
}
