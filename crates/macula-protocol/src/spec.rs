//! Protocol specification types and validation.

use macula_core::{DiscontinuationCause, DiseaseState, MaculaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance for transition-row sums at load time.
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Immutable, validated treatment-protocol specification.
///
/// Loaded once via [`crate::loader`], then passed by reference into every
/// engine component's constructor. Nothing mutates a spec after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSpec {
    /// Protocol name (e.g. "treat_and_extend_reference").
    pub name: String,

    /// Protocol version string.
    pub version: String,

    /// Hex SHA-256 of the source document. Filled by the loader, not the
    /// YAML itself.
    #[serde(default)]
    pub source_checksum: String,

    /// Treat-and-extend interval rules.
    pub intervals: IntervalRules,

    /// Base transition probabilities: from-state → to-state → probability.
    /// Each row must sum to 1 within [`ROW_SUM_TOLERANCE`]; no row may give
    /// positive probability to `naive` (it is a source-only state).
    pub disease_transitions: BTreeMap<DiseaseState, BTreeMap<DiseaseState, f64>>,

    /// Per-(from, to) multipliers applied to the base row when the patient
    /// is treated. The adjusted row is renormalized — an explicit, intended
    /// step, distinct from silently patching bad input.
    pub treatment_effect: BTreeMap<DiseaseState, BTreeMap<DiseaseState, f64>>,

    /// Vision model parameters.
    pub vision: VisionRules,

    /// Discontinuation rules for each competing cause.
    pub discontinuation: DiscontinuationRules,

    /// Monitoring plans keyed by discontinuation cause. Causes without an
    /// entry (and all censoring/terminal causes) get no follow-up schedule.
    #[serde(default)]
    pub monitoring: BTreeMap<DiscontinuationCause, MonitoringPlan>,

    /// Patient arrival process.
    pub enrollment: EnrollmentRules,

    /// Age-at-enrollment distribution (drives the mortality hazard).
    pub baseline_age: AgeDistribution,
}

/// Treat-and-extend interval rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalRules {
    /// Shortest permitted inter-visit interval (days).
    pub min_interval_days: u32,
    /// Longest permitted inter-visit interval (days).
    pub max_interval_days: u32,
    /// Extension step on a sustained-stable visit (days).
    pub extension_days: u32,
    /// Shortening step on an active or indeterminate visit (days).
    pub shortening_days: u32,
    /// Number of fixed-schedule loading injections.
    pub loading_doses: u32,
    /// Spacing of loading injections (days).
    pub loading_interval_days: u32,
    /// Consecutive visits at max interval required before planned
    /// discontinuation becomes eligible.
    pub stable_visits_for_planned: u32,
    /// Interval a retreated patient re-enters maintenance at (reset, shorter
    /// than their prior extended interval).
    pub retreat_interval_days: u32,
}

/// (mean, std) of a normal distribution, in letters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GaussianParams {
    pub mean: f64,
    pub std: f64,
}

/// Treated/untreated letter-change distributions for one disease state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateVisionChange {
    pub treated: GaussianParams,
    pub untreated: GaussianParams,
}

/// One step of the piecewise-constant treatment-effect decay schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayBreakpoint {
    /// The factor applies while days-since-injection <= this bound.
    pub up_to_days: u32,
    /// Fraction of the full treatment effect retained (0..=1).
    pub factor: f64,
}

/// Explicit breakpoint schedule for post-injection treatment effect.
///
/// Deliberately piecewise-constant rather than a smooth curve, to match how
/// the calibration data was fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecaySchedule {
    /// Breakpoints in strictly increasing `up_to_days` order.
    pub breakpoints: Vec<DecayBreakpoint>,
    /// Factor applied beyond the last breakpoint.
    pub tail_factor: f64,
}

impl DecaySchedule {
    /// Effect factor for a given time since the last injection.
    pub fn factor_at(&self, days_since_injection: u32) -> f64 {
        for bp in &self.breakpoints {
            if days_since_injection <= bp.up_to_days {
                return bp.factor;
            }
        }
        self.tail_factor
    }
}

/// Vision model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionRules {
    /// Absolute floor for reported vision (letters).
    pub min_letters: f64,
    /// Absolute ceiling for reported vision (letters).
    pub max_letters: f64,
    /// Baseline vision distribution at enrollment.
    pub baseline: AgeDistribution,
    /// Baseline at or above this gets the larger improvement headroom.
    pub high_baseline_threshold: f64,
    /// Ceiling headroom above baseline for high-baseline patients (letters).
    pub headroom_high: f64,
    /// Ceiling headroom above baseline for low-baseline patients (letters).
    pub headroom_low: f64,
    /// Test-retest measurement noise std (letters), applied to the observed
    /// value after the true change has been clamped.
    pub measurement_noise_std: f64,
    /// Fraction of vision lost since discontinuation that is regained on
    /// retreatment. Strictly partial recovery: must be in (0, 1).
    pub recovery_fraction: f64,
    /// Letter-change distributions: 4 states × {treated, untreated}.
    pub change_model: BTreeMap<DiseaseState, StateVisionChange>,
    /// Post-injection treatment-effect decay schedule.
    pub treatment_decay: DecaySchedule,
}

/// Normal distribution with clamps (used for baseline vision and age).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgeDistribution {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Mortality hazard: annual rate at the anchor age, doubling every
/// `rate_doubling_years` above it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MortalityRule {
    pub base_annual_rate: f64,
    pub age_anchor_years: f64,
    pub rate_doubling_years: f64,
}

/// Poor-response / treatment-failure discontinuation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoorResponseRule {
    /// Vision below this threshold counts toward failure (letters).
    pub vision_threshold_letters: f64,
    /// Consecutive below-threshold visits required.
    pub consecutive_visits: u32,
    /// Probability of discontinuing once the criterion is met.
    pub probability: f64,
}

/// Clinical-judgment discontinuation (stable too long / course complete).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CourseCompleteRule {
    /// Minimum time on treatment before the check applies (years).
    pub min_years_on_treatment: f64,
    /// Per-visit probability once eligible.
    pub per_visit_probability: f64,
}

/// Planned protocol discontinuation after sustained max interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannedRule {
    /// Probability of stopping at an eligible visit.
    pub probability: f64,
}

/// Administrative loss to follow-up (censoring).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdministrativeRule {
    pub per_visit_probability: f64,
}

/// Premature, patient-initiated discontinuation.
///
/// Configured as a target cumulative rate over an expected visit count; the
/// engine converts this once into a per-visit probability
/// (`1 - (1 - target)^(1/expected_visits)`). The cumulative rate is never
/// applied directly per visit — doing so compounds non-linearly and was the
/// documented historical defect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrematureRule {
    pub target_cumulative_rate: f64,
    pub expected_visits: f64,
}

/// Discontinuation rules for all competing causes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscontinuationRules {
    pub mortality: MortalityRule,
    pub poor_response: PoorResponseRule,
    pub course_complete: CourseCompleteRule,
    pub planned: PlannedRule,
    pub administrative: AdministrativeRule,
    pub premature: PrematureRule,
}

/// Cumulative recurrence rates at fixed post-discontinuation horizons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecurrenceCurve {
    pub cumulative_rate_1y: f64,
    pub cumulative_rate_3y: f64,
    pub cumulative_rate_5y: f64,
}

/// Post-discontinuation monitoring plan for one cause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitoringPlan {
    /// Spacing of monitoring visits (days).
    pub visit_interval_days: u32,
    /// How long monitoring continues after discontinuation (years).
    pub duration_years: f64,
    /// Time-dependent recurrence probability curve.
    pub recurrence: RecurrenceCurve,
    /// Probability that a recurrence present at a monitoring visit is
    /// actually detected.
    pub detection_probability: f64,
    /// Minimum vision loss since discontinuation for retreatment to be
    /// offered (letters).
    pub min_vision_loss_letters: f64,
    /// Probability of restarting treatment once detected and eligible.
    /// Independent of detection; the two compound.
    pub retreatment_probability: f64,
}

/// Patient arrival process over the simulation horizon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnrollmentRules {
    /// Mean Poisson arrival rate (patients per week). Arrivals are staggered
    /// across the horizon, never all at time zero.
    pub mean_arrivals_per_week: f64,
}

fn check_probability(field: &str, p: f64) -> Result<(), MaculaError> {
    if !(0.0..=1.0).contains(&p) || !p.is_finite() {
        return Err(MaculaError::protocol(
            field,
            format!("probability {p} outside [0, 1]"),
        ));
    }
    Ok(())
}

fn check_positive(field: &str, v: f64) -> Result<(), MaculaError> {
    if !(v > 0.0) || !v.is_finite() {
        return Err(MaculaError::protocol(field, format!("{v} must be > 0")));
    }
    Ok(())
}

impl ProtocolSpec {
    /// Validates the full specification.
    ///
    /// Returns the first violation found, naming the offending field. A spec
    /// that passes here cannot produce configuration failures
    /// mid-simulation.
    pub fn validate(&self) -> Result<(), MaculaError> {
        self.validate_intervals()?;
        self.validate_transitions()?;
        self.validate_vision()?;
        self.validate_discontinuation()?;
        self.validate_monitoring()?;

        check_positive(
            "enrollment.mean_arrivals_per_week",
            self.enrollment.mean_arrivals_per_week,
        )?;
        check_positive("baseline_age.std", self.baseline_age.std)?;
        if self.baseline_age.min > self.baseline_age.max {
            return Err(MaculaError::protocol(
                "baseline_age",
                "min exceeds max",
            ));
        }
        Ok(())
    }

    fn validate_intervals(&self) -> Result<(), MaculaError> {
        let iv = &self.intervals;
        if iv.min_interval_days == 0 {
            return Err(MaculaError::protocol(
                "intervals.min_interval_days",
                "must be at least 1 day",
            ));
        }
        if iv.min_interval_days > iv.max_interval_days {
            return Err(MaculaError::protocol(
                "intervals",
                format!(
                    "min_interval_days ({}) exceeds max_interval_days ({})",
                    iv.min_interval_days, iv.max_interval_days
                ),
            ));
        }
        if iv.extension_days == 0 || iv.shortening_days == 0 {
            return Err(MaculaError::protocol(
                "intervals",
                "extension_days and shortening_days must be non-zero",
            ));
        }
        if iv.loading_doses == 0 || iv.loading_interval_days == 0 {
            return Err(MaculaError::protocol(
                "intervals",
                "loading phase requires at least one dose and a non-zero interval",
            ));
        }
        if iv.stable_visits_for_planned == 0 {
            return Err(MaculaError::protocol(
                "intervals.stable_visits_for_planned",
                "must require at least one sustained visit",
            ));
        }
        if !(iv.min_interval_days..=iv.max_interval_days).contains(&iv.retreat_interval_days) {
            return Err(MaculaError::protocol(
                "intervals.retreat_interval_days",
                "must lie within [min_interval_days, max_interval_days]",
            ));
        }
        Ok(())
    }

    fn validate_transitions(&self) -> Result<(), MaculaError> {
        for state in DiseaseState::ALL {
            let row = self.disease_transitions.get(&state).ok_or_else(|| {
                MaculaError::protocol(
                    format!("disease_transitions.{}", state.as_str()),
                    "missing transition row",
                )
            })?;

            let mut sum = 0.0;
            for (target, &p) in row {
                check_probability(
                    &format!(
                        "disease_transitions.{}.{}",
                        state.as_str(),
                        target.as_str()
                    ),
                    p,
                )?;
                if *target == DiseaseState::Naive && p > 0.0 {
                    return Err(MaculaError::protocol(
                        format!("disease_transitions.{}.naive", state.as_str()),
                        "naive is a source-only state and may never be a transition target",
                    ));
                }
                sum += p;
            }
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(MaculaError::protocol(
                    format!("disease_transitions.{}", state.as_str()),
                    format!("row sums to {sum}, expected 1.0"),
                ));
            }

            if let Some(multipliers) = self.treatment_effect.get(&state) {
                for (target, &m) in multipliers {
                    if !(m >= 0.0) || !m.is_finite() {
                        return Err(MaculaError::protocol(
                            format!(
                                "treatment_effect.{}.{}",
                                state.as_str(),
                                target.as_str()
                            ),
                            format!("multiplier {m} must be finite and >= 0"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_vision(&self) -> Result<(), MaculaError> {
        let v = &self.vision;
        if v.min_letters >= v.max_letters {
            return Err(MaculaError::protocol(
                "vision",
                "min_letters must be below max_letters",
            ));
        }
        for state in DiseaseState::ALL {
            let entry = v.change_model.get(&state).ok_or_else(|| {
                MaculaError::protocol(
                    format!("vision.change_model.{}", state.as_str()),
                    "missing treated/untreated change entry",
                )
            })?;
            for (arm, params) in [("treated", entry.treated), ("untreated", entry.untreated)] {
                if params.std < 0.0 || !params.std.is_finite() || !params.mean.is_finite() {
                    return Err(MaculaError::protocol(
                        format!("vision.change_model.{}.{arm}", state.as_str()),
                        "mean must be finite, std finite and >= 0",
                    ));
                }
            }
        }
        check_probability("vision.treatment_decay.tail_factor", v.treatment_decay.tail_factor)?;
        let mut prev_bound = 0u32;
        for (i, bp) in v.treatment_decay.breakpoints.iter().enumerate() {
            check_probability(&format!("vision.treatment_decay.breakpoints[{i}]"), bp.factor)?;
            if bp.up_to_days <= prev_bound && i > 0 {
                return Err(MaculaError::protocol(
                    "vision.treatment_decay.breakpoints",
                    "up_to_days must be strictly increasing",
                ));
            }
            prev_bound = bp.up_to_days;
        }
        if v.headroom_high < v.headroom_low {
            return Err(MaculaError::protocol(
                "vision",
                "headroom_high must be at least headroom_low (higher baseline allows higher ceiling)",
            ));
        }
        if v.measurement_noise_std < 0.0 {
            return Err(MaculaError::protocol(
                "vision.measurement_noise_std",
                "must be >= 0",
            ));
        }
        if !(v.recovery_fraction > 0.0 && v.recovery_fraction < 1.0) {
            return Err(MaculaError::protocol(
                "vision.recovery_fraction",
                "retreatment recovery is partial: fraction must be in (0, 1)",
            ));
        }
        Ok(())
    }

    fn validate_discontinuation(&self) -> Result<(), MaculaError> {
        let d = &self.discontinuation;
        check_positive(
            "discontinuation.mortality.base_annual_rate",
            d.mortality.base_annual_rate,
        )?;
        check_positive(
            "discontinuation.mortality.rate_doubling_years",
            d.mortality.rate_doubling_years,
        )?;
        check_probability(
            "discontinuation.poor_response.probability",
            d.poor_response.probability,
        )?;
        if d.poor_response.consecutive_visits == 0 {
            return Err(MaculaError::protocol(
                "discontinuation.poor_response.consecutive_visits",
                "must require at least one visit",
            ));
        }
        check_probability(
            "discontinuation.course_complete.per_visit_probability",
            d.course_complete.per_visit_probability,
        )?;
        check_probability("discontinuation.planned.probability", d.planned.probability)?;
        check_probability(
            "discontinuation.administrative.per_visit_probability",
            d.administrative.per_visit_probability,
        )?;
        check_probability(
            "discontinuation.premature.target_cumulative_rate",
            d.premature.target_cumulative_rate,
        )?;
        check_positive(
            "discontinuation.premature.expected_visits",
            d.premature.expected_visits,
        )?;
        Ok(())
    }

    fn validate_monitoring(&self) -> Result<(), MaculaError> {
        for (cause, plan) in &self.monitoring {
            let field = format!("monitoring.{}", cause.as_str());
            if cause.is_terminal() || cause.is_censoring() {
                return Err(MaculaError::protocol(
                    field,
                    "terminal and censoring causes have no monitoring schedule",
                ));
            }
            if plan.visit_interval_days == 0 {
                return Err(MaculaError::protocol(
                    format!("{field}.visit_interval_days"),
                    "must be non-zero",
                ));
            }
            check_positive(&format!("{field}.duration_years"), plan.duration_years)?;
            check_probability(
                &format!("{field}.detection_probability"),
                plan.detection_probability,
            )?;
            check_probability(
                &format!("{field}.retreatment_probability"),
                plan.retreatment_probability,
            )?;
            let r = plan.recurrence;
            for (name, rate) in [
                ("cumulative_rate_1y", r.cumulative_rate_1y),
                ("cumulative_rate_3y", r.cumulative_rate_3y),
                ("cumulative_rate_5y", r.cumulative_rate_5y),
            ] {
                check_probability(&format!("{field}.recurrence.{name}"), rate)?;
                if rate >= 1.0 {
                    return Err(MaculaError::protocol(
                        format!("{field}.recurrence.{name}"),
                        "cumulative recurrence rate must be below 1.0",
                    ));
                }
            }
            if r.cumulative_rate_1y > r.cumulative_rate_3y
                || r.cumulative_rate_3y > r.cumulative_rate_5y
            {
                return Err(MaculaError::protocol(
                    format!("{field}.recurrence"),
                    "cumulative rates must be non-decreasing over 1/3/5 years",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;

    fn reference() -> ProtocolSpec {
        loader::reference_protocol().expect("reference protocol must validate")
    }

    #[test]
    fn test_reference_protocol_validates() {
        let spec = reference();
        assert_eq!(spec.name, "treat_and_extend_reference");
        assert!(!spec.source_checksum.is_empty());
    }

    #[test]
    fn test_row_sum_violation_names_field() {
        let mut spec = reference();
        spec.disease_transitions
            .get_mut(&DiseaseState::Stable)
            .unwrap()
            .insert(DiseaseState::Active, 0.9);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("disease_transitions.stable"));
    }

    #[test]
    fn test_naive_target_rejected() {
        let mut spec = reference();
        let row = spec
            .disease_transitions
            .get_mut(&DiseaseState::Active)
            .unwrap();
        let shifted = row[&DiseaseState::Stable];
        row.insert(DiseaseState::Naive, shifted);
        row.insert(DiseaseState::Stable, 0.0);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("source-only"));
    }

    #[test]
    fn test_inverted_interval_bounds_rejected() {
        let mut spec = reference();
        spec.intervals.min_interval_days = 120;
        spec.intervals.max_interval_days = 28;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_full_recovery_fraction_rejected() {
        let mut spec = reference();
        spec.vision.recovery_fraction = 1.0;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("recovery_fraction"));
    }

    #[test]
    fn test_monitoring_for_censoring_cause_rejected() {
        let mut spec = reference();
        let plan = spec.monitoring[&DiscontinuationCause::Planned];
        spec.monitoring
            .insert(DiscontinuationCause::Administrative, plan);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_decreasing_recurrence_curve_rejected() {
        let mut spec = reference();
        spec.monitoring
            .get_mut(&DiscontinuationCause::Planned)
            .unwrap()
            .recurrence
            .cumulative_rate_3y = 0.01;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("non-decreasing"));
    }

    #[test]
    fn test_decay_factor_lookup() {
        let schedule = DecaySchedule {
            breakpoints: vec![
                DecayBreakpoint { up_to_days: 28, factor: 1.0 },
                DecayBreakpoint { up_to_days: 56, factor: 0.7 },
            ],
            tail_factor: 0.3,
        };
        assert_eq!(schedule.factor_at(0), 1.0);
        assert_eq!(schedule.factor_at(28), 1.0);
        assert_eq!(schedule.factor_at(29), 0.7);
        assert_eq!(schedule.factor_at(400), 0.3);
    }
}
