//! Treat-and-extend interval engine.
//!
//! Per-patient phase machine: a fixed loading series, then maintenance with
//! interval extension on sustained stability and shortening on activity,
//! clamped to the protocol's bounds. An indeterminate signal (first stable
//! reading straight after activity) shortens rather than extends — the
//! conservative tie-break.

use macula_core::DiseaseState;
use macula_protocol::{IntervalRules, ProtocolSpec};

/// Disease-activity judgment for interval adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    /// Stable now and at the prior visit: extend.
    Inactive,
    /// Stable now but active at the prior visit: shorten (conservative).
    Indeterminate,
    /// Active disease: shorten.
    Active,
}

impl ActivitySignal {
    /// Judges this visit's signal from the current and previous states.
    pub fn judge(current: DiseaseState, previous: DiseaseState) -> Self {
        if current.is_active() {
            ActivitySignal::Active
        } else if previous.is_active() {
            ActivitySignal::Indeterminate
        } else {
            ActivitySignal::Inactive
        }
    }
}

/// Interval engine configured from a protocol's treat-and-extend rules.
#[derive(Debug, Clone)]
pub struct IntervalEngine {
    rules: IntervalRules,
}

impl IntervalEngine {
    pub fn new(spec: &ProtocolSpec) -> Self {
        Self {
            rules: spec.intervals.clone(),
        }
    }

    pub fn rules(&self) -> &IntervalRules {
        &self.rules
    }

    /// Fixed spacing during the loading series (days).
    pub fn loading_interval(&self) -> u32 {
        self.rules.loading_interval_days
    }

    /// Number of loading injections before maintenance begins.
    pub fn loading_doses(&self) -> u32 {
        self.rules.loading_doses
    }

    /// Interval a patient enters maintenance at after loading.
    pub fn initial_maintenance_interval(&self) -> u32 {
        self.rules.min_interval_days
    }

    /// Reset interval on retreatment re-entry.
    pub fn retreat_interval(&self) -> u32 {
        self.rules.retreat_interval_days
    }

    /// Adjusts a maintenance interval for this visit's activity signal,
    /// clamped to [min, max].
    pub fn adjust(&self, current_interval: u32, signal: ActivitySignal) -> u32 {
        let next = match signal {
            ActivitySignal::Inactive => current_interval.saturating_add(self.rules.extension_days),
            ActivitySignal::Indeterminate | ActivitySignal::Active => {
                current_interval.saturating_sub(self.rules.shortening_days)
            }
        };
        next.clamp(self.rules.min_interval_days, self.rules.max_interval_days)
    }

    /// Whether an interval has reached the protocol maximum.
    pub fn at_max(&self, interval: u32) -> bool {
        interval >= self.rules.max_interval_days
    }

    /// Consecutive max-interval visits required for planned-discontinuation
    /// eligibility.
    pub fn stable_visits_for_planned(&self) -> u32 {
        self.rules.stable_visits_for_planned
    }
}
