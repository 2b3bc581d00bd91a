//! # macula-protocol
//!
//! Treatment-protocol specifications for the MACULA simulator.
//!
//! A [`ProtocolSpec`] is the single immutable parameter bundle every engine
//! component is constructed from: transition probabilities, vision-change
//! distributions, treat-and-extend interval rules, discontinuation rules,
//! and monitoring plans. Protocols are parsed from YAML and validated in one
//! step; downstream code only ever sees typed fields. Invalid protocols fail
//! at load time, never mid-simulation.

pub mod loader;
pub mod spec;

pub use spec::{
    AdministrativeRule, AgeDistribution, CourseCompleteRule, DecayBreakpoint, DecaySchedule,
    DiscontinuationRules, EnrollmentRules, GaussianParams, IntervalRules, MonitoringPlan,
    MortalityRule, PlannedRule, PoorResponseRule, PrematureRule, ProtocolSpec, RecurrenceCurve,
    StateVisionChange, VisionRules,
};
