//! # macula-core
//!
//! Core types and errors for the MACULA platform, a discrete simulation of
//! neovascular AMD treatment pathways under anti-VEGF therapy.
//!
//! This crate defines the fundamental abstractions shared by all MACULA
//! components:
//! - **Types**: disease states, discontinuation causes, treatment phases,
//!   visit records, population-accounting buckets
//! - **Errors**: unified error handling with [`MaculaError`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   macula-core    │  ← shared types/errors
//! └──────────────────┘
//!          ▲
//!     ┌────┴─────────────┐
//!     │                  │
//! ┌───▼────────────┐ ┌───▼───────────┐
//! │ macula-protocol│ │ macula-engine │
//! └────────────────┘ └───────────────┘
//!          ▲                  ▲
//!          └────────┬─────────┘
//!                   │
//!          ┌────────▼────────┐
//!          │   macula-cli    │
//!          └─────────────────┘
//! ```

pub mod errors;
pub mod types;

pub use errors::MaculaError;
pub use types::{
    DiscontinuationCause, DiseaseState, OutcomeStatus, PatientId, SimDay, TreatmentPhase,
    VisitRecord, DAYS_PER_YEAR,
};
