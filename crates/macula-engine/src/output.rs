//! Result assembly: the visit table, summary aggregates, and the
//! conservation audit.
//!
//! The visit table's minimal schema (date, disease state, vision, treatment
//! flag, discontinuation/retreatment markers) is the stable contract the
//! visualization and cost layers consume; enum-to-string conversion happens
//! only here.

use crate::patient::Patient;
use crate::RunConfig;
use chrono::NaiveDate;
use macula_core::{DiscontinuationCause, MaculaError, OutcomeStatus, SimDay};
use macula_protocol::ProtocolSpec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One flattened row of the visit table.
#[derive(Debug, Clone, Serialize)]
pub struct VisitRow {
    pub patient_id: usize,
    pub visit_index: usize,
    pub date: NaiveDate,
    pub day: SimDay,
    pub phase: &'static str,
    pub disease_state: &'static str,
    pub vision_letters: f64,
    pub treatment_given: bool,
    pub interval_days: u32,
    pub discontinuation: Option<&'static str>,
    pub retreatment: bool,
}

/// Population-level aggregates for one run.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    /// Patients whose enrollment day fell inside the horizon.
    pub enrolled: usize,
    pub total_injections: u64,
    pub total_visits: usize,
    pub mean_final_vision: f64,
    pub median_final_vision: f64,
    pub deaths: usize,
    pub retreatments: u64,
    /// Patients still receiving treatment when the simulation ended.
    pub on_treatment_at_horizon: usize,
    /// Patients whose monitoring schedule was cut short by the horizon
    /// (explicitly censored, never forced into a terminal bucket).
    pub in_monitoring_at_horizon: usize,
    /// Discontinuation events by cause (a patient retreated and discontinued
    /// again counts once per episode).
    pub discontinuation_events: BTreeMap<&'static str, usize>,
    /// Events divided by the enrolled count.
    pub discontinuation_rate_by_cause: BTreeMap<&'static str, f64>,
}

/// Complete output of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub protocol_name: String,
    pub protocol_version: String,
    pub protocol_checksum: String,
    pub engine: &'static str,
    pub seed: u64,
    pub n_patients: usize,
    pub horizon_days: SimDay,
    pub start_date: NaiveDate,
    pub summary: SummaryStats,
    pub rows: Vec<VisitRow>,
    /// Full agents, kept for audits and tests; not serialized.
    #[serde(skip)]
    pub patients: Vec<Patient>,
}

impl SimulationResult {
    /// Builds the result tables from simulated patients and verifies the
    /// conservation invariant before returning.
    pub fn assemble(
        spec: &ProtocolSpec,
        run: &RunConfig,
        engine: &'static str,
        patients: Vec<Patient>,
    ) -> Result<Self, MaculaError> {
        let horizon = run.horizon_days();
        conservation_audit(&patients, horizon, 12)?;

        let mut rows = Vec::with_capacity(patients.iter().map(|p| p.history.len()).sum());
        for patient in &patients {
            for record in &patient.history {
                rows.push(VisitRow {
                    patient_id: patient.id,
                    visit_index: record.visit_index,
                    date: run.start_date + chrono::Duration::days(i64::from(record.day)),
                    day: record.day,
                    phase: record.phase.as_str(),
                    disease_state: record.disease_state.as_str(),
                    vision_letters: record.vision_letters,
                    treatment_given: record.treatment_given,
                    interval_days: record.interval_used_days,
                    discontinuation: record.discontinuation.map(DiscontinuationCause::as_str),
                    retreatment: record.retreatment,
                });
            }
        }

        let summary = summarize(&patients, horizon);
        Ok(Self {
            protocol_name: spec.name.clone(),
            protocol_version: spec.version.clone(),
            protocol_checksum: spec.source_checksum.clone(),
            engine,
            seed: run.seed,
            n_patients: run.n_patients,
            horizon_days: horizon,
            start_date: run.start_date,
            summary,
            rows,
            patients,
        })
    }

    /// Writes the visit table as CSV.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), MaculaError> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        log::info!(
            "wrote {} visit rows to {}",
            self.rows.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Writes the run summary as pretty JSON (without the visit rows).
    pub fn write_summary_json(&self, path: impl AsRef<Path>) -> Result<(), MaculaError> {
        #[derive(Serialize)]
        struct SummaryDoc<'a> {
            protocol_name: &'a str,
            protocol_version: &'a str,
            protocol_checksum: &'a str,
            engine: &'static str,
            seed: u64,
            n_patients: usize,
            horizon_days: SimDay,
            start_date: NaiveDate,
            summary: &'a SummaryStats,
        }
        let doc = SummaryDoc {
            protocol_name: &self.protocol_name,
            protocol_version: &self.protocol_version,
            protocol_checksum: &self.protocol_checksum,
            engine: self.engine,
            seed: self.seed,
            n_patients: self.n_patients,
            horizon_days: self.horizon_days,
            start_date: self.start_date,
            summary: &self.summary,
        };
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }
}

fn summarize(patients: &[Patient], horizon: SimDay) -> SummaryStats {
    let enrolled: Vec<&Patient> = patients
        .iter()
        .filter(|p| p.enrollment_day <= horizon)
        .collect();

    let mut final_visions: Vec<f64> = enrolled.iter().filter_map(|p| p.final_vision()).collect();
    final_visions.sort_by(|a, b| a.total_cmp(b));
    let mean_final_vision = if final_visions.is_empty() {
        0.0
    } else {
        final_visions.iter().sum::<f64>() / final_visions.len() as f64
    };
    let median_final_vision = if final_visions.is_empty() {
        0.0
    } else {
        final_visions[final_visions.len() / 2]
    };

    let mut discontinuation_events: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut deaths = 0usize;
    let mut on_treatment = 0usize;
    let mut in_monitoring = 0usize;
    for p in &enrolled {
        for ep in &p.episodes {
            *discontinuation_events.entry(ep.cause.as_str()).or_default() += 1;
        }
        match p.status_at(horizon) {
            OutcomeStatus::Deceased => deaths += 1,
            OutcomeStatus::OnTreatment => on_treatment += 1,
            OutcomeStatus::Monitoring(_) => in_monitoring += 1,
            _ => {}
        }
    }

    let discontinuation_rate_by_cause = discontinuation_events
        .iter()
        .map(|(&cause, &n)| (cause, n as f64 / enrolled.len().max(1) as f64))
        .collect();

    SummaryStats {
        enrolled: enrolled.len(),
        total_injections: enrolled.iter().map(|p| u64::from(p.injections)).sum(),
        total_visits: enrolled.iter().map(|p| p.history.len()).sum(),
        mean_final_vision,
        median_final_vision,
        deaths,
        retreatments: enrolled.iter().map(|p| u64::from(p.retreatment_count)).sum(),
        on_treatment_at_horizon: on_treatment,
        in_monitoring_at_horizon: in_monitoring,
        discontinuation_events,
        discontinuation_rate_by_cause,
    }
}

/// Verifies the conservation invariant: at every sampled day, the bucket
/// counts (on treatment, monitoring and discontinued per cause, deceased)
/// sum exactly to the number of patients enrolled by that day.
pub fn conservation_audit(
    patients: &[Patient],
    horizon: SimDay,
    n_samples: u32,
) -> Result<(), MaculaError> {
    for i in 0..=n_samples {
        let day = (u64::from(horizon) * u64::from(i) / u64::from(n_samples.max(1))) as SimDay;
        let mut accounted = 0usize;
        let mut enrolled_by_day = 0usize;
        for p in patients {
            let enrolled = p.enrollment_day <= day;
            if enrolled {
                enrolled_by_day += 1;
            }
            match p.status_at(day) {
                OutcomeStatus::NotYetEnrolled => {
                    if enrolled {
                        return Err(MaculaError::invariant(format!(
                            "patient {} enrolled by day {day} but unaccounted",
                            p.id
                        )));
                    }
                }
                _ => {
                    if !enrolled {
                        return Err(MaculaError::invariant(format!(
                            "patient {} counted before enrollment at day {day}",
                            p.id
                        )));
                    }
                    accounted += 1;
                }
            }
        }
        if accounted != enrolled_by_day {
            return Err(MaculaError::invariant(format!(
                "day {day}: {accounted} patients accounted, {enrolled_by_day} enrolled"
            )));
        }
    }
    Ok(())
}
