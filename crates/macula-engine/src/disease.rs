//! Disease-state transition model.
//!
//! Holds precomputed row-stochastic transition matrices for the treated and
//! untreated arms. The treated matrix is the base matrix with the protocol's
//! per-(from, to) multipliers applied and each row renormalized — the
//! renormalization is an explicit, documented step of the model, not a
//! silent repair of bad input.

use macula_core::{DiseaseState, MaculaError};
use macula_protocol::ProtocolSpec;
use rand::Rng;

const N_STATES: usize = 4;

/// Stochastic disease-state transition model.
#[derive(Debug, Clone)]
pub struct DiseaseModel {
    /// Base (untreated) transition rows.
    untreated: [[f64; N_STATES]; N_STATES],
    /// Multiplier-adjusted, renormalized (treated) rows.
    treated: [[f64; N_STATES]; N_STATES],
}

impl DiseaseModel {
    /// Builds both matrices from a validated protocol.
    ///
    /// Fails fast if any treated row collapses to zero mass after the
    /// multipliers — that is a protocol defect, not a runtime condition.
    pub fn new(spec: &ProtocolSpec) -> Result<Self, MaculaError> {
        let mut untreated = [[0.0; N_STATES]; N_STATES];
        let mut treated = [[0.0; N_STATES]; N_STATES];

        for from in DiseaseState::ALL {
            let row = spec
                .disease_transitions
                .get(&from)
                .ok_or_else(|| MaculaError::sampling(format!("no row for {}", from.as_str())))?;
            let multipliers = spec.treatment_effect.get(&from);

            let mut treated_sum = 0.0;
            for to in DiseaseState::ALL {
                let base = row.get(&to).copied().unwrap_or(0.0);
                untreated[from.index()][to.index()] = base;

                let m = multipliers
                    .and_then(|m| m.get(&to))
                    .copied()
                    .unwrap_or(1.0);
                let adjusted = base * m;
                treated[from.index()][to.index()] = adjusted;
                treated_sum += adjusted;
            }

            if treated_sum <= 0.0 {
                return Err(MaculaError::sampling(format!(
                    "treated transition row for {} collapsed to zero mass after multipliers",
                    from.as_str()
                )));
            }
            for p in &mut treated[from.index()] {
                *p /= treated_sum;
            }
        }

        Ok(Self { untreated, treated })
    }

    /// The effective transition row for a state and treatment arm.
    pub fn row(&self, state: DiseaseState, is_treated: bool) -> &[f64; N_STATES] {
        if is_treated {
            &self.treated[state.index()]
        } else {
            &self.untreated[state.index()]
        }
    }

    /// Samples the next disease state via inverse-CDF against one uniform
    /// draw.
    ///
    /// Naive is never a sampled target: the protocol validator rejects any
    /// positive mass on it, and this function asserts the invariant.
    pub fn sample_next_state<R: Rng>(
        &self,
        current: DiseaseState,
        is_treated: bool,
        rng: &mut R,
    ) -> Result<DiseaseState, MaculaError> {
        let row = self.row(current, is_treated);
        let u: f64 = rng.gen();

        let mut cdf = 0.0;
        let mut next = None;
        for to in DiseaseState::ALL {
            cdf += row[to.index()];
            if u <= cdf {
                next = Some(to);
                break;
            }
        }
        // Guard against floating-point shortfall at u ~ 1.0.
        let next = next.unwrap_or_else(|| {
            DiseaseState::ALL
                .into_iter()
                .rev()
                .find(|s| row[s.index()] > 0.0)
                .unwrap_or(DiseaseState::Stable)
        });

        assert_ne!(
            next,
            DiseaseState::Naive,
            "sampled a transition into naive: naive is a source-only state"
        );
        Ok(next)
    }
}
