//! Shared protocol builders for the integration tests.

#![allow(dead_code)]

use macula_core::DiseaseState;
use macula_protocol::{loader, GaussianParams, ProtocolSpec};
use std::collections::BTreeMap;

/// Reference protocol with every discontinuation cause switched off and
/// measurement noise removed, for deterministic-pathway tests.
pub fn quiet_spec() -> ProtocolSpec {
    let mut spec = loader::reference_protocol().unwrap();
    spec.discontinuation.mortality.base_annual_rate = 0.0;
    spec.discontinuation.poor_response.probability = 0.0;
    spec.discontinuation.course_complete.per_visit_probability = 0.0;
    spec.discontinuation.planned.probability = 0.0;
    spec.discontinuation.administrative.per_visit_probability = 0.0;
    spec.discontinuation.premature.target_cumulative_rate = 0.0;
    spec.vision.measurement_noise_std = 0.0;
    spec
}

/// Forces every transition to land on `stable` and zeroes all vision change
/// distributions, so timelines follow the pure scheduling rules.
pub fn pin_stable(spec: &mut ProtocolSpec) {
    for from in DiseaseState::ALL {
        let mut row = BTreeMap::new();
        row.insert(DiseaseState::Stable, 1.0);
        spec.disease_transitions.insert(from, row);
        spec.treatment_effect.insert(from, BTreeMap::new());
    }
    let zero = GaussianParams { mean: 0.0, std: 0.0 };
    for change in spec.vision.change_model.values_mut() {
        change.treated = zero;
        change.untreated = zero;
    }
}
