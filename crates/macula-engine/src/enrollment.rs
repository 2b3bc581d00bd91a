//! Staggered patient enrollment.
//!
//! Arrival times are drawn from a Poisson process across the horizon
//! (exponential inter-arrival gaps), never all at time zero: the ramp-up of
//! the in-treatment population is part of the modeled system.

use macula_core::{MaculaError, SimDay};
use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Samples `n_patients` arrival days from a Poisson process with the given
/// weekly rate. Days are returned in non-decreasing order; arrivals may fall
/// beyond the horizon, in which case those patients simply never enroll.
pub fn sample_arrival_days<R: Rng>(
    rate_per_week: f64,
    n_patients: usize,
    rng: &mut R,
) -> Result<Vec<SimDay>, MaculaError> {
    if !(rate_per_week > 0.0) || !rate_per_week.is_finite() {
        return Err(MaculaError::config(format!(
            "enrollment rate {rate_per_week}/week must be positive and finite"
        )));
    }
    let rate_per_day = rate_per_week / 7.0;
    let exp = Exp::new(rate_per_day)
        .map_err(|e| MaculaError::sampling(format!("arrival process: {e}")))?;

    let mut days = Vec::with_capacity(n_patients);
    let mut t = 0.0f64;
    for _ in 0..n_patients {
        t += exp.sample(rng);
        days.push(t.floor().max(0.0) as SimDay);
    }
    Ok(days)
}
