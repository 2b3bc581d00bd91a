//! Rate-conversion helpers for calibration-sensitive probabilities.
//!
//! Clinical targets are quoted as cumulative rates (e.g. "14.5% of patients
//! discontinue prematurely within two years", "40% recur within three
//! years"), while the engine draws per-visit Bernoulli samples. Applying a
//! cumulative rate directly at each visit compounds non-linearly over many
//! visits and inflates outcomes far past the target, so every cumulative
//! rate is converted exactly once, here.

use macula_core::{MaculaError, SimDay};

/// Converts a target cumulative probability over an expected number of
/// visits into the per-visit probability that reproduces it:
/// `p = 1 - (1 - target)^(1/expected_visits)`.
pub fn per_visit_probability(
    target_cumulative: f64,
    expected_visits: f64,
) -> Result<f64, MaculaError> {
    if !(0.0..=1.0).contains(&target_cumulative) {
        return Err(MaculaError::sampling(format!(
            "cumulative rate {target_cumulative} outside [0, 1]"
        )));
    }
    if !(expected_visits > 0.0) {
        return Err(MaculaError::sampling(format!(
            "expected visit count {expected_visits} must be positive"
        )));
    }
    Ok(1.0 - (1.0 - target_cumulative).powf(1.0 / expected_visits))
}

/// Piecewise-linear cumulative-hazard curve built from cumulative event
/// rates at fixed day offsets.
///
/// Interpolating the hazard `H(t) = -ln(1 - F(t))` rather than `F(t)` keeps
/// window probabilities consistent for any monitoring cadence: the
/// probability of an event inside `(t0, t1]` given none before `t0` is
/// `1 - exp(-(H(t1) - H(t0)))`.
#[derive(Debug, Clone)]
pub struct CumulativeHazardCurve {
    /// (day offset, cumulative hazard) knots in increasing day order.
    knots: Vec<(f64, f64)>,
}

impl CumulativeHazardCurve {
    /// Builds a curve from (day, cumulative rate) points. Rates must be
    /// non-decreasing and strictly below 1.
    pub fn from_rates(points: &[(SimDay, f64)]) -> Result<Self, MaculaError> {
        if points.is_empty() {
            return Err(MaculaError::sampling("recurrence curve has no points"));
        }
        let mut knots = Vec::with_capacity(points.len() + 1);
        knots.push((0.0, 0.0));
        let mut prev_rate = 0.0;
        let mut prev_day = 0.0;
        for &(day, rate) in points {
            if !(0.0..1.0).contains(&rate) || rate < prev_rate {
                return Err(MaculaError::sampling(format!(
                    "cumulative rate {rate} at day {day} breaks monotonicity"
                )));
            }
            let day = f64::from(day);
            if day <= prev_day {
                return Err(MaculaError::sampling(
                    "recurrence curve days must be strictly increasing",
                ));
            }
            knots.push((day, -(1.0 - rate).ln()));
            prev_rate = rate;
            prev_day = day;
        }
        Ok(Self { knots })
    }

    /// Cumulative hazard at `day`, linearly interpolated between knots and
    /// extrapolated flat at the last knot's hazard rate beyond it.
    pub fn hazard_at(&self, day: f64) -> f64 {
        let last = self.knots[self.knots.len() - 1];
        if day >= last.0 {
            // Constant-hazard extrapolation using the final segment slope.
            let prev = self.knots[self.knots.len() - 2];
            let slope = (last.1 - prev.1) / (last.0 - prev.0);
            return last.1 + slope * (day - last.0);
        }
        for w in self.knots.windows(2) {
            let (d0, h0) = w[0];
            let (d1, h1) = w[1];
            if day <= d1 {
                return h0 + (h1 - h0) * (day - d0) / (d1 - d0);
            }
        }
        0.0
    }

    /// Probability of an event inside `(t0, t1]` days, conditional on no
    /// event before `t0`.
    pub fn window_probability(&self, t0_days: f64, t1_days: f64) -> f64 {
        debug_assert!(t1_days >= t0_days);
        let dh = (self.hazard_at(t1_days) - self.hazard_at(t0_days)).max(0.0);
        1.0 - (-dh).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_visit_probability_reproduces_target() {
        let p = per_visit_probability(0.145, 13.0).unwrap();
        let cumulative = 1.0 - (1.0 - p).powi(13);
        assert!((cumulative - 0.145).abs() < 1e-12);
        // Far below the naive compounding that caused the historical defect.
        assert!(p < 0.02);
    }

    #[test]
    fn test_per_visit_probability_rejects_bad_inputs() {
        assert!(per_visit_probability(1.5, 13.0).is_err());
        assert!(per_visit_probability(0.1, 0.0).is_err());
    }

    #[test]
    fn test_hazard_curve_matches_knots() {
        let curve =
            CumulativeHazardCurve::from_rates(&[(365, 0.13), (1095, 0.40), (1825, 0.65)]).unwrap();
        // Probability of recurrence by each knot, starting from day 0.
        assert!((curve.window_probability(0.0, 365.0) - 0.13).abs() < 1e-12);
        assert!((curve.window_probability(0.0, 1095.0) - 0.40).abs() < 1e-12);
        assert!((curve.window_probability(0.0, 1825.0) - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_window_probabilities_compose() {
        let curve =
            CumulativeHazardCurve::from_rates(&[(365, 0.13), (1095, 0.40), (1825, 0.65)]).unwrap();
        let p_full = curve.window_probability(0.0, 1095.0);
        let p_a = curve.window_probability(0.0, 365.0);
        let p_b = curve.window_probability(365.0, 1095.0);
        // Survival factorizes: (1-p_full) == (1-p_a)(1-p_b).
        assert!(((1.0 - p_full) - (1.0 - p_a) * (1.0 - p_b)).abs() < 1e-12);
    }

    #[test]
    fn test_extrapolation_beyond_last_knot_keeps_final_hazard_rate() {
        let curve =
            CumulativeHazardCurve::from_rates(&[(365, 0.13), (1095, 0.40), (1825, 0.65)]).unwrap();
        let p = curve.window_probability(1825.0, 2190.0);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn test_non_monotone_curve_rejected() {
        assert!(CumulativeHazardCurve::from_rates(&[(365, 0.4), (1095, 0.2)]).is_err());
    }
}
