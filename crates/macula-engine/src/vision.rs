//! Vision outcome model.
//!
//! Samples a letter change given disease state, treatment arm, and time
//! since the last injection. The treated mean decays toward the untreated
//! mean on an explicit breakpoint schedule (calibration data was fitted
//! piecewise, not smooth). The true change is clamped to the
//! baseline-dependent ceiling and the absolute floor first; test-retest
//! measurement noise is added to the observed value afterwards, so the
//! reported vision may sit slightly above the physiological ceiling within
//! noise bounds.

use macula_core::{DiseaseState, MaculaError};
use macula_protocol::{ProtocolSpec, VisionRules};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Result of one vision update.
#[derive(Debug, Clone, Copy)]
pub struct VisionOutcome {
    /// Underlying vision after the clamped true change (letters).
    pub true_vision: f64,
    /// Reported vision: true vision plus measurement noise, clamped only to
    /// the absolute letter range.
    pub observed_vision: f64,
}

/// Stochastic vision model configured from a protocol.
#[derive(Debug, Clone)]
pub struct VisionModel {
    rules: VisionRules,
}

impl VisionModel {
    pub fn new(spec: &ProtocolSpec) -> Self {
        Self {
            rules: spec.vision.clone(),
        }
    }

    /// Improvement ceiling for a patient, which depends on baseline vision:
    /// higher-baseline eyes retain more improvement headroom.
    pub fn ceiling_for(&self, baseline_vision: f64) -> f64 {
        let headroom = if baseline_vision >= self.rules.high_baseline_threshold {
            self.rules.headroom_high
        } else {
            self.rules.headroom_low
        };
        (baseline_vision + headroom).min(self.rules.max_letters)
    }

    /// Samples baseline vision at enrollment.
    pub fn sample_baseline<R: Rng>(&self, rng: &mut R) -> Result<f64, MaculaError> {
        let b = &self.rules.baseline;
        let normal = Normal::new(b.mean, b.std)
            .map_err(|e| MaculaError::sampling(format!("baseline vision distribution: {e}")))?;
        Ok(normal.sample(rng).clamp(b.min, b.max))
    }

    /// Samples one visit's vision update.
    ///
    /// `days_since_injection` is the time from the most recent injection to
    /// this visit (None when never injected); it drives the treatment-effect
    /// decay factor when treated.
    pub fn sample_outcome<R: Rng>(
        &self,
        state: DiseaseState,
        is_treated: bool,
        days_since_injection: Option<u32>,
        true_vision: f64,
        baseline_vision: f64,
        rng: &mut R,
    ) -> Result<VisionOutcome, MaculaError> {
        let entry = self.rules.change_model.get(&state).ok_or_else(|| {
            MaculaError::sampling(format!("no vision change entry for {}", state.as_str()))
        })?;

        let (mean, std) = if is_treated {
            // Effect decays toward untreated behavior on the breakpoint
            // schedule; full effect immediately post-injection.
            let factor = self
                .rules
                .treatment_decay
                .factor_at(days_since_injection.unwrap_or(0));
            let mean = entry.untreated.mean + (entry.treated.mean - entry.untreated.mean) * factor;
            (mean, entry.treated.std)
        } else {
            (entry.untreated.mean, entry.untreated.std)
        };

        let delta = if std > 0.0 {
            Normal::new(mean, std)
                .map_err(|e| MaculaError::sampling(format!("vision change distribution: {e}")))?
                .sample(rng)
        } else {
            mean
        };

        let floor = self.rules.min_letters;
        let ceiling = self.ceiling_for(baseline_vision);
        let new_true = (true_vision + delta).clamp(floor, ceiling);

        let noise = if self.rules.measurement_noise_std > 0.0 {
            Normal::new(0.0, self.rules.measurement_noise_std)
                .map_err(|e| MaculaError::sampling(format!("measurement noise: {e}")))?
                .sample(rng)
        } else {
            0.0
        };
        let observed = (new_true + noise).clamp(self.rules.min_letters, self.rules.max_letters);

        Ok(VisionOutcome {
            true_vision: new_true,
            observed_vision: observed,
        })
    }

    /// Absolute letter bounds, for invariant checks.
    pub fn absolute_bounds(&self) -> (f64, f64) {
        (self.rules.min_letters, self.rules.max_letters)
    }

    /// Fraction of post-discontinuation loss regained on retreatment.
    pub fn recovery_fraction(&self) -> f64 {
        self.rules.recovery_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macula_protocol::loader;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model() -> VisionModel {
        VisionModel::new(&loader::reference_protocol().unwrap())
    }

    #[test]
    fn test_ceiling_depends_on_baseline() {
        let m = model();
        let low = m.ceiling_for(50.0);
        let high = m.ceiling_for(75.0);
        assert_eq!(low, 56.0);
        assert_eq!(high, 87.0);
        // Never above the absolute ceiling.
        assert_eq!(m.ceiling_for(99.0), 100.0);
    }

    #[test]
    fn test_true_vision_never_exceeds_ceiling() {
        let m = model();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let baseline = 72.0;
        let ceiling = m.ceiling_for(baseline);
        let mut vision = baseline;
        for _ in 0..2_000 {
            let out = m
                .sample_outcome(DiseaseState::Stable, true, Some(0), vision, baseline, &mut rng)
                .unwrap();
            assert!(out.true_vision <= ceiling);
            assert!(out.true_vision >= 0.0);
            vision = out.true_vision;
        }
    }

    #[test]
    fn test_observed_can_exceed_ceiling_within_noise() {
        let m = model();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let baseline = 72.0;
        let ceiling = m.ceiling_for(baseline);
        // Drive true vision up against the ceiling, then look for observed
        // readings above it: measurement noise is applied after clamping.
        let mut vision = baseline;
        let mut seen_above = false;
        for _ in 0..5_000 {
            let out = m
                .sample_outcome(DiseaseState::Stable, true, Some(0), vision, baseline, &mut rng)
                .unwrap();
            vision = out.true_vision;
            if out.observed_vision > ceiling {
                seen_above = true;
            }
            assert!(out.observed_vision <= 100.0);
        }
        assert!(seen_above, "noise should occasionally report above the ceiling");
    }

    #[test]
    fn test_decay_pulls_treated_mean_toward_untreated() {
        let m = model();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let n = 20_000;
        let mean_delta = |days: Option<u32>, rng: &mut ChaCha8Rng| {
            let mut sum = 0.0;
            for _ in 0..n {
                let out = m
                    .sample_outcome(DiseaseState::Active, true, days, 50.0, 50.0, rng)
                    .unwrap();
                sum += out.true_vision - 50.0;
            }
            sum / n as f64
        };
        let fresh = mean_delta(Some(7), &mut rng);
        let stale = mean_delta(Some(120), &mut rng);
        // Active-state untreated mean is negative; a stale injection should
        // sit measurably below a fresh one.
        assert!(fresh > stale + 0.5, "fresh {fresh} vs stale {stale}");
    }

    #[test]
    fn test_untreated_highly_active_loses_vision() {
        let m = model();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut sum = 0.0;
        let n = 20_000;
        for _ in 0..n {
            let out = m
                .sample_outcome(DiseaseState::HighlyActive, false, None, 60.0, 60.0, &mut rng)
                .unwrap();
            sum += out.true_vision - 60.0;
        }
        let mean = sum / n as f64;
        assert!(mean < -3.0, "expected strong loss, got {mean}");
    }

    #[test]
    fn test_baseline_sampling_respects_clamps() {
        let m = model();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        for _ in 0..5_000 {
            let b = m.sample_baseline(&mut rng).unwrap();
            assert!((25.0..=85.0).contains(&b));
        }
    }
}
