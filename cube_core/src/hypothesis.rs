//! Single depth track: a univariate dynamic linear model with discount-factor
//! system noise and West & Harrison Bayes-factor monitoring.
//!
//! Each update first asks the monitor whether the observation still supports
//! the track (W&H, Bayesian Forecasting and Dynamic Models, 2ed, ch. 11,
//! sec. 11.5.1: cumulative Bayes factors against a level-shift alternative).
//! If not, the caller is told to intervene: the track's monitor is reset and a
//! fresh hypothesis is seeded from the offending observation. Otherwise the
//! standard DLM update equations run (W&H ch. 2), with the evolution noise set
//! dynamically from the previous posterior variance through the discount
//! factor. Updates are carried in f64 to avoid round-off trouble on long
//! sequences.

use crate::params::Params;

/// Result of offering an observation to a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Observation absorbed; estimates updated.
    Absorbed,
    /// The monitor rejected the observation: start a new track with it.
    Intervention,
}

/// One recursive depth estimate at a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub(crate) mean: f64,
    pub(crate) variance: f64,
    pub(crate) pred_mean: f64,
    pub(crate) pred_variance: f64,
    pub(crate) cum_bayes: f64,
    pub(crate) seq_len: u16,
    /// Debug ordinal, 1-based in creation order; regenerated on write-out.
    pub(crate) id: u16,
    /// Observations absorbed. Zero marks an initialization-surface seed that
    /// disambiguation must never report.
    pub(crate) n_samples: u32,
    /// Running sample variance of the ingested depths, m^2.
    pub(crate) sample_var: f64,
}

impl Hypothesis {
    /// Track seeded from an observation.
    pub(crate) fn new(mean: f64, variance: f64, id: u16) -> Self {
        Self {
            mean,
            variance,
            pred_mean: mean,
            pred_variance: variance,
            cum_bayes: 1.0,
            seq_len: 0,
            id,
            n_samples: 1,
            sample_var: 0.0,
        }
    }

    /// Track seeded from a prior surface: identical state but no samples, so
    /// it anchors slope correction without ever being reported.
    pub(crate) fn null(mean: f64, variance: f64, id: u16) -> Self {
        Self {
            n_samples: 0,
            ..Self::new(mean, variance, id)
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn n_samples(&self) -> u32 {
        self.n_samples
    }

    /// Whether this track has absorbed real data.
    pub fn is_reportable(&self) -> bool {
        self.n_samples > 0
    }

    /// Normalized absolute forecast error of `z` against this track.
    pub(crate) fn forecast_error(&self, z: f64, r: f64) -> f64 {
        ((z - self.pred_mean) / (self.pred_variance + r).sqrt()).abs()
    }

    /// Monitor step. Returns false when an intervention is indicated, in
    /// which case the running-length state has only been advanced for the
    /// cumulative/runlength failures, never for a single-factor outlier.
    fn monitor(&mut self, z: f64, r: f64, p: &Params) -> bool {
        let forecast_var = self.pred_variance + r;
        let error = (z - self.pred_mean).abs() / forecast_var.sqrt();
        let h = p.est_offset;
        let bayes_factor = (0.5 * (h * h - 2.0 * h * error)).exp();
        tracing::trace!(z, r, error, bayes_factor, "monitor");

        // Single-component failure: a potential outlier
        if bayes_factor < p.bayes_fac_t {
            return false;
        }

        if self.cum_bayes < 1.0 {
            self.seq_len += 1;
        } else {
            self.seq_len = 1;
        }
        self.cum_bayes = bayes_factor * self.cum_bayes.min(1.0);

        // Cumulative evidence or drift failure
        if self.cum_bayes < p.bayes_fac_t || u32::from(self.seq_len) > p.runlength_t {
            return false;
        }
        true
    }

    pub(crate) fn reset_monitor(&mut self) {
        self.cum_bayes = 1.0;
        self.seq_len = 0;
    }

    /// Offer observation `z` with variance `r` to the track.
    pub(crate) fn update(&mut self, z: f64, r: f64, p: &Params) -> UpdateOutcome {
        if !self.monitor(z, r, p) {
            return UpdateOutcome::Intervention;
        }

        let sys_variance = self.variance * (1.0 - p.discount) / p.discount;
        let gain = self.pred_variance / (r + self.pred_variance);
        self.pred_mean += gain * (z - self.pred_mean);
        self.mean = self.pred_mean;
        self.variance = r * self.pred_variance / (r + self.pred_variance);
        self.pred_variance = self.variance + sys_variance;
        self.n_samples += 1;

        let n = f64::from(self.n_samples);
        if self.n_samples >= 2 {
            let d = z - self.mean;
            self.sample_var = self.sample_var * (n - 2.0) / (n - 1.0) + d * d / (n - 1.0);
        }
        UpdateOutcome::Absorbed
    }

    /// Variance the reporting layer converts to a confidence interval.
    #[cfg(feature = "max-variance")]
    pub(crate) fn reported_variance(&self) -> f64 {
        self.sample_var.max(self.variance)
    }

    #[cfg(all(feature = "sample-variance", not(feature = "max-variance")))]
    pub(crate) fn reported_variance(&self) -> f64 {
        self.sample_var
    }

    #[cfg(not(any(feature = "sample-variance", feature = "max-variance")))]
    pub(crate) fn reported_variance(&self) -> f64 {
        self.variance
    }

    /// Uncertainty at the configured confidence interval, m.
    pub(crate) fn ci(&self, p: &Params) -> f32 {
        (f64::from(p.sd2conf_scale) * self.reported_variance().sqrt()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamsBuilder;
    use approx::assert_relative_eq;

    fn params() -> Params {
        ParamsBuilder::new().build(1.0, 1.0, f32::MAX).unwrap()
    }

    #[test]
    fn consistent_observations_tighten_the_track() {
        let p = params();
        let mut h = Hypothesis::new(-10.0, 0.01, 1);
        for _ in 0..50 {
            assert_eq!(h.update(-10.0, 0.01, &p), UpdateOutcome::Absorbed);
            assert!(h.variance > 0.0);
            assert!(h.pred_variance >= h.variance);
        }
        assert_eq!(h.n_samples, 51);
        assert_relative_eq!(h.mean, -10.0, epsilon = 1e-9);
        assert!(h.variance < 0.01);
    }

    #[test]
    fn level_shift_triggers_intervention() {
        let p = params();
        let mut h = Hypothesis::new(-10.0, 0.01, 1);
        for _ in 0..20 {
            h.update(-10.0, 0.01, &p);
        }
        assert_eq!(h.update(-30.0, 0.01, &p), UpdateOutcome::Intervention);
        // A rejected outlier leaves the estimates untouched
        assert_relative_eq!(h.mean, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn monitor_is_symmetric_in_error_sign() {
        let p = params();
        let mut above = Hypothesis::new(-10.0, 0.01, 1);
        let mut below = Hypothesis::new(-10.0, 0.01, 1);
        let up = above.update(-9.0, 0.01, &p);
        let down = below.update(-11.0, 0.01, &p);
        assert_eq!(up, down);
        assert_relative_eq!(above.cum_bayes, below.cum_bayes, epsilon = 1e-12);
    }

    #[test]
    fn null_hypothesis_is_not_reportable() {
        let h = Hypothesis::null(-20.0, 1.0, 1);
        assert!(!h.is_reportable());
        assert_eq!(h.n_samples, 0);
    }

    #[test]
    fn sample_variance_tracks_input_spread() {
        let p = params();
        let mut h = Hypothesis::new(-10.0, 0.5, 1);
        for z in [-10.2, -9.8, -10.1, -9.9, -10.0] {
            h.update(z, 0.5, &p);
        }
        assert!(h.sample_var > 0.0);
        assert!(h.sample_var < 0.5);
    }
}
