//! Per-node estimation: the median pre-filter queue, input gating, and the
//! set of competing depth hypotheses at one grid location.
//!
//! Incoming soundings pass three gates (frozen prior, blunder filter, capture
//! radius), pick up a slope-correction offset and a dilution-scaled variance,
//! and are buffered in a depth-sorted queue. Once the queue holds the full
//! median length, each admission releases the median sample into the
//! hypothesis layer, so burst noise has to survive both the median and the
//! Bayes-factor monitor to found a track. Extraction never drains the queue;
//! call [`Node::flush`] for a coherent terminal snapshot.

use crate::hypothesis::{Hypothesis, UpdateOutcome};
use crate::params::{CONF_95PC, Params};
use crate::sounding::Sounding;
use crate::error::{CubeError, Result};

/// Ceiling on hypothesis strength ratios; odds better than this against the
/// field are not worth distinguishing.
pub(crate) const MAX_HYPOTHESIS_RATIO: f32 = 5.0;

/// A metric whisker: depth-match tolerance for nomination and removal, m.
pub(crate) const HYP_SELECTION_TOLERANCE: f32 = 0.01;

/// Two-sided 99% bound on the unit normal, used for the queue overlap test
/// (0.5% in either tail).
const QUEUE_CONF_99PC: f64 = 2.576;

/// Buffered pre-filter sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct QueueEntry {
    pub depth: f32,
    pub var: f32,
}

/// Per-node prior surface state.
///
/// `Frozen` nodes accept no data at all; `Unknown` nodes estimate freely but
/// apply no slope correction or blunder filtering.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PredictedDepth {
    Frozen,
    #[default]
    Unknown,
    Known { depth: f32, var: f32 },
}

/// One extracted node value: depth and uncertainty at the configured
/// confidence interval, plus the hypothesis strength ratio (0 = unambiguous,
/// values approaching the ceiling = contested).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub depth: f32,
    pub uncertainty: f32,
    pub ratio: f32,
}

/// Read-only view of one reportable hypothesis, as exposed by enumeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HypothesisView {
    pub depth: f32,
    /// Posterior estimate variance, m^2.
    pub variance: f32,
    pub n_samples: u32,
}

/// Estimation state for a single grid position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Pre-filter queue, sorted shallow-first (positive-up: descending value).
    queue: Vec<QueueEntry>,
    /// Competing tracks, most recently born first.
    hypotheses: Vec<Hypothesis>,
    /// Operator override; index into `hypotheses`.
    nominated: Option<usize>,
    predicted: PredictedDepth,
    debug: bool,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all estimation state but keep the prior surface values.
    pub fn reinit(&mut self) {
        self.queue = Vec::new();
        self.hypotheses = Vec::new();
        self.nominated = None;
    }

    pub fn predicted(&self) -> PredictedDepth {
        self.predicted
    }

    pub fn set_predicted(&mut self, predicted: PredictedDepth) {
        self.predicted = predicted;
    }

    pub fn start_debug(&mut self) {
        self.debug = true;
    }

    pub fn stop_debug(&mut self) {
        self.debug = false;
    }

    pub(crate) fn debug(&self) -> bool {
        self.debug
    }

    pub(crate) fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn is_nominated(&self) -> bool {
        self.nominated.is_some()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queue_entries(&self) -> &[QueueEntry] {
        &self.queue
    }

    pub(crate) fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    pub(crate) fn nominated_index(&self) -> Option<usize> {
        self.nominated
    }

    /// Bytes of lazily allocated state for a node expected to carry
    /// `expected_hypotheses` tracks.
    pub fn estimated_bytes(expected_hypotheses: f32, p: &Params) -> usize {
        std::mem::size_of::<QueueEntry>() * p.median_length
            + (std::mem::size_of::<Hypothesis>() as f32 * expected_hypotheses).floor() as usize
    }

    fn next_id(&self) -> u16 {
        self.hypotheses.first().map_or(1, |h| h.id.wrapping_add(1))
    }

    /// Push a new track at the head, keeping any nomination pointing at the
    /// same hypothesis it did before.
    fn push_hypothesis(&mut self, h: Hypothesis) {
        self.hypotheses.insert(0, h);
        if let Some(i) = self.nominated {
            self.nominated = Some(i + 1);
        }
    }

    /// Seed a data hypothesis at the given depth and variance.
    pub fn add_hypothesis(&mut self, depth: f32, var: f32) {
        let id = self.next_id();
        self.push_hypothesis(Hypothesis::new(f64::from(depth), f64::from(var), id));
    }

    /// Seed an initialization-surface hypothesis (zero samples): it anchors
    /// slope correction but is invisible to every disambiguation policy.
    pub fn add_null_hypothesis(&mut self, depth: f32, var: f32) {
        let id = self.next_id();
        self.push_hypothesis(Hypothesis::null(f64::from(depth), f64::from(var), id));
    }

    pub(crate) fn reportable_count(&self) -> usize {
        self.hypotheses.iter().filter(|h| h.is_reportable()).count()
    }

    /// Reportable hypothesis count as a surface value.
    pub(crate) fn hypothesis_count(&self, p: &Params) -> f32 {
        match self.reportable_count() {
            0 => p.no_data_value,
            n => n as f32,
        }
    }

    /// The sole reportable hypothesis, if the node has exactly one.
    pub(crate) fn single_reportable(&self) -> Option<&Hypothesis> {
        let mut it = self.hypotheses.iter().filter(|h| h.is_reportable());
        let first = it.next()?;
        if it.next().is_some() { None } else { Some(first) }
    }

    /// Reportable hypotheses in most-recent-first order.
    pub fn enumerate(&self) -> Vec<HypothesisView> {
        self.hypotheses
            .iter()
            .filter(|h| h.is_reportable())
            .map(|h| HypothesisView {
                depth: h.mean as f32,
                variance: h.variance as f32,
                n_samples: h.n_samples,
            })
            .collect()
    }

    /// Position of the nominated hypothesis within [`Node::enumerate`] order.
    pub(crate) fn nominated_ordinal(&self) -> Option<usize> {
        let idx = self.nominated?;
        Some(
            self.hypotheses[..idx]
                .iter()
                .filter(|h| h.is_reportable())
                .count(),
        )
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    /// Offer a sounding at squared distance `dist_sq` from the node. Returns
    /// true when the sample was admitted to the pre-filter; gated rejections
    /// are silent.
    pub fn insert(&mut self, dist_sq: f64, snd: &Sounding, p: &Params) -> bool {
        let dist = dist_sq.sqrt();

        let target_depth = match self.predicted {
            PredictedDepth::Frozen => {
                if self.debug {
                    tracing::trace!(east = snd.east, north = snd.north, "node frozen, sounding ignored");
                }
                return false;
            }
            PredictedDepth::Known { depth, var } => {
                // Blunder test only makes sense against a predicted depth
                let t = f64::from(depth);
                let limit = (t - f64::from(p.blunder_min))
                    .min(t - f64::from(p.blunder_pcent) * t.abs())
                    .min(t - f64::from(p.blunder_scalar) * f64::from(var).sqrt());
                if f64::from(snd.depth) < limit {
                    if self.debug {
                        tracing::trace!(depth = snd.depth, limit, "deep spike rejected by blunder filter");
                    }
                    return false;
                }
                depth
            }
            PredictedDepth::Unknown => snd.depth,
        };

        let capture = (f64::from(p.capture_dist_scale) * f64::from(target_depth.abs())).max(0.5);
        if dist > capture {
            if self.debug {
                tracing::trace!(dist, capture, target_depth, "sounding outside capture radius");
            }
            return false;
        }

        // Horizontal positioning uncertainty widens the effective distance
        let dist = dist + f64::from(CONF_95PC) * f64::from(snd.dr).sqrt();

        let offset = match self.predicted {
            PredictedDepth::Known { depth, .. } if snd.range != 0.0 => depth - snd.range,
            _ => 0.0,
        };
        let variance = f64::from(snd.dz) * (1.0 + p.var_scale * dist.powf(p.dist_exp));

        if self.debug {
            tracing::trace!(
                depth = snd.depth,
                offset,
                variance,
                dist,
                "sounding accepted at node"
            );
        }

        if let Some(median) = self.queue_admit(snd.depth + offset, variance as f32, p) {
            self.update_hypotheses(f64::from(median.depth), f64::from(median.var), p);
        }
        self.nominated = None;
        true
    }

    /// Sorted insert; once the queue holds the full median length the center
    /// sample is withdrawn for the hypothesis layer, after the 99% CI overlap
    /// check has had a chance to cull outliers.
    fn queue_admit(&mut self, depth: f32, var: f32, p: &Params) -> Option<QueueEntry> {
        if self.queue.capacity() == 0 {
            self.queue.reserve_exact(p.median_length);
        }
        let pos = self
            .queue
            .iter()
            .position(|e| e.depth <= depth)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, QueueEntry { depth, var });

        if self.queue.len() < p.median_length {
            return None;
        }

        let shallow = self.queue[0];
        let deep = self.queue[self.queue.len() - 1];
        let lo_water = f64::from(shallow.depth) - QUEUE_CONF_99PC * f64::from(shallow.var).sqrt();
        let hi_water = f64::from(deep.depth) + QUEUE_CONF_99PC * f64::from(deep.var).sqrt();
        if lo_water >= hi_water {
            self.truncate_outliers(p);
        }

        if self.queue.is_empty() {
            return None;
        }
        let mid = self.queue.len() / 2;
        Some(self.queue.remove(mid))
    }

    /// Eeg-quotient outlier rejection over the queued samples. The quotients
    /// are approximately F(1, N-2) distributed, positive and monotone in
    /// departure, so a one-sided critical value applies.
    fn truncate_outliers(&mut self, p: &Params) {
        if self.queue.len() < 3 {
            return;
        }
        let n = (self.queue.len() - 1) as f64; // n points + 1 outlier
        let mut mean = 0.0_f64;
        let mut ssd = 0.0_f64;
        for e in &self.queue {
            mean += f64::from(e.depth);
            ssd += f64::from(e.depth) * f64::from(e.depth);
        }
        ssd -= mean * mean / (n + 1.0);
        mean /= n + 1.0;
        let ssd_k = n * ssd / (n * n - 1.0);

        let limit = f64::from(p.quotient_limit);
        let debug = self.debug;
        self.queue.retain(|e| {
            let diff_sq = (f64::from(e.depth) - mean).powi(2);
            let q = diff_sq / (ssd_k - diff_sq / (n - 1.0));
            if q >= limit && debug {
                tracing::trace!(depth = e.depth, q, "queued sample dropped as outlier");
            }
            q < limit
        });
    }

    /// Drain the pre-filter into the hypothesis layer, median-outward so the
    /// tracks see approximately sorted increments. Idempotent on an empty
    /// queue.
    pub fn flush(&mut self, p: &Params) {
        if self.queue.is_empty() {
            return;
        }
        self.truncate_outliers(p);
        let queue = std::mem::take(&mut self.queue);
        let n = queue.len() as i64;
        let (mut ex, mut dir) = if n % 2 == 0 { (n / 2 - 1, 1_i64) } else { (n / 2, -1_i64) };
        let mut step = 1_i64;
        while ex >= 0 && ex < n {
            let e = queue[ex as usize];
            self.update_hypotheses(f64::from(e.depth), f64::from(e.var), p);
            ex += dir * step;
            dir = -dir;
            step += 1;
        }
    }

    /// Route a released sample to the closest-forecast track, intervening
    /// with a fresh track when the monitor rejects it.
    pub(crate) fn update_hypotheses(&mut self, z: f64, r: f64, p: &Params) {
        let Some(best) = self.best_match(z, r) else {
            // No tracks yet: initialisation
            let id = self.next_id();
            self.push_hypothesis(Hypothesis::new(z, r, id));
            return;
        };
        if self.hypotheses[best].update(z, r, p) == UpdateOutcome::Intervention {
            if self.debug {
                tracing::debug!(z, r, track = self.hypotheses[best].id, "intervention: new track");
            }
            self.hypotheses[best].reset_monitor();
            let id = self.next_id();
            self.push_hypothesis(Hypothesis::new(z, r, id));
        }
    }

    /// Track minimizing the normalized one-step forecast error; ties go to
    /// the most recently created (the head).
    fn best_match(&self, z: f64, r: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, h) in self.hypotheses.iter().enumerate() {
            let error = h.forecast_error(z, r);
            if best.is_none_or(|(_, e)| error < e) {
                best = Some((i, error));
            }
        }
        best.map(|(i, _)| i)
    }

    // ── Extraction ───────────────────────────────────────────────────────────

    fn no_data(p: &Params) -> Estimate {
        Estimate {
            depth: p.no_data_value,
            uncertainty: p.no_data_value,
            ratio: p.no_data_value,
        }
    }

    fn report(h: &Hypothesis, ratio: f32, p: &Params) -> Estimate {
        Estimate {
            depth: h.mean as f32,
            uncertainty: h.ci(p),
            ratio,
        }
    }

    /// Longest-held disambiguation: the track that has absorbed the most data
    /// wins; a nomination overrides everything. This is the only policy that
    /// needs no spatial context.
    pub fn extract(&self, p: &Params) -> Estimate {
        if let Some(i) = self.nominated {
            return Self::report(&self.hypotheses[i], 0.0, p);
        }
        match self.reportable_count() {
            0 => Self::no_data(p),
            1 => Self::report(self.single_reportable().unwrap_or(&self.hypotheses[0]), 0.0, p),
            _ => self.choose_prior(p),
        }
    }

    fn choose_prior(&self, p: &Params) -> Estimate {
        let mut best: Option<&Hypothesis> = None;
        for h in self.hypotheses.iter().filter(|h| h.is_reportable()) {
            // >= so that on equal counts the oldest track is retained
            if best.is_none_or(|b| h.n_samples >= b.n_samples) {
                best = Some(h);
            }
        }
        let Some(best) = best else {
            return Self::no_data(p);
        };
        let runner_up = self
            .hypotheses
            .iter()
            .filter(|h| h.is_reportable() && !std::ptr::eq(*h, best))
            .map(|h| h.n_samples)
            .max()
            .unwrap_or(0);
        let ratio = if runner_up > 0 {
            (MAX_HYPOTHESIS_RATIO - best.n_samples as f32 / runner_up as f32).max(0.0)
        } else {
            0.0
        };
        Self::report(best, ratio, p)
    }

    /// Guide-driven disambiguation: minimize the normalized distance between
    /// each track's estimate and the guide value. Falls back to [`extract`]
    /// with fewer than two reportable tracks.
    pub fn extract_closest(&self, guide_depth: f64, guide_var: f64, p: &Params) -> Estimate {
        if let Some(i) = self.nominated {
            return Self::report(&self.hypotheses[i], 0.0, p);
        }
        if self.reportable_count() < 2 {
            return self.extract(p);
        }
        let mut soln: Option<(&Hypothesis, f64)> = None;
        let mut n_total: u32 = 0;
        for h in self.hypotheses.iter().filter(|h| h.is_reportable()) {
            let error = ((h.mean - guide_depth) / guide_var.sqrt()).abs();
            if soln.is_none_or(|(_, e)| error < e) {
                soln = Some((h, error));
            }
            n_total += h.n_samples;
        }
        let Some((soln, _)) = soln else {
            return Self::no_data(p);
        };
        Self::report(soln, Self::rest_ratio(soln.n_samples, n_total), p)
    }

    /// Approximate-posterior disambiguation: the guide supplies the
    /// likelihood term and the absorbed sample count the prior.
    pub fn extract_posterior(&self, guide_depth: f64, guide_var: f64, p: &Params) -> Estimate {
        if let Some(i) = self.nominated {
            return Self::report(&self.hypotheses[i], 0.0, p);
        }
        if self.reportable_count() < 2 {
            return self.extract(p);
        }
        let mut soln: Option<(&Hypothesis, f64)> = None;
        let mut n_total: u32 = 0;
        for h in self.hypotheses.iter().filter(|h| h.is_reportable()) {
            let d = guide_depth - h.mean;
            let posterior = -d * d / (2.0 * guide_var) + f64::from(h.n_samples).ln();
            if soln.is_none_or(|(_, best)| posterior > best) {
                soln = Some((h, posterior));
            }
            n_total += h.n_samples;
        }
        let Some((soln, _)) = soln else {
            return Self::no_data(p);
        };
        Self::report(soln, Self::rest_ratio(soln.n_samples, n_total), p)
    }

    /// Strength ratio against the pooled samples of all competing tracks.
    fn rest_ratio(n_best: u32, n_total: u32) -> f32 {
        let rest = n_total - n_best;
        if rest == 0 {
            return 0.0;
        }
        (MAX_HYPOTHESIS_RATIO - n_best as f32 / rest as f32).max(0.0)
    }

    // ── Nomination ───────────────────────────────────────────────────────────

    /// Mark the reportable hypothesis nearest `depth` (within a metric
    /// whisker) to be reported verbatim until new data arrives or the
    /// nomination is reset.
    pub fn nominate(&mut self, depth: f32) -> Result<()> {
        self.nominated = None;
        let mut best: Option<(usize, f32)> = None;
        for (i, h) in self.hypotheses.iter().enumerate() {
            if !h.is_reportable() {
                continue;
            }
            let diff = (depth - h.mean as f32).abs();
            if diff < HYP_SELECTION_TOLERANCE && best.is_none_or(|(_, d)| diff < d) {
                best = Some((i, diff));
            }
        }
        match best {
            Some((i, _)) => {
                self.nominated = Some(i);
                Ok(())
            }
            None => Err(CubeError::NotFound {
                depth,
                tolerance: HYP_SELECTION_TOLERANCE,
            }),
        }
    }

    pub fn reset_nomination(&mut self) {
        self.nominated = None;
    }

    /// Remove the hypothesis matching `depth` within a metric whisker; the
    /// match must be unique.
    pub fn remove_hypothesis(&mut self, depth: f32) -> Result<()> {
        let matches: Vec<usize> = self
            .hypotheses
            .iter()
            .enumerate()
            .filter(|(_, h)| (depth - h.mean as f32).abs() < HYP_SELECTION_TOLERANCE)
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => Err(CubeError::NotFound {
                depth,
                tolerance: HYP_SELECTION_TOLERANCE,
            }),
            [idx] => {
                let idx = *idx;
                self.hypotheses.remove(idx);
                self.nominated = match self.nominated {
                    Some(n) if n == idx => None,
                    Some(n) if n > idx => Some(n - 1),
                    other => other,
                };
                Ok(())
            }
            _ => Err(CubeError::AmbiguousMatch {
                depth,
                tolerance: HYP_SELECTION_TOLERANCE,
            }),
        }
    }

    // ── Serialization support ───────────────────────────────────────────────

    pub(crate) fn from_parts(
        queue: Vec<QueueEntry>,
        hypotheses: Vec<Hypothesis>,
        nominated: Option<usize>,
        predicted: PredictedDepth,
        debug: bool,
    ) -> Self {
        Self {
            queue,
            hypotheses,
            nominated,
            predicted,
            debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamsBuilder;
    use approx::assert_relative_eq;

    const NO_DATA: f32 = 1.0e6;

    fn params(median: usize) -> Params {
        ParamsBuilder::new()
            .median_length(median)
            .build(1.0, 1.0, NO_DATA)
            .unwrap()
    }

    fn sounding(depth: f32, dz: f32) -> Sounding {
        Sounding::new(0.0, 0.0, depth, 0.0, dz, 0.0)
    }

    #[test]
    fn third_admission_releases_the_first_median() {
        let p = params(3);
        let mut node = Node::new();
        assert!(node.insert(0.0, &sounding(-10.02, 0.01), &p));
        assert!(node.insert(0.0, &sounding(-9.98, 0.01), &p));
        assert_eq!(node.reportable_count(), 0);
        assert!(node.insert(0.0, &sounding(-10.00, 0.01), &p));
        assert_eq!(node.reportable_count(), 1);
        assert_eq!(node.queue_len(), 2);
        let est = node.extract(&p);
        assert_relative_eq!(est.depth, -10.0, epsilon = 1e-3);
    }

    #[test]
    fn queue_stays_sorted_shallow_first() {
        let p = params(5);
        let mut node = Node::new();
        for d in [-12.0_f32, -9.0, -11.0, -10.0] {
            node.insert(0.0, &sounding(d, 0.01), &p);
        }
        let depths: Vec<f32> = node.queue_entries().iter().map(|e| e.depth).collect();
        assert_eq!(depths, vec![-9.0, -10.0, -11.0, -12.0]);
    }

    #[test]
    fn capture_radius_boundary_is_admitted() {
        let p = params(3);
        let mut node = Node::new();
        // Unknown prior: target depth is the sounding's own, |-20| * 0.05 = 1 m
        let snd = sounding(-20.0, 0.01);
        assert!(node.insert(1.0, &snd, &p), "exactly on the radius");
        assert!(!node.insert(1.0001_f64.powi(2), &snd, &p), "just outside");
    }

    #[test]
    fn shoal_capture_floor_is_half_a_meter() {
        let p = params(3);
        let mut node = Node::new();
        let snd = sounding(-1.0, 0.01); // capture would be 0.05 m without floor
        assert!(node.insert(0.25 * 0.25, &snd, &p));
        assert!(!node.insert(0.51 * 0.51, &snd, &p));
    }

    #[test]
    fn frozen_node_rejects_everything() {
        let p = params(3);
        let mut node = Node::new();
        node.set_predicted(PredictedDepth::Frozen);
        assert!(!node.insert(0.0, &sounding(-10.0, 0.01), &p));
        assert_eq!(node.queue_len(), 0);
    }

    #[test]
    fn blunder_filter_drops_deep_spikes_only() {
        let p = ParamsBuilder::new()
            .median_length(3)
            .blunders(10.0, 0.25, 3.0)
            .build(1.0, 1.0, NO_DATA)
            .unwrap();
        let mut node = Node::new();
        node.set_predicted(PredictedDepth::Known {
            depth: -20.0,
            var: 1.0,
        });
        // limit = min(-30, -25, -23) = -30: a -40 m return is a deep spike
        assert!(!node.insert(0.0, &sounding(-40.0, 0.01), &p));
        // Shallower-than-limit values pass, however extreme upward
        assert!(node.insert(0.0, &sounding(-5.0, 0.01), &p));
    }

    #[test]
    fn slope_offset_applied_when_range_present() {
        let p = params(3);
        let mut node = Node::new();
        node.set_predicted(PredictedDepth::Known {
            depth: -10.0,
            var: 0.1,
        });
        let mut snd = sounding(-10.5, 0.01);
        snd.range = -10.2;
        assert!(node.insert(0.0, &snd, &p));
        // offset = pred - range = 0.2, so the queued value is -10.3
        assert_relative_eq!(node.queue_entries()[0].depth, -10.3, epsilon = 1e-6);
    }

    #[test]
    fn ingest_invalidates_nomination() {
        let p = params(3);
        let mut node = Node::new();
        node.add_hypothesis(-10.0, 0.01);
        node.nominate(-10.0).unwrap();
        assert!(node.is_nominated());
        node.insert(0.0, &sounding(-10.0, 0.01), &p);
        assert!(!node.is_nominated());
    }

    #[test]
    fn nominate_requires_a_close_match() {
        let p = params(3);
        let mut node = Node::new();
        node.add_hypothesis(-10.0, 0.01);
        assert!(matches!(
            node.nominate(-10.5),
            Err(CubeError::NotFound { .. })
        ));
        node.nominate(-10.005).unwrap();
        let est = node.extract(&p);
        assert_relative_eq!(est.depth, -10.0);
        assert_eq!(est.ratio, 0.0);
    }

    #[test]
    fn remove_demands_a_unique_match() {
        let mut node = Node::new();
        node.add_hypothesis(-10.0, 0.01);
        node.add_hypothesis(-10.005, 0.01);
        assert!(matches!(
            node.remove_hypothesis(-10.0),
            Err(CubeError::AmbiguousMatch { .. })
        ));
        node.add_hypothesis(-30.0, 0.01);
        node.remove_hypothesis(-30.0).unwrap();
        assert_eq!(node.hypotheses().len(), 2);
    }

    #[test]
    fn removing_the_nominated_track_clears_nomination() {
        let mut node = Node::new();
        node.add_hypothesis(-10.0, 0.01);
        node.add_hypothesis(-30.0, 0.01);
        node.nominate(-30.0).unwrap();
        node.remove_hypothesis(-30.0).unwrap();
        assert!(!node.is_nominated());
    }

    #[test]
    fn null_hypothesis_reports_no_data() {
        let p = params(3);
        let mut node = Node::new();
        node.add_null_hypothesis(-20.0, 1.0);
        let est = node.extract(&p);
        assert_eq!(est.depth, NO_DATA);
        assert_eq!(node.hypothesis_count(&p), NO_DATA);
    }

    #[test]
    fn flush_is_idempotent_and_drains_residue() {
        let p = params(5);
        let mut node = Node::new();
        for _ in 0..4 {
            node.insert(0.0, &sounding(-10.0, 0.01), &p);
        }
        assert_eq!(node.reportable_count(), 0);
        node.flush(&p);
        let absorbed: u32 = node.hypotheses().iter().map(|h| h.n_samples()).sum();
        assert_eq!(absorbed, 4);
        let before = node.clone();
        node.flush(&p);
        assert_eq!(node, before);
    }

    #[test]
    fn guide_selection_prefers_the_matching_track() {
        let p = params(3);
        let mut node = Node::new();
        node.add_hypothesis(-30.0, 0.01);
        node.add_hypothesis(-10.0, 0.01);
        let est = node.extract_closest(-10.0, 0.01, &p);
        assert_relative_eq!(est.depth, -10.0);
        let est = node.extract_closest(-30.0, 0.01, &p);
        assert_relative_eq!(est.depth, -30.0);
    }

    mod invariants {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn queue_is_bounded_and_sorted_shallow_first(
                depths in proptest::collection::vec(-100.0_f32..-1.0, 1..200),
                median in (1_usize..=10).prop_map(|k| 2 * k + 1),
            ) {
                let p = ParamsBuilder::new()
                    .median_length(median)
                    .build(1.0, 1.0, NO_DATA)
                    .unwrap();
                let mut node = Node::new();
                for d in depths {
                    node.insert(0.0, &sounding(d, 0.25), &p);
                    prop_assert!(node.queue_len() < p.median_length);
                    let q = node.queue_entries();
                    prop_assert!(q.windows(2).all(|w| w[0].depth >= w[1].depth));
                }
            }

            #[test]
            fn tracks_keep_positive_bounded_variances(
                depths in proptest::collection::vec(-50.0_f32..-1.0, 1..150),
            ) {
                let p = ParamsBuilder::new()
                    .median_length(3)
                    .build(1.0, 1.0, NO_DATA)
                    .unwrap();
                let mut node = Node::new();
                for d in depths {
                    node.insert(0.0, &sounding(d, 0.25), &p);
                }
                node.flush(&p);
                for h in node.hypotheses() {
                    prop_assert!(h.variance() > 0.0);
                    prop_assert!(h.pred_variance >= h.variance());
                }
            }
        }
    }

    #[test]
    fn posterior_selection_weighs_sample_counts() {
        let p = params(3);
        let mut node = Node::new();
        node.add_hypothesis(-10.0, 0.01);
        node.add_hypothesis(-10.6, 0.01);
        // Bulk up the -10.6 m track so its prior outweighs a mid-way guide
        for _ in 0..200 {
            node.update_hypotheses(-10.6, 0.01, &p);
        }
        let est = node.extract_posterior(-10.3, 1.0, &p);
        assert_relative_eq!(est.depth, -10.6, epsilon = 1e-2);
    }
}
