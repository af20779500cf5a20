//! Grid of estimation nodes: sounding dispatch, surface extraction with the
//! selectable disambiguation policies, and the single-surface cache.
//!
//! The grid is coordinate-free: node (0, 0) sits at the north-west corner
//! and every georeferenced operation takes an absolute `(west, north)` anchor
//! at call time. One grid is owned by one logical actor; grids are independent
//! and may be processed in parallel at the application level.

use crate::error::{CubeError, Result};
use crate::hypothesis::Hypothesis;
use crate::node::{Estimate, Node, PredictedDepth};
use crate::params::{Extractor, Params};
use crate::sounding::Sounding;

/// 99% horizontal confidence scale used to bound the spreading radius.
const SPREAD_CONF_99PC: f64 = 2.95;

/// Scalar a grid can cache and serve from its extracted-surface cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceKind {
    #[default]
    Depth = 0,
    Uncertainty = 1,
    HypothesisCount = 2,
    StrengthRatio = 3,
}

/// Triple extraction result (always bypasses the cache).
#[derive(Debug, Clone, PartialEq)]
pub struct Surfaces {
    pub depth: Vec<f32>,
    pub uncertainty: Vec<f32>,
    pub ratio: Vec<f32>,
}

/// Uncertainty interpretation for prior-surface initialization.
#[derive(Debug, Clone, Copy)]
pub enum PriorUncertainty<'a> {
    /// One fixed standard deviation, m.
    FixedSdev(f32),
    /// Standard deviation as a percentage of depth, at the configured CI.
    PercentSdev(f32),
    /// Per-cell variance array, m^2, laid out like the depth data.
    Variance(&'a [f32]),
}

/// One reportable hypothesis as seen by enumeration, with its uncertainty
/// already scaled to the configured confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HypothesisSummary {
    pub depth: f32,
    pub ci: f32,
    pub n_samples: u32,
}

/// Georeferenced hypothesis listing for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHypotheses {
    pub east: f64,
    pub north: f64,
    pub hypotheses: Vec<HypothesisSummary>,
    /// Position of the nominated hypothesis in `hypotheses`, if any.
    pub nominated: Option<usize>,
}

/// Fixed-size grid of [`Node`]s with spacing metadata and one cached surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    nx: usize,
    ny: usize,
    dx: f32,
    dy: f32,
    nodes: Vec<Node>,
    /// Row-major cache; `None` marks a stale cell.
    cache: Vec<Option<f32>>,
    cached: SurfaceKind,
}

impl Grid {
    /// Construct an `nx` x `ny` grid with node spacings `dx`, `dy` in meters.
    pub fn new(nx: usize, ny: usize, dx: f32, dy: f32, cached: SurfaceKind) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(CubeError::BadConfig(format!(
                "grid dimensions must be positive, got {nx} x {ny}"
            )));
        }
        if !(dx > 0.0 && dy > 0.0) {
            return Err(CubeError::BadConfig(format!(
                "node spacings must be positive, got ({dx}, {dy})"
            )));
        }
        Ok(Self {
            nx,
            ny,
            dx,
            dy,
            nodes: vec![Node::new(); nx * ny],
            cache: vec![None; nx * ny],
            cached,
        })
    }

    pub fn width(&self) -> usize {
        self.nx
    }

    pub fn height(&self) -> usize {
        self.ny
    }

    pub fn spacings(&self) -> (f32, f32) {
        (self.dx, self.dy)
    }

    pub fn cached_kind(&self) -> SurfaceKind {
        self.cached
    }

    fn index(&self, col: usize, row: usize) -> Result<usize> {
        if col >= self.nx || row >= self.ny {
            return Err(CubeError::OutOfBounds {
                col: col as i64,
                row: row as i64,
            });
        }
        Ok(row * self.nx + col)
    }

    pub fn node(&self, col: usize, row: usize) -> Result<&Node> {
        self.index(col, row).map(|i| &self.nodes[i])
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn cache_cells(&self) -> &[Option<f32>] {
        &self.cache
    }

    pub(crate) fn from_parts(
        nx: usize,
        ny: usize,
        dx: f32,
        dy: f32,
        nodes: Vec<Node>,
        cache: Vec<Option<f32>>,
        cached: SurfaceKind,
    ) -> Self {
        Self {
            nx,
            ny,
            dx,
            dy,
            nodes,
            cache,
            cached,
        }
    }

    /// Toggle trace-event emission for one node.
    pub fn set_debug(&mut self, col: usize, row: usize, debug: bool) -> Result<()> {
        let idx = self.index(col, row)?;
        self.nodes[idx].set_debug(debug);
        Ok(())
    }

    // ── Cache management ────────────────────────────────────────────────────

    /// Drop every cached value.
    pub fn invalidate_cache(&mut self) {
        self.cache.fill(None);
    }

    /// Switch the cached scalar. Cells already known to hold no data stay
    /// valid (a node with no data reads back no-data under every scalar);
    /// everything else is recomputed on demand.
    pub fn set_cache(&mut self, kind: SurfaceKind, p: &Params) {
        if kind == self.cached {
            return;
        }
        self.cached = kind;
        for cell in &mut self.cache {
            if *cell != Some(p.no_data_value) {
                *cell = None;
            }
        }
    }

    /// Reinitialize every node (prior surface values survive) and drop the
    /// cache.
    pub fn reinit(&mut self) {
        for node in &mut self.nodes {
            node.reinit();
        }
        self.invalidate_cache();
    }

    // ── Prior surface initialization ────────────────────────────────────────

    /// Seed the grid from a prior depth surface.
    ///
    /// `mask` cells equal to 255 freeze the node (no further updates);
    /// `data` cells equal to the no-data value leave the node without a
    /// prior. Everything else becomes the node's predicted depth plus a
    /// null hypothesis so slope correction has an anchor while extraction
    /// still reports no-data until real soundings arrive.
    pub fn initialise(
        &mut self,
        data: &[f32],
        uncertainty: PriorUncertainty<'_>,
        mask: Option<&[u8]>,
        row_stride: usize,
        p: &Params,
    ) -> Result<()> {
        if row_stride < self.nx {
            return Err(CubeError::BadConfig(format!(
                "row stride {row_stride} is narrower than the grid ({})",
                self.nx
            )));
        }
        let needed = row_stride * (self.ny - 1) + self.nx;
        if data.len() < needed {
            return Err(CubeError::BadConfig(format!(
                "initialisation data holds {} cells, grid needs {needed}",
                data.len()
            )));
        }
        if let PriorUncertainty::Variance(unct) = uncertainty
            && unct.len() < needed
        {
            return Err(CubeError::BadConfig(format!(
                "initialisation uncertainty holds {} cells, grid needs {needed}",
                unct.len()
            )));
        }
        if let Some(mask) = mask
            && mask.len() < needed
        {
            return Err(CubeError::BadConfig(format!(
                "initialisation mask holds {} cells, grid needs {needed}",
                mask.len()
            )));
        }

        // Fractional s.d. quoted at the configured CI; squared into variance
        let pcent_scale = match uncertainty {
            PriorUncertainty::PercentSdev(pc) => {
                let s = f64::from(pc) / 100.0 / f64::from(p.sd2conf_scale);
                (s * s) as f32
            }
            _ => 0.0,
        };

        for row in 0..self.ny {
            for col in 0..self.nx {
                let src = row * row_stride + col;
                let idx = row * self.nx + col;
                if mask.is_some_and(|m| m[src] == 255) {
                    self.nodes[idx].set_predicted(PredictedDepth::Frozen);
                    continue;
                }
                let depth = data[src];
                if depth.is_nan() {
                    return Err(CubeError::BadConfig(format!(
                        "initialisation data is NaN at ({col}, {row})"
                    )));
                }
                if depth == p.no_data_value {
                    self.nodes[idx].set_predicted(PredictedDepth::Unknown);
                    continue;
                }
                let var = match uncertainty {
                    PriorUncertainty::FixedSdev(sd) => sd * sd,
                    PriorUncertainty::PercentSdev(_) => pcent_scale * depth * depth,
                    PriorUncertainty::Variance(unct) => {
                        let v = unct[src];
                        if v.is_nan() || v < 0.0 {
                            return Err(CubeError::BadConfig(format!(
                                "initialisation variance is invalid at ({col}, {row}): {v}"
                            )));
                        }
                        v
                    }
                };
                self.nodes[idx].set_predicted(PredictedDepth::Known { depth, var });
                self.nodes[idx].add_null_hypothesis(depth, var);
                self.cache[idx] = None;
            }
        }
        Ok(())
    }

    // ── Sounding dispatch ───────────────────────────────────────────────────

    /// Integrate a batch of soundings, spreading each over the nodes its
    /// error budget allows it to influence. Returns the number of soundings
    /// admitted by at least one node; the rest were rejected silently.
    pub fn insert(&mut self, soundings: &[Sounding], west: f64, north: f64, p: &Params) -> usize {
        let mut n_used = 0;
        for snd in soundings {
            // IHO S-44 allowable variance at this depth, back to 1 s.d.
            let z = f64::from(snd.depth);
            let max_var_allowed = (p.iho_fixed + p.iho_pcent * z * z)
                / f64::from(p.sd2conf_scale * p.sd2conf_scale);
            let ratio = (max_var_allowed / f64::from(snd.dz)).max(2.0);

            let max_radius = SPREAD_CONF_99PC * f64::from(snd.dr).sqrt();
            let radius = (p.dist_scale * (ratio - 1.0).powf(p.inv_dist_exp) - max_radius)
                .min(max_radius)
                .max(p.dist_scale);

            let min_x = ((snd.east - radius - west) / f64::from(self.dx)).floor() as i64;
            let max_x = ((snd.east + radius - west) / f64::from(self.dx)).floor() as i64;
            let min_y = ((north - (snd.north + radius)) / f64::from(self.dy)).floor() as i64;
            let max_y = ((north - (snd.north - radius)) / f64::from(self.dy)).floor() as i64;
            if max_x < 0 || min_x >= self.nx as i64 || max_y < 0 || min_y >= self.ny as i64 {
                tracing::trace!(east = snd.east, north = snd.north, "sounding misses the grid");
                continue;
            }
            let min_x = min_x.max(0) as usize;
            let max_x = max_x.min(self.nx as i64 - 1) as usize;
            let min_y = min_y.max(0) as usize;
            let max_y = max_y.min(self.ny as i64 - 1) as usize;

            let radius_sq = radius * radius;
            let mut used = false;
            for y in min_y..=max_y {
                for x in min_x..=max_x {
                    let node_x = west + x as f64 * f64::from(self.dx);
                    let node_y = north - y as f64 * f64::from(self.dy);
                    let dist_sq =
                        (node_x - snd.east).powi(2) + (node_y - snd.north).powi(2);
                    if dist_sq > radius_sq {
                        continue;
                    }
                    let idx = y * self.nx + x;
                    if self.nodes[idx].insert(dist_sq, snd, p) {
                        self.cache[idx] = None;
                        used = true;
                    }
                }
            }
            if used {
                n_used += 1;
            }
        }
        n_used
    }

    /// Force every node's pre-filter residue into the hypothesis layer.
    pub fn flush(&mut self, p: &Params) {
        for node in &mut self.nodes {
            node.flush(p);
        }
        self.invalidate_cache();
    }

    // ── Extraction ──────────────────────────────────────────────────────────

    /// Extract a single scalar surface in row-major order, serving and
    /// refilling the cache when it holds the requested kind.
    pub fn surface(&mut self, kind: SurfaceKind, p: &Params) -> Vec<f32> {
        let mut out = vec![0.0_f32; self.nx * self.ny];
        let use_cache = kind == self.cached;
        for idx in 0..self.nodes.len() {
            if use_cache && let Some(v) = self.cache[idx] {
                out[idx] = v;
                continue;
            }
            let value = match kind {
                SurfaceKind::HypothesisCount => self.nodes[idx].hypothesis_count(p),
                SurfaceKind::Depth => self.cell_estimate(idx, p).depth,
                SurfaceKind::Uncertainty => self.cell_estimate(idx, p).uncertainty,
                SurfaceKind::StrengthRatio => self.cell_estimate(idx, p).ratio,
            };
            if use_cache {
                self.cache[idx] = Some(value);
            }
            out[idx] = value;
        }
        out
    }

    /// Extract depth, uncertainty and strength ratio in one pass, running the
    /// disambiguation once per node. Bypasses the cache entirely.
    pub fn surfaces(&self, p: &Params) -> Surfaces {
        let n = self.nx * self.ny;
        let mut depth = vec![0.0_f32; n];
        let mut uncertainty = vec![0.0_f32; n];
        let mut ratio = vec![0.0_f32; n];
        for idx in 0..n {
            let est = self.cell_estimate(idx, p);
            depth[idx] = est.depth;
            uncertainty[idx] = est.uncertainty;
            ratio[idx] = est.ratio;
        }
        Surfaces {
            depth,
            uncertainty,
            ratio,
        }
    }

    /// Paired depth/uncertainty extraction; one disambiguation pass, no cache.
    pub fn depth_and_uncertainty(&self, p: &Params) -> (Vec<f32>, Vec<f32>) {
        let n = self.nx * self.ny;
        let mut depth = vec![0.0_f32; n];
        let mut uncertainty = vec![0.0_f32; n];
        for idx in 0..n {
            let est = self.cell_estimate(idx, p);
            depth[idx] = est.depth;
            uncertainty[idx] = est.uncertainty;
        }
        (depth, uncertainty)
    }

    /// Disambiguate one node under the configured policy.
    fn cell_estimate(&self, idx: usize, p: &Params) -> Estimate {
        let node = &self.nodes[idx];
        if node.reportable_count() < 2 {
            return node.extract(p);
        }
        match p.extractor {
            Extractor::Prior => node.extract(p),
            Extractor::Likelihood => match self.find_guide(idx, p) {
                Some((mean, var)) => node.extract_closest(mean, var, p),
                None => node.extract(p),
            },
            Extractor::Posterior => match self.find_guide(idx, p) {
                Some((mean, var)) => node.extract_posterior(mean, var, p),
                None => node.extract(p),
            },
            Extractor::PredSurf => match node.predicted() {
                PredictedDepth::Known { depth, var } => {
                    node.extract_closest(f64::from(depth), f64::from(var), p)
                }
                _ => node.extract(p),
            },
        }
    }

    /// Search outward in square annuli for a node with exactly one reportable
    /// hypothesis and return its (mean, variance) as the guide. Within an
    /// annulus the last match in scan order wins; across annuli the first
    /// annulus with any match wins.
    fn find_guide(&self, idx: usize, p: &Params) -> Option<(f64, f64)> {
        let row = (idx / self.nx) as i64;
        let col = (idx % self.nx) as i64;
        let nx = self.nx as i64;
        let ny = self.ny as i64;

        let guide_at = |c: i64, r: i64| -> Option<(f64, f64)> {
            if c < 0 || c >= nx || r < 0 || r >= ny {
                return None;
            }
            let h: &Hypothesis = self.nodes[(r * nx + c) as usize].single_reportable()?;
            Some((h.mean(), h.variance()))
        };

        for offset in (p.min_context as i64)..=(p.max_context as i64) {
            let mut found = None;
            for dc in -offset..=offset {
                if let Some(g) = guide_at(col + dc, row - offset) {
                    found = Some(g);
                }
            }
            for dc in -offset..=offset {
                if let Some(g) = guide_at(col + dc, row + offset) {
                    found = Some(g);
                }
            }
            for dr in (-offset + 1)..=(offset - 1) {
                if let Some(g) = guide_at(col - offset, row + dr) {
                    found = Some(g);
                }
            }
            for dr in (-offset + 1)..=(offset - 1) {
                if let Some(g) = guide_at(col + offset, row + dr) {
                    found = Some(g);
                }
            }
            if found.is_some() {
                return found;
            }
        }
        None
    }

    // ── Hypothesis access ───────────────────────────────────────────────────

    /// Enumerate every node's reportable hypotheses, georeferenced against
    /// the given anchor, in row-major node order.
    pub fn enumerate(&self, west: f64, north: f64, p: &Params) -> Vec<NodeHypotheses> {
        let mut out = Vec::with_capacity(self.nx * self.ny);
        for row in 0..self.ny {
            for col in 0..self.nx {
                // Bounds are by construction; index cannot fail here
                out.push(self.node_hypotheses(col, row, west, north, p));
            }
        }
        out
    }

    /// Hypothesis listing for one node.
    pub fn hypotheses_at(
        &self,
        col: usize,
        row: usize,
        west: f64,
        north: f64,
        p: &Params,
    ) -> Result<NodeHypotheses> {
        self.index(col, row)?;
        Ok(self.node_hypotheses(col, row, west, north, p))
    }

    fn node_hypotheses(
        &self,
        col: usize,
        row: usize,
        west: f64,
        north: f64,
        p: &Params,
    ) -> NodeHypotheses {
        let node = &self.nodes[row * self.nx + col];
        let hypotheses = node
            .enumerate()
            .into_iter()
            .map(|v| HypothesisSummary {
                depth: v.depth,
                ci: p.sd2conf_scale * v.variance.sqrt(),
                n_samples: v.n_samples,
            })
            .collect();
        NodeHypotheses {
            east: west + col as f64 * f64::from(self.dx),
            north: north - row as f64 * f64::from(self.dy),
            hypotheses,
            nominated: node.nominated_ordinal(),
        }
    }

    /// Seed a data hypothesis directly at a node, bypassing the pre-filter.
    pub fn add_hypothesis(&mut self, col: usize, row: usize, depth: f32, var: f32) -> Result<()> {
        let idx = self.index(col, row)?;
        self.nodes[idx].add_hypothesis(depth, var);
        self.cache[idx] = None;
        Ok(())
    }

    /// Nominate the hypothesis at `depth` for verbatim reporting.
    pub fn nominate(&mut self, col: usize, row: usize, depth: f32) -> Result<()> {
        let idx = self.index(col, row)?;
        self.nodes[idx].nominate(depth)?;
        self.cache[idx] = None;
        Ok(())
    }

    /// Clear any nomination at the node.
    pub fn unnominate(&mut self, col: usize, row: usize) -> Result<()> {
        let idx = self.index(col, row)?;
        self.nodes[idx].reset_nomination();
        self.cache[idx] = None;
        Ok(())
    }

    /// Delete the hypothesis matching `depth`; the match must be unique.
    pub fn remove_hypothesis(&mut self, col: usize, row: usize, depth: f32) -> Result<()> {
        let idx = self.index(col, row)?;
        self.nodes[idx].remove_hypothesis(depth)?;
        self.cache[idx] = None;
        Ok(())
    }

    // ── Sizing ──────────────────────────────────────────────────────────────

    /// Side length of the largest square grid fitting `budget` bytes, given
    /// the expected hypothesis load and the fraction of nodes expected to
    /// hold any data. Solves a n^2 + b n + (c - budget) = 0 and forces the
    /// side odd. Returns 0 when even an empty grid does not fit.
    pub fn nodes_for_budget(
        budget: usize,
        expected_hypotheses: f32,
        occupancy: f32,
        p: &Params,
    ) -> u32 {
        let a = (std::mem::size_of::<f32>()
            + std::mem::size_of::<Option<f32>>()
            + std::mem::size_of::<Node>()) as f64
            + f64::from(occupancy) * Node::estimated_bytes(expected_hypotheses, p) as f64;
        let b = (2 * std::mem::size_of::<usize>()) as f64;
        let c = std::mem::size_of::<Grid>() as f64;

        let det = b * b - 4.0 * a * (c - budget as f64);
        if det < 0.0 {
            return 0;
        }
        let mut n = ((-b + det.sqrt()) / (2.0 * a)).floor() as u32;
        if n % 2 == 0 && n >= 2 {
            n -= 1;
        }
        n
    }
}
