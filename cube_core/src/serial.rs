//! Binary serialization of parameters, grids and nodes.
//!
//! The on-disk schema is explicit little-endian fixed-width records rather
//! than in-memory struct dumps, so files are host-independent. The format is
//! single-writer/single-reader and carries no version field. A grid record is
//! a header (dimensions, spacings, cache selector), the nodes in row-major
//! order, then the raw cache surface; stale cache cells are written as the
//! canonical quiet NaN, which exists only at this format boundary; in memory
//! the cache is `Option<f32>`.
//!
//! Node records hold the prior state, the pre-filter queue, every tracked
//! hypothesis (initialization seeds included, so estimator state survives a
//! round-trip exactly), and a 1-based nominated ordinal (0 = none).
//! Hypothesis ids are not stored; they are regenerated from 1 in record
//! order on read.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CubeError, Result};
use crate::grid::{Grid, SurfaceKind};
use crate::hypothesis::Hypothesis;
use crate::node::{Node, PredictedDepth, QueueEntry};
use crate::params::{Extractor, Params};

/// Bit pattern of the quiet NaN marking a stale cache cell on disk.
const CACHE_INVALID_BITS: u32 = 0x7FFF_FFFF;

/// Upper bound on per-node hypothesis records accepted from a file; anything
/// larger indicates corruption rather than data.
const MAX_HYPOTHESES_PER_NODE: u32 = 1 << 16;

fn corrupt(what: impl Into<String>) -> CubeError {
    CubeError::Serialization(what.into())
}

// ── Parameters ──────────────────────────────────────────────────────────────

pub fn write_params<W: Write>(w: &mut W, p: &Params) -> Result<()> {
    w.write_f32::<LittleEndian>(p.no_data_value)?;
    w.write_u32::<LittleEndian>(p.extractor as u32)?;
    w.write_f64::<LittleEndian>(p.null_depth)?;
    w.write_f64::<LittleEndian>(p.null_variance)?;
    w.write_f64::<LittleEndian>(p.dist_exp)?;
    w.write_f64::<LittleEndian>(p.inv_dist_exp)?;
    w.write_f64::<LittleEndian>(p.dist_scale)?;
    w.write_f64::<LittleEndian>(p.var_scale)?;
    w.write_f64::<LittleEndian>(p.iho_fixed)?;
    w.write_f64::<LittleEndian>(p.iho_pcent)?;
    w.write_u32::<LittleEndian>(p.median_length as u32)?;
    w.write_f32::<LittleEndian>(p.quotient_limit)?;
    w.write_f64::<LittleEndian>(p.discount)?;
    w.write_f64::<LittleEndian>(p.est_offset)?;
    w.write_f64::<LittleEndian>(p.bayes_fac_t)?;
    w.write_u32::<LittleEndian>(p.runlength_t)?;
    w.write_f32::<LittleEndian>(p.min_context)?;
    w.write_f32::<LittleEndian>(p.max_context)?;
    w.write_f32::<LittleEndian>(p.sd2conf_scale)?;
    w.write_f32::<LittleEndian>(p.blunder_min)?;
    w.write_f32::<LittleEndian>(p.blunder_pcent)?;
    w.write_f32::<LittleEndian>(p.blunder_scalar)?;
    w.write_f32::<LittleEndian>(p.capture_dist_scale)?;
    Ok(())
}

fn extractor_from_code(code: u32) -> Result<Extractor> {
    match code {
        0 => Ok(Extractor::Prior),
        1 => Ok(Extractor::Likelihood),
        2 => Ok(Extractor::Posterior),
        3 => Ok(Extractor::PredSurf),
        other => Err(corrupt(format!("unknown extractor code {other}"))),
    }
}

fn kind_from_code(code: u32) -> Result<SurfaceKind> {
    match code {
        0 => Ok(SurfaceKind::Depth),
        1 => Ok(SurfaceKind::Uncertainty),
        2 => Ok(SurfaceKind::HypothesisCount),
        3 => Ok(SurfaceKind::StrengthRatio),
        other => Err(corrupt(format!("unknown cache selector code {other}"))),
    }
}

pub fn read_params<R: Read>(r: &mut R) -> Result<Params> {
    let no_data_value = r.read_f32::<LittleEndian>()?;
    let extractor = extractor_from_code(r.read_u32::<LittleEndian>()?)?;
    let null_depth = r.read_f64::<LittleEndian>()?;
    let null_variance = r.read_f64::<LittleEndian>()?;
    let dist_exp = r.read_f64::<LittleEndian>()?;
    let inv_dist_exp = r.read_f64::<LittleEndian>()?;
    let dist_scale = r.read_f64::<LittleEndian>()?;
    let var_scale = r.read_f64::<LittleEndian>()?;
    let iho_fixed = r.read_f64::<LittleEndian>()?;
    let iho_pcent = r.read_f64::<LittleEndian>()?;
    let median_length = r.read_u32::<LittleEndian>()? as usize;
    if !(3..=101).contains(&median_length) || median_length % 2 == 0 {
        return Err(corrupt(format!(
            "median pre-filter length {median_length} is out of range"
        )));
    }
    let quotient_limit = r.read_f32::<LittleEndian>()?;
    let discount = r.read_f64::<LittleEndian>()?;
    let est_offset = r.read_f64::<LittleEndian>()?;
    let bayes_fac_t = r.read_f64::<LittleEndian>()?;
    let runlength_t = r.read_u32::<LittleEndian>()?;
    let min_context = r.read_f32::<LittleEndian>()?;
    let max_context = r.read_f32::<LittleEndian>()?;
    let sd2conf_scale = r.read_f32::<LittleEndian>()?;
    let blunder_min = r.read_f32::<LittleEndian>()?;
    let blunder_pcent = r.read_f32::<LittleEndian>()?;
    let blunder_scalar = r.read_f32::<LittleEndian>()?;
    let capture_dist_scale = r.read_f32::<LittleEndian>()?;
    Ok(Params {
        no_data_value,
        extractor,
        null_depth,
        null_variance,
        dist_exp,
        inv_dist_exp,
        dist_scale,
        var_scale,
        iho_fixed,
        iho_pcent,
        median_length,
        quotient_limit,
        discount,
        est_offset,
        bayes_fac_t,
        runlength_t,
        min_context,
        max_context,
        sd2conf_scale,
        blunder_min,
        blunder_pcent,
        blunder_scalar,
        capture_dist_scale,
    })
}

// ── Nodes ───────────────────────────────────────────────────────────────────

fn write_predicted<W: Write>(w: &mut W, predicted: PredictedDepth, p: &Params) -> Result<()> {
    let (depth, var) = match predicted {
        PredictedDepth::Frozen => {
            let nan = f32::from_bits(CACHE_INVALID_BITS);
            (nan, nan)
        }
        PredictedDepth::Unknown => (p.no_data_value, p.no_data_value),
        PredictedDepth::Known { depth, var } => (depth, var),
    };
    w.write_f32::<LittleEndian>(depth)?;
    w.write_f32::<LittleEndian>(var)?;
    Ok(())
}

fn read_predicted<R: Read>(r: &mut R, p: &Params) -> Result<PredictedDepth> {
    let depth = r.read_f32::<LittleEndian>()?;
    let var = r.read_f32::<LittleEndian>()?;
    if depth.is_nan() {
        Ok(PredictedDepth::Frozen)
    } else if depth == p.no_data_value {
        Ok(PredictedDepth::Unknown)
    } else {
        Ok(PredictedDepth::Known { depth, var })
    }
}

pub fn write_node<W: Write>(w: &mut W, node: &Node, p: &Params) -> Result<()> {
    write_predicted(w, node.predicted(), p)?;
    w.write_u8(u8::from(node.debug()))?;

    let queue = node.queue_entries();
    w.write_u32::<LittleEndian>(queue.len() as u32)?;
    for entry in queue {
        w.write_f32::<LittleEndian>(entry.depth)?;
        w.write_f32::<LittleEndian>(entry.var)?;
    }

    let hypotheses = node.hypotheses();
    w.write_u32::<LittleEndian>(hypotheses.len() as u32)?;
    for h in hypotheses {
        w.write_f64::<LittleEndian>(h.mean)?;
        w.write_f64::<LittleEndian>(h.variance)?;
        w.write_f64::<LittleEndian>(h.pred_mean)?;
        w.write_f64::<LittleEndian>(h.pred_variance)?;
        w.write_f64::<LittleEndian>(h.cum_bayes)?;
        w.write_u32::<LittleEndian>(u32::from(h.seq_len))?;
        w.write_u32::<LittleEndian>(h.n_samples)?;
        w.write_f64::<LittleEndian>(h.sample_var)?;
    }
    let nominated = node.nominated_index().map_or(0, |i| i as u32 + 1);
    w.write_u32::<LittleEndian>(nominated)?;
    Ok(())
}

pub fn read_node<R: Read>(r: &mut R, p: &Params) -> Result<Node> {
    let predicted = read_predicted(r, p)?;
    let debug = r.read_u8()? != 0;

    let queue_len = r.read_u32::<LittleEndian>()? as usize;
    if queue_len > p.median_length {
        return Err(corrupt(format!(
            "queue holds {queue_len} entries, median length is {}",
            p.median_length
        )));
    }
    let mut queue = Vec::with_capacity(p.median_length);
    for _ in 0..queue_len {
        let depth = r.read_f32::<LittleEndian>()?;
        let var = r.read_f32::<LittleEndian>()?;
        queue.push(QueueEntry { depth, var });
    }

    let n_hyp = r.read_u32::<LittleEndian>()?;
    if n_hyp > MAX_HYPOTHESES_PER_NODE {
        return Err(corrupt(format!("implausible hypothesis count {n_hyp}")));
    }
    let mut hypotheses = Vec::with_capacity(n_hyp as usize);
    for i in 0..n_hyp {
        let mean = r.read_f64::<LittleEndian>()?;
        let variance = r.read_f64::<LittleEndian>()?;
        let pred_mean = r.read_f64::<LittleEndian>()?;
        let pred_variance = r.read_f64::<LittleEndian>()?;
        let cum_bayes = r.read_f64::<LittleEndian>()?;
        let seq_len = r.read_u32::<LittleEndian>()?;
        let n_samples = r.read_u32::<LittleEndian>()?;
        let sample_var = r.read_f64::<LittleEndian>()?;
        hypotheses.push(Hypothesis {
            mean,
            variance,
            pred_mean,
            pred_variance,
            cum_bayes,
            seq_len: seq_len.min(u32::from(u16::MAX)) as u16,
            id: (i + 1) as u16,
            n_samples,
            sample_var,
        });
    }

    let nominated = r.read_u32::<LittleEndian>()?;
    let nominated = match nominated {
        0 => None,
        n if (n as usize) <= hypotheses.len() => Some(n as usize - 1),
        n => {
            return Err(corrupt(format!(
                "nominated index {n} with only {} hypotheses",
                hypotheses.len()
            )));
        }
    };

    Ok(Node::from_parts(queue, hypotheses, nominated, predicted, debug))
}

// ── Grids ───────────────────────────────────────────────────────────────────

pub fn write_grid<W: Write>(w: &mut W, grid: &Grid, p: &Params) -> Result<()> {
    w.write_u32::<LittleEndian>(grid.width() as u32)?;
    w.write_u32::<LittleEndian>(grid.height() as u32)?;
    let (dx, dy) = grid.spacings();
    w.write_f32::<LittleEndian>(dx)?;
    w.write_f32::<LittleEndian>(dy)?;
    w.write_u32::<LittleEndian>(grid.cached_kind() as u32)?;

    for node in grid.nodes() {
        write_node(w, node, p)?;
    }
    for cell in grid.cache_cells() {
        match cell {
            Some(v) => w.write_f32::<LittleEndian>(*v)?,
            None => w.write_u32::<LittleEndian>(CACHE_INVALID_BITS)?,
        }
    }
    Ok(())
}

pub fn read_grid<R: Read>(r: &mut R, p: &Params) -> Result<Grid> {
    let nx = r.read_u32::<LittleEndian>()? as usize;
    let ny = r.read_u32::<LittleEndian>()? as usize;
    let dx = r.read_f32::<LittleEndian>()?;
    let dy = r.read_f32::<LittleEndian>()?;
    let cached = kind_from_code(r.read_u32::<LittleEndian>()?)?;
    if nx == 0 || ny == 0 || !(dx > 0.0 && dy > 0.0) {
        return Err(corrupt(format!(
            "grid header is invalid: {nx} x {ny} at ({dx}, {dy}) m"
        )));
    }

    let mut nodes = Vec::with_capacity(nx * ny);
    for _ in 0..nx * ny {
        nodes.push(read_node(r, p)?);
    }
    let mut cache = Vec::with_capacity(nx * ny);
    for _ in 0..nx * ny {
        let v = r.read_f32::<LittleEndian>()?;
        cache.push(if v.is_nan() { None } else { Some(v) });
    }
    Ok(Grid::from_parts(nx, ny, dx, dy, nodes, cache, cached))
}

// ── Combined sheet records ──────────────────────────────────────────────────

/// Write a parameter record followed by the grid it governs.
pub fn write_sheet<W: Write>(w: &mut W, grid: &Grid, p: &Params) -> Result<()> {
    write_params(w, p)?;
    write_grid(w, grid, p)
}

/// Read back a parameter record and its grid.
pub fn read_sheet<R: Read>(r: &mut R) -> Result<(Grid, Params)> {
    let p = read_params(r)?;
    let grid = read_grid(r, &p)?;
    Ok((grid, p))
}
