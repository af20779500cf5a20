//! Bilinear lookup into the per-node predicted-depth field.
//!
//! Used as the prior for slope correction when integrating soundings: the
//! interpolated depth carries a propagated variance so the correction's own
//! error can be charged to the data. The variance is a first-order Taylor
//! propagation through the bilinear weights plus the east/north gradient
//! terms scaled by the horizontal positioning variance of the query point.

use crate::error::{CubeError, Result};
use crate::grid::Grid;
use crate::node::PredictedDepth;

/// Variance of the interpolated depth for corner depths `z` and corner
/// variances `var_z` ordered (NW, NE, SW, SE), normalized offsets
/// `(u, v)` within the cell, horizontal variance `var_h`, and node spacings
/// `(sx, sy)`.
fn interp_variance(z: [f64; 4], var_z: [f64; 4], u: f64, v: f64, var_h: f64, sx: f64, sy: f64) -> f64 {
    let uc = 1.0 - u;
    let vc = 1.0 - v;
    let var_dx = var_h / (sx * sx);
    let var_dy = var_h / (sy * sy);

    let var_interp = uc * uc * v * v * var_z[0]
        + u * u * v * v * var_z[1]
        + uc * uc * vc * vc * var_z[2]
        + u * u * vc * vc * var_z[3];

    let grad_e = (z[1] - z[0]) * v + (z[3] - z[2]) * vc;
    let grad_n = (z[1] - z[3]) * u + (z[0] - z[3]) * uc;

    var_interp + grad_e * grad_e * var_dx + grad_n * grad_n * var_dy
}

impl Grid {
    /// Bilinear predicted depth and its propagated variance at `(x, y)`,
    /// in the left-handed coordinate frame anchored at the grid's north-west
    /// node (x east-ward, y south-ward, meters).
    ///
    /// Returns `(0.0, 0.0)` when any surrounding node has no prior, so the
    /// caller skips slope correction; frozen corners are an error.
    pub fn interpolate(&self, x: f64, y: f64, horiz_var: f32) -> Result<(f32, f32)> {
        let (dx, dy) = self.spacings();
        let (dx, dy) = (f64::from(dx), f64::from(dy));
        let col = (x / dx).floor() as i64;
        let row = (y / dy).floor() as i64;
        if col < 0 || col >= self.width() as i64 - 1 || row < 0 || row >= self.height() as i64 - 1 {
            return Err(CubeError::OutOfBounds { col, row });
        }
        let (col, row) = (col as usize, row as usize);

        let mut z = [0.0_f64; 4];
        let mut var_z = [0.0_f64; 4];
        // (NW, NE, SW, SE)
        let corners = [
            (col, row),
            (col + 1, row),
            (col, row + 1),
            (col + 1, row + 1),
        ];
        for (i, (c, r)) in corners.into_iter().enumerate() {
            match self.node(c, r)?.predicted() {
                PredictedDepth::Known { depth, var } => {
                    z[i] = f64::from(depth);
                    var_z[i] = f64::from(var);
                }
                PredictedDepth::Unknown => return Ok((0.0, 0.0)),
                PredictedDepth::Frozen => {
                    return Err(CubeError::FrozenPrior {
                        col: c as u32,
                        row: r as u32,
                    });
                }
            }
        }

        let u = (x - dx * col as f64) / dx;
        let v = (dy * (row + 1) as f64 - y) / dy;
        let depth = z[0] * (1.0 - u) * v
            + z[1] * u * v
            + z[2] * (1.0 - u) * (1.0 - v)
            + z[3] * u * (1.0 - v);
        let var = interp_variance(z, var_z, u, v, f64::from(horiz_var), dx, dy);
        Ok((depth as f32, var as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PriorUncertainty, SurfaceKind};
    use crate::params::{Params, ParamsBuilder};
    use approx::assert_relative_eq;

    const NO_DATA: f32 = 1.0e6;

    fn params() -> Params {
        ParamsBuilder::new().build(1.0, 1.0, NO_DATA).unwrap()
    }

    fn primed_grid(depths: &[f32]) -> Grid {
        let mut g = Grid::new(2, 2, 1.0, 1.0, SurfaceKind::Depth).unwrap();
        g.initialise(depths, PriorUncertainty::FixedSdev(0.5), None, 2, &params())
            .unwrap();
        g
    }

    #[test]
    fn flat_surface_interpolates_exactly() {
        let g = primed_grid(&[-10.0, -10.0, -10.0, -10.0]);
        let (depth, var) = g.interpolate(0.5, 0.5, 0.0).unwrap();
        assert_relative_eq!(depth, -10.0, epsilon = 1e-6);
        // No gradient: pure bilinear variance at the cell center
        assert_relative_eq!(var, 0.25 * 4.0 * 0.0625, epsilon = 1e-6);
    }

    #[test]
    fn sloped_surface_interpolates_linearly() {
        let g = primed_grid(&[-10.0, -12.0, -10.0, -12.0]);
        let (depth, _) = g.interpolate(0.25, 0.5, 0.0).unwrap();
        assert_relative_eq!(depth, -10.5, epsilon = 1e-6);
    }

    #[test]
    fn horizontal_variance_charges_the_gradient() {
        let g = primed_grid(&[-10.0, -12.0, -10.0, -12.0]);
        let (_, flat) = g.interpolate(0.5, 0.5, 0.0).unwrap();
        let (_, moved) = g.interpolate(0.5, 0.5, 0.1).unwrap();
        assert!(moved > flat);
    }

    #[test]
    fn missing_prior_corner_returns_zero() {
        let g = primed_grid(&[-10.0, NO_DATA, -10.0, -10.0]);
        assert_eq!(g.interpolate(0.5, 0.5, 0.0).unwrap(), (0.0, 0.0));
    }

    #[test]
    fn frozen_corner_is_an_error() {
        let mut g = Grid::new(2, 2, 1.0, 1.0, SurfaceKind::Depth).unwrap();
        let mask = [0_u8, 255, 0, 0];
        g.initialise(
            &[-10.0, -10.0, -10.0, -10.0],
            PriorUncertainty::FixedSdev(0.5),
            Some(&mask),
            2,
            &params(),
        )
        .unwrap();
        assert!(matches!(
            g.interpolate(0.5, 0.5, 0.0),
            Err(CubeError::FrozenPrior { col: 1, row: 0 })
        ));
    }

    #[test]
    fn queries_outside_the_grid_error() {
        let g = primed_grid(&[-10.0; 4]);
        assert!(matches!(
            g.interpolate(1.5, 0.5, 0.0),
            Err(CubeError::OutOfBounds { .. })
        ));
        assert!(matches!(
            g.interpolate(-0.5, 0.5, 0.0),
            Err(CubeError::OutOfBounds { .. })
        ));
    }
}
