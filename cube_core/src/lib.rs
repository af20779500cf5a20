#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! CUBE: Combined Uncertainty and Bathymetry Estimator.
//!
//! Estimates depth and its uncertainty on a regular planar grid from a stream
//! of georeferenced, error-tagged sonar soundings. Each grid node tracks
//! multiple competing depth hypotheses so disagreeing data (burst noise,
//! refraction shifts, multi-path, distinct targets) fork new tracks instead
//! of corrupting one, and the reported surface collapses to a single value
//! only at extraction time under a configurable disambiguation policy.
//!
//! ## Architecture
//!
//! - **Hypothesis** (`hypothesis`): one recursive depth track, a univariate
//!   dynamic linear model with discount-factor system noise and Bayes-factor
//!   monitoring (West & Harrison).
//! - **Node** (`node`): pre-filter queue, input gating (capture radius,
//!   blunder filter, frozen priors), slope correction, dilution-scaled
//!   variance, hypothesis dispatch and nomination at one grid location.
//! - **Grid** (`grid`): node array with spreading dispatch, the four
//!   disambiguation policies, and a single cached extracted surface.
//! - **Interpolation** (`interp`): bilinear predicted-depth lookup with
//!   propagated variance, used for slope correction priors.
//! - **Params** (`params`): immutable configuration record built and
//!   validated by `ParamsBuilder`.
//! - **Serialization** (`serial`): explicit little-endian binary format for
//!   parameters, grids and nodes.
//!
//! Depths are positive-up throughout: deeper water is more negative. The
//! core is single-threaded; grids are independent and may be driven from
//! parallel threads at the application level, one owner per grid.

pub mod error;
pub mod grid;
pub mod hypothesis;
pub mod interp;
pub mod node;
pub mod params;
pub mod serial;
pub mod sounding;

pub use error::{CubeError, Result};
pub use grid::{
    Grid, HypothesisSummary, NodeHypotheses, PriorUncertainty, SurfaceKind, Surfaces,
};
pub use hypothesis::Hypothesis;
pub use node::{Estimate, HypothesisView, Node, PredictedDepth};
pub use params::{Confidence, Extractor, IhoOrder, Params, ParamsBuilder};
pub use sounding::Sounding;
