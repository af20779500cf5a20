//! Algorithm parameter record and its builder.
//!
//! `Params` is an owned, immutable snapshot consulted by every layer of the
//! estimator. It is produced by [`ParamsBuilder::build`], which derives the
//! spacing-dependent quantities (distance normalization, dilution scale,
//! context ranges in node units) and range-checks everything else. A grid
//! never mutates the record it is given.

use crate::error::{CubeError, Result};

/// Scale factors from one standard deviation to the selectable confidence
/// intervals on the unit normal.
pub const CONF_68PC: f32 = 1.00;
pub const CONF_90PC: f32 = 1.69;
pub const CONF_95PC: f32 = 1.96;
pub const CONF_99PC: f32 = 2.56;

/// Hypothesis disambiguation method used at extraction time.
///
/// `Prior` ranks hypotheses by absorbed sample count and needs no spatial
/// context. `Likelihood` finds a nearby single-hypothesis guide node and picks
/// the closest hypothesis in normalized-error terms; `Posterior` combines the
/// guide distance with the sample-count prior; `PredSurf` uses the node's own
/// predicted depth as the guide and skips the spatial search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extractor {
    Prior = 0,
    #[default]
    Likelihood = 1,
    Posterior = 2,
    PredSurf = 3,
}

/// IHO S-44 survey order, carrying the allowable-error budget as
/// (fixed s.d., fraction-of-depth s.d.) at the 95% level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IhoOrder {
    Special,
    #[default]
    Order1,
    Order2,
    Order3,
}

impl IhoOrder {
    /// Fixed and percentage components of the allowable depth error (s.d.).
    pub fn limits(self) -> (f64, f64) {
        match self {
            IhoOrder::Special => (0.25, 0.0075),
            IhoOrder::Order1 => (0.5, 0.013),
            IhoOrder::Order2 => (1.0, 0.023),
            IhoOrder::Order3 => (1.0, 0.046),
        }
    }
}

/// Confidence interval reported for extracted uncertainties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confidence {
    C68,
    C90,
    #[default]
    C95,
    C99,
}

impl Confidence {
    pub fn scale(self) -> f32 {
        match self {
            Confidence::C68 => CONF_68PC,
            Confidence::C90 => CONF_90PC,
            Confidence::C95 => CONF_95PC,
            Confidence::C99 => CONF_99PC,
        }
    }
}

/// Immutable algorithm parameters.
///
/// Distances named `*_context` are in node units (converted from meters at
/// build time); `dist_scale` is the distance normalization, min(dx, dy).
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub no_data_value: f32,
    pub extractor: Extractor,
    pub null_depth: f64,
    pub null_variance: f64,
    pub dist_exp: f64,
    pub inv_dist_exp: f64,
    pub dist_scale: f64,
    pub var_scale: f64,
    pub iho_fixed: f64,
    pub iho_pcent: f64,
    pub median_length: usize,
    pub quotient_limit: f32,
    pub discount: f64,
    pub est_offset: f64,
    pub bayes_fac_t: f64,
    pub runlength_t: u32,
    pub min_context: f32,
    pub max_context: f32,
    pub sd2conf_scale: f32,
    pub blunder_min: f32,
    pub blunder_pcent: f32,
    pub blunder_scalar: f32,
    pub capture_dist_scale: f32,
}

/// Builder for [`Params`]; all setters are optional and the defaults follow
/// the reference tuning (median 11, discount 1.0, monitor h = 4.0,
/// tau = 0.135, runlength 5, likelihood disambiguation).
#[derive(Debug, Clone)]
pub struct ParamsBuilder {
    extractor: Extractor,
    order: IhoOrder,
    confidence: Confidence,
    null_depth: f64,
    null_variance: f64,
    dist_exp: f64,
    median_length: usize,
    quotient_limit: f32,
    discount: f64,
    est_offset: f64,
    bayes_fac_t: f64,
    runlength_t: u32,
    min_context_m: f32,
    max_context_m: f32,
    blunder_min: f32,
    blunder_pcent: f32,
    blunder_scalar: f32,
    capture_dist_scale: f32,
}

impl Default for ParamsBuilder {
    fn default() -> Self {
        Self {
            extractor: Extractor::default(),
            order: IhoOrder::default(),
            confidence: Confidence::default(),
            null_depth: 0.0,
            null_variance: 1.0e6,
            dist_exp: 2.0,
            median_length: 11,
            quotient_limit: 30.0,
            discount: 1.0,
            est_offset: 4.0,
            bayes_fac_t: 0.135,
            runlength_t: 5,
            min_context_m: 5.0,
            max_context_m: 10.0,
            blunder_min: 10.0,
            blunder_pcent: 0.25,
            blunder_scalar: 3.0,
            capture_dist_scale: 0.05,
        }
    }
}

macro_rules! check_range {
    ($name:literal, $val:expr, $lo:expr, $hi:expr) => {
        if !($lo..=$hi).contains(&$val) {
            return Err(CubeError::BadConfig(format!(
                concat!($name, " must be in [{}, {}], got {}"),
                $lo, $hi, $val
            )));
        }
    };
}

impl ParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extractor(mut self, m: Extractor) -> Self {
        self.extractor = m;
        self
    }

    pub fn survey_order(mut self, order: IhoOrder) -> Self {
        self.order = order;
        self
    }

    pub fn confidence(mut self, c: Confidence) -> Self {
        self.confidence = c;
        self
    }

    pub fn null_depth(mut self, depth: f64) -> Self {
        self.null_depth = depth;
        self
    }

    /// Null standard deviation in meters; stored squared.
    pub fn null_sdev(mut self, sdev: f64) -> Self {
        self.null_variance = sdev * sdev;
        self
    }

    pub fn distance_exponent(mut self, exp: f64) -> Self {
        self.dist_exp = exp;
        self
    }

    pub fn median_length(mut self, len: usize) -> Self {
        self.median_length = len;
        self
    }

    pub fn quotient_limit(mut self, limit: f32) -> Self {
        self.quotient_limit = limit;
        self
    }

    pub fn discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self
    }

    pub fn monitor_offset(mut self, h: f64) -> Self {
        self.est_offset = h;
        self
    }

    pub fn bayes_factor(mut self, tau: f64) -> Self {
        self.bayes_fac_t = tau;
        self
    }

    pub fn runlength(mut self, limit: u32) -> Self {
        self.runlength_t = limit;
        self
    }

    /// Context search range in meters; converted to node units on build.
    pub fn context(mut self, min_m: f32, max_m: f32) -> Self {
        self.min_context_m = min_m;
        self.max_context_m = max_m;
        self
    }

    pub fn blunders(mut self, min: f32, pcent: f32, scalar: f32) -> Self {
        self.blunder_min = min;
        self.blunder_pcent = pcent;
        self.blunder_scalar = scalar;
        self
    }

    /// Capture distance as a fraction of the target depth.
    pub fn capture_scale(mut self, scale: f32) -> Self {
        self.capture_dist_scale = scale;
        self
    }

    /// Derive the final record for a grid with spacings `de`, `dn` (meters)
    /// and the given no-data marker.
    pub fn build(self, de: f64, dn: f64, no_data_value: f32) -> Result<Params> {
        if !(de > 0.0 && dn > 0.0) {
            return Err(CubeError::BadConfig(format!(
                "node spacings must be positive, got ({de}, {dn})"
            )));
        }
        check_range!("distance exponent", self.dist_exp, 1.0, 10.0);
        check_range!("median pre-filter length", self.median_length, 3, 101);
        if self.median_length % 2 == 0 {
            return Err(CubeError::BadConfig(format!(
                "median pre-filter length must be odd, got {}",
                self.median_length
            )));
        }
        check_range!("quotient limit", self.quotient_limit, 0.1, 255.0);
        check_range!("evolution discount", self.discount, 0.8, 1.0);
        check_range!("monitor offset", self.est_offset, 0.1, 10.0);
        check_range!("Bayes factor threshold", self.bayes_fac_t, 0.001, 10.0);
        check_range!("runlength threshold", self.runlength_t, 1, 10);
        check_range!("minimum context", self.min_context_m, 0.0, 1000.0);
        check_range!("maximum context", self.max_context_m, 1.0, 3000.0);
        if self.min_context_m > self.max_context_m {
            return Err(CubeError::BadConfig(format!(
                "minimum context ({} m) exceeds maximum ({} m)",
                self.min_context_m, self.max_context_m
            )));
        }
        check_range!("blunder minimum", self.blunder_min, 1.0, 1000.0);
        check_range!("blunder percentage", self.blunder_pcent, 0.0, 1.0);
        check_range!("blunder scalar", self.blunder_scalar, 0.0, 10.0);
        check_range!("capture distance scale", self.capture_dist_scale, 0.01, 1.0);

        let dist_scale = de.min(dn);
        let (iho_fixed_sd, iho_pcent_sd) = self.order.limits();
        Ok(Params {
            no_data_value,
            extractor: self.extractor,
            null_depth: self.null_depth,
            null_variance: self.null_variance,
            dist_exp: self.dist_exp,
            inv_dist_exp: 1.0 / self.dist_exp,
            dist_scale,
            var_scale: dist_scale.powf(-self.dist_exp),
            iho_fixed: iho_fixed_sd * iho_fixed_sd,
            iho_pcent: iho_pcent_sd * iho_pcent_sd,
            median_length: self.median_length,
            quotient_limit: self.quotient_limit,
            discount: self.discount,
            est_offset: self.est_offset,
            bayes_fac_t: self.bayes_fac_t,
            runlength_t: self.runlength_t,
            min_context: self.min_context_m / dist_scale as f32,
            max_context: self.max_context_m / dist_scale as f32,
            sd2conf_scale: self.confidence.scale(),
            blunder_min: self.blunder_min,
            blunder_pcent: self.blunder_pcent,
            blunder_scalar: self.blunder_scalar,
            capture_dist_scale: self.capture_dist_scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn defaults_build_with_derived_scales() {
        let p = ParamsBuilder::new().build(2.0, 2.0, f32::MAX).unwrap();
        assert_eq!(p.median_length, 11);
        assert_relative_eq!(p.dist_scale, 2.0);
        assert_relative_eq!(p.var_scale, 0.25);
        assert_relative_eq!(p.inv_dist_exp, 0.5);
        // 5 m and 10 m context at 2 m spacing -> 2.5 and 5 nodes
        assert_relative_eq!(p.min_context, 2.5);
        assert_relative_eq!(p.max_context, 5.0);
        // Order 1 limits, squared
        assert_relative_eq!(p.iho_fixed, 0.25);
        assert_relative_eq!(p.iho_pcent, 0.013 * 0.013);
    }

    #[rstest]
    #[case(ParamsBuilder::new().median_length(4))]
    #[case(ParamsBuilder::new().median_length(103))]
    #[case(ParamsBuilder::new().discount(0.5))]
    #[case(ParamsBuilder::new().bayes_factor(0.0))]
    #[case(ParamsBuilder::new().runlength(0))]
    #[case(ParamsBuilder::new().context(20.0, 10.0))]
    #[case(ParamsBuilder::new().capture_scale(0.0))]
    fn out_of_range_parameters_are_rejected(#[case] builder: ParamsBuilder) {
        assert!(matches!(
            builder.build(1.0, 1.0, f32::MAX),
            Err(CubeError::BadConfig(_))
        ));
    }

    #[test]
    fn confidence_selectors_map_to_unit_normal_scales() {
        assert_eq!(Confidence::C68.scale(), 1.00);
        assert_eq!(Confidence::C99.scale(), 2.56);
        let p = ParamsBuilder::new()
            .confidence(Confidence::C90)
            .build(1.0, 1.0, f32::MAX)
            .unwrap();
        assert_eq!(p.sd2conf_scale, 1.69);
    }
}
