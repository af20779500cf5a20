#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the CUBE estimator.
//!
//! `Config` and sub-structs are deserialized from TOML, validated against the
//! documented parameter ranges, and lowered onto `cube_core::ParamsBuilder`.
//! Every field is optional; omitted sections fall back to the reference
//! tuning. The core crate never depends on this one; it only ever sees the
//! finished `Params` record.
use cube_core::{Confidence, Extractor, IhoOrder, ParamsBuilder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EstimatorCfg {
    /// Depth used to initialise estimates, m.
    pub null_depth: f64,
    /// Standard deviation used to initialise estimates, m.
    pub null_sdev: f64,
    /// Reported confidence interval: "c68" | "c90" | "c95" | "c99".
    pub confidence: String,
    /// Exponent on distance in the dilution model.
    pub distance_exponent: f64,
    /// Median pre-filter queue length; odd.
    pub median_length: usize,
    /// Outlier quotient upper limit for queue truncation.
    pub quotient_limit: f32,
    /// Evolution discount factor for system noise.
    pub discount: f64,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            null_depth: 0.0,
            null_sdev: 1000.0,
            confidence: "c95".into(),
            distance_exponent: 2.0,
            median_length: 11,
            quotient_limit: 30.0,
            discount: 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorCfg {
    /// West & Harrison's h: normalized offset considered significant.
    pub offset: f64,
    /// Bayes factor threshold tau for intervention.
    #[serde(alias = "tau")]
    pub bayes_factor: f64,
    /// Run-length threshold on unfavorable evidence.
    pub runlength: u32,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            offset: 4.0,
            bayes_factor: 0.135,
            runlength: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisambiguationCfg {
    /// "prior" | "likelihood" | "posterior" | "predsurf".
    pub method: String,
    /// Minimum guide search distance, m.
    pub min_context: f32,
    /// Maximum guide search distance, m.
    pub max_context: f32,
}

impl Default for DisambiguationCfg {
    fn default() -> Self {
        Self {
            method: "likelihood".into(),
            min_context: 5.0,
            max_context: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BlunderCfg {
    /// Minimum gap below the predicted depth before a value is suspect, m.
    pub minimum: f32,
    /// Gap as a percentage of the predicted depth.
    pub percent: f32,
    /// Gap as a multiple of the prior surface standard deviation.
    pub scalar: f32,
}

impl Default for BlunderCfg {
    fn default() -> Self {
        Self {
            minimum: 10.0,
            percent: 25.0,
            scalar: 3.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureCfg {
    /// Node capture radius as a percentage of the target depth.
    pub distance_percent: f32,
}

impl Default for CaptureCfg {
    fn default() -> Self {
        Self {
            distance_percent: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SurveyCfg {
    /// IHO S-44 order: "special" | "order1" | "order2" | "order3".
    pub order: String,
}

impl Default for SurveyCfg {
    fn default() -> Self {
        Self {
            order: "order1".into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub estimator: EstimatorCfg,
    pub monitor: MonitorCfg,
    pub disambiguation: DisambiguationCfg,
    pub blunder: BlunderCfg,
    pub capture: CaptureCfg,
    pub survey: SurveyCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn parse_confidence(s: &str) -> eyre::Result<Confidence> {
    match s.to_ascii_lowercase().as_str() {
        "c68" => Ok(Confidence::C68),
        "c90" => Ok(Confidence::C90),
        "c95" => Ok(Confidence::C95),
        "c99" => Ok(Confidence::C99),
        other => eyre::bail!("estimator.confidence must be one of c68/c90/c95/c99, got {other:?}"),
    }
}

fn parse_method(s: &str) -> eyre::Result<Extractor> {
    match s.to_ascii_lowercase().as_str() {
        "prior" => Ok(Extractor::Prior),
        "likelihood" => Ok(Extractor::Likelihood),
        "posterior" => Ok(Extractor::Posterior),
        "predsurf" => Ok(Extractor::PredSurf),
        other => eyre::bail!(
            "disambiguation.method must be one of prior/likelihood/posterior/predsurf, got {other:?}"
        ),
    }
}

fn parse_order(s: &str) -> eyre::Result<IhoOrder> {
    match s.to_ascii_lowercase().as_str() {
        "special" => Ok(IhoOrder::Special),
        "order1" => Ok(IhoOrder::Order1),
        "order2" => Ok(IhoOrder::Order2),
        "order3" => Ok(IhoOrder::Order3),
        other => eyre::bail!("survey.order must be one of special/order1/order2/order3, got {other:?}"),
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Estimator
        if self.estimator.null_sdev < 0.0 {
            eyre::bail!("estimator.null_sdev must be >= 0");
        }
        if !(1.0..=10.0).contains(&self.estimator.distance_exponent) {
            eyre::bail!("estimator.distance_exponent must be in [1, 10]");
        }
        if !(3..=101).contains(&self.estimator.median_length)
            || self.estimator.median_length % 2 == 0
        {
            eyre::bail!("estimator.median_length must be odd and in [3, 101]");
        }
        if !(0.1..=255.0).contains(&self.estimator.quotient_limit) {
            eyre::bail!("estimator.quotient_limit must be in [0.1, 255]");
        }
        if !(0.8..=1.0).contains(&self.estimator.discount) {
            eyre::bail!("estimator.discount must be in [0.8, 1.0]");
        }
        parse_confidence(&self.estimator.confidence)?;

        // Monitor
        if !(0.1..=10.0).contains(&self.monitor.offset) {
            eyre::bail!("monitor.offset must be in [0.1, 10]");
        }
        if !(0.001..=10.0).contains(&self.monitor.bayes_factor) {
            eyre::bail!("monitor.bayes_factor must be in [0.001, 10]");
        }
        if !(1..=10).contains(&self.monitor.runlength) {
            eyre::bail!("monitor.runlength must be in [1, 10]");
        }

        // Disambiguation
        parse_method(&self.disambiguation.method)?;
        if !(0.0..=1000.0).contains(&self.disambiguation.min_context) {
            eyre::bail!("disambiguation.min_context must be in [0, 1000] m");
        }
        if !(1.0..=3000.0).contains(&self.disambiguation.max_context) {
            eyre::bail!("disambiguation.max_context must be in [1, 3000] m");
        }
        if self.disambiguation.min_context > self.disambiguation.max_context {
            eyre::bail!("disambiguation.min_context exceeds max_context");
        }

        // Blunder filter
        if !(1.0..=1000.0).contains(&self.blunder.minimum) {
            eyre::bail!("blunder.minimum must be in [1, 1000] m");
        }
        if !(0.0..=100.0).contains(&self.blunder.percent) {
            eyre::bail!("blunder.percent must be in [0, 100]");
        }
        if !(0.0..=10.0).contains(&self.blunder.scalar) {
            eyre::bail!("blunder.scalar must be in [0, 10]");
        }

        // Capture
        if !(1.0..=100.0).contains(&self.capture.distance_percent) {
            eyre::bail!("capture.distance_percent must be in [1, 100]");
        }

        // Survey order
        parse_order(&self.survey.order)?;

        Ok(())
    }

    /// Lower onto the core builder. Call [`Config::validate`] first; this
    /// only fails on the enumerated string fields.
    pub fn to_builder(&self) -> eyre::Result<ParamsBuilder> {
        Ok(ParamsBuilder::new()
            .null_depth(self.estimator.null_depth)
            .null_sdev(self.estimator.null_sdev)
            .confidence(parse_confidence(&self.estimator.confidence)?)
            .distance_exponent(self.estimator.distance_exponent)
            .median_length(self.estimator.median_length)
            .quotient_limit(self.estimator.quotient_limit)
            .discount(self.estimator.discount)
            .monitor_offset(self.monitor.offset)
            .bayes_factor(self.monitor.bayes_factor)
            .runlength(self.monitor.runlength)
            .extractor(parse_method(&self.disambiguation.method)?)
            .context(
                self.disambiguation.min_context,
                self.disambiguation.max_context,
            )
            .blunders(
                self.blunder.minimum,
                self.blunder.percent / 100.0,
                self.blunder.scalar,
            )
            .capture_scale(self.capture.distance_percent / 100.0)
            .survey_order(parse_order(&self.survey.order)?))
    }
}
