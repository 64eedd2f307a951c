//! CLI / config file tunables (§6). The simulation driver reads a flat
//! `Key: value` text file; every recognized key is required and any
//! unrecognized one is a hard error.

use thiserror::Error;

use crate::face::Duration;
use crate::retransmit::DEFAULT_RETX_TICK;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("line {line}: expected `Key: value`, got {:?}", text)]
    Malformed { line: usize, text: String },

    #[error("unknown configuration key `{key}` at line {line}")]
    UnknownKey { key: String, line: usize },

    #[error("invalid value {value:?} for key `{key}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required key `{key}`")]
    MissingKey { key: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fully parsed, validated run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `Constraint`: max children per intermediate aggregator.
    pub fan_out: usize,
    /// `Window`: initial congestion window.
    pub initial_window: f64,
    /// `Alpha`: timeout window-decrease factor.
    pub alpha_to: f64,
    /// `Beta`: local-congestion window-decrease factor.
    pub beta_lc: f64,
    /// `Gamma`: remote-congestion window-decrease factor.
    pub gamma_rc: f64,
    /// `EWMAFactor`: RTT-threshold EWMA weight.
    pub ewma_alpha: f64,
    /// `ThresholdFactor`: multiplier applied to the EWMA RTT estimate.
    pub threshold_beta: f64,
    /// `UseCwa`: whether to suppress repeated local-congestion decreases.
    pub use_cwa: bool,
    /// `InterestQueue`: the consumer's bounded interest-queue capacity.
    pub consumer_queue_capacity: usize,
    /// `QueueSize`: the aggregator's queue capacity. An upstream interest
    /// whose sub-interests would overflow it is dropped whole at
    /// admission (the same all-or-nothing policy used for retransmission-
    /// duplicate suppression); the queue is still drained every schedule
    /// tick regardless of any one child's window.
    pub aggregator_queue_capacity: usize,
    /// `Iteration`: total number of iterations to run.
    pub iteration_count: u64,
}

impl Config {
    /// Not exposed through the recognized key set; kept as an internal
    /// default rather than a CLI option (see DESIGN.md).
    pub fn retx_tick(&self) -> Duration {
        DEFAULT_RETX_TICK
    }

    /// Ditto: interest lifetime is a forwarder-facing concern, not a
    /// congestion-control tunable the scenario file exposes.
    pub fn interest_lifetime(&self) -> Duration {
        4 * self.retx_tick()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut fan_out = None;
        let mut initial_window = None;
        let mut alpha_to = None;
        let mut beta_lc = None;
        let mut gamma_rc = None;
        let mut ewma_alpha = None;
        let mut threshold_beta = None;
        let mut use_cwa = None;
        let mut consumer_queue_capacity = None;
        let mut aggregator_queue_capacity = None;
        let mut iteration_count = None;

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::Malformed {
                    line: line_no + 1,
                    text: line.to_owned(),
                });
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "Constraint" => fan_out = Some(parse_usize("Constraint", value)?),
                "Window" => initial_window = Some(parse_f64("Window", value)?),
                "Alpha" => alpha_to = Some(parse_f64("Alpha", value)?),
                "Beta" => beta_lc = Some(parse_f64("Beta", value)?),
                "Gamma" => gamma_rc = Some(parse_f64("Gamma", value)?),
                "EWMAFactor" => ewma_alpha = Some(parse_f64("EWMAFactor", value)?),
                "ThresholdFactor" => threshold_beta = Some(parse_f64("ThresholdFactor", value)?),
                "UseCwa" => use_cwa = Some(parse_bool("UseCwa", value)?),
                "InterestQueue" => consumer_queue_capacity = Some(parse_usize("InterestQueue", value)?),
                "QueueSize" => aggregator_queue_capacity = Some(parse_usize("QueueSize", value)?),
                "Iteration" => iteration_count = Some(parse_u64("Iteration", value)?),
                _ => {
                    return Err(Error::UnknownKey {
                        key: key.to_owned(),
                        line: line_no + 1,
                    })
                }
            }
        }

        Ok(Config {
            fan_out: require(fan_out, "Constraint")?,
            initial_window: require(initial_window, "Window")?,
            alpha_to: require(alpha_to, "Alpha")?,
            beta_lc: require(beta_lc, "Beta")?,
            gamma_rc: require(gamma_rc, "Gamma")?,
            ewma_alpha: require(ewma_alpha, "EWMAFactor")?,
            threshold_beta: require(threshold_beta, "ThresholdFactor")?,
            use_cwa: require(use_cwa, "UseCwa")?,
            consumer_queue_capacity: require(consumer_queue_capacity, "InterestQueue")?,
            aggregator_queue_capacity: require(aggregator_queue_capacity, "QueueSize")?,
            iteration_count: require(iteration_count, "Iteration")?,
        })
    }
}

fn require<T>(value: Option<T>, key: &'static str) -> Result<T> {
    value.ok_or(Error::MissingKey { key })
}

fn parse_usize(key: &'static str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| Error::InvalidValue {
        key,
        value: value.to_owned(),
        reason: "expected a non-negative integer".to_owned(),
    })
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| Error::InvalidValue {
        key,
        value: value.to_owned(),
        reason: "expected a non-negative integer".to_owned(),
    })
}

fn parse_f64(key: &'static str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| Error::InvalidValue {
        key,
        value: value.to_owned(),
        reason: "expected a floating-point number".to_owned(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "expected true/false".to_owned(),
        }),
    }
}
