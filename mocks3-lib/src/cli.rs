//! Command line arguments shared by the mocks3 binaries.

use std::time::Duration;

use clap::Args;

use crate::{
    TransferError,
    latency::{LatencyCurve, LatencyModel, ZeroSizePolicy},
};

/// Latency model parameters.
///
/// Server and clients must use the same parameters
/// for the compensation to add up.
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// coefficient A of the latency curve `A * exp(B * log10(size)) + C` (microseconds)
    #[arg(long = "curve-a", value_name = "US", default_value_t = LatencyCurve::DEFAULT_A)]
    pub curve_a: f64,

    /// coefficient B of the latency curve
    #[arg(long = "curve-b", value_name = "B", default_value_t = LatencyCurve::DEFAULT_B)]
    pub curve_b: f64,

    /// constant term C of the latency curve (microseconds)
    #[arg(long = "curve-c", value_name = "US", default_value_t = LatencyCurve::DEFAULT_C)]
    pub curve_c: f64,

    /// multiplier applied to the curve for GET transfers
    #[arg(long, value_name = "WEIGHT", default_value_t = LatencyModel::DEFAULT_GET_WEIGHT)]
    pub get_weight: f64,

    /// multiplier applied to the curve for PUT transfers
    #[arg(long, value_name = "WEIGHT", default_value_t = LatencyModel::DEFAULT_PUT_WEIGHT)]
    pub put_weight: f64,

    /// how zero byte transfers are treated
    #[arg(long, value_name = "floor | reject", default_value_t = ZeroSizePolicy::Floor)]
    pub zero_size: ZeroSizePolicy,
}

impl ModelArgs {
    pub fn try_to_model(&self) -> Result<LatencyModel, TransferError> {
        let curve = LatencyCurve {
            a: self.curve_a,
            b: self.curve_b,
            c: self.curve_c,
        };
        Ok(LatencyModel::try_new(curve, self.get_weight, self.put_weight)?
            .with_zero_size_policy(self.zero_size))
    }
}

/// Parse a human friendly duration such as `60s` or `1m 30s`.
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}
