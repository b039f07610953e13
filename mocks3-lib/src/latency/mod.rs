//! Latency model mapping an `(operation, size)` pair to the total time
//! a transfer should take as observed by the caller.
//!
//! The curve is an empirical fit of measured object store latencies:
//!
//! ```text
//! latency_us(size) = A * exp(B * log10(size)) + C
//! target(op, size) = latency_us(size) * weight(op)
//! ```

use std::{fmt, str::FromStr, time::Duration};

use crate::TransferError;


/// Kind of transfer being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Put,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Put => "PUT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("get") {
            Ok(Operation::Get)
        } else if s.eq_ignore_ascii_case("put") {
            Ok(Operation::Put)
        } else {
            Err(TransferError::invalid_input(format!(
                "unknown operation '{s}' (expected GET or PUT)"
            )))
        }
    }
}

/// How a request for zero bytes is treated.
///
/// The curve is undefined at size zero (`log10(0)`), but its limit
/// for a vanishing size is the constant term `C`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroSizePolicy {
    /// Use the lower limit of the curve, `C * weight`.
    #[default]
    Floor,
    /// Refuse the request as invalid input.
    Reject,
}

impl fmt::Display for ZeroSizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroSizePolicy::Floor => f.write_str("floor"),
            ZeroSizePolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for ZeroSizePolicy {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "floor" => Ok(ZeroSizePolicy::Floor),
            "reject" => Ok(ZeroSizePolicy::Reject),
            other => Err(TransferError::invalid_input(format!(
                "unknown zero size policy '{other}' (expected floor or reject)"
            ))),
        }
    }
}

/// Coefficients of the empirical latency curve, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl LatencyCurve {
    pub const DEFAULT_A: f64 = 120.18868;
    pub const DEFAULT_B: f64 = 1.11999534;
    pub const DEFAULT_C: f64 = 111248.20149;

    /// Raw curve value in microseconds for a non-zero size.
    fn latency_us(&self, size: u64) -> f64 {
        self.a * (self.b * (size as f64).log10()).exp() + self.c
    }
}

impl Default for LatencyCurve {
    fn default() -> Self {
        Self {
            a: Self::DEFAULT_A,
            b: Self::DEFAULT_B,
            c: Self::DEFAULT_C,
        }
    }
}

/// Pure and deterministic latency model, shared read-only between
/// the transfer service and the compensating client.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyModel {
    curve: LatencyCurve,
    get_weight: f64,
    put_weight: f64,
    zero_size: ZeroSizePolicy,
}

impl LatencyModel {
    pub const DEFAULT_GET_WEIGHT: f64 = 0.67;
    pub const DEFAULT_PUT_WEIGHT: f64 = 1.33;

    /// Create a model, validating that all coefficients are finite and
    /// non-negative so the target grows with the size.
    pub fn try_new(
        curve: LatencyCurve,
        get_weight: f64,
        put_weight: f64,
    ) -> Result<Self, TransferError> {
        for (name, value) in [
            ("curve A", curve.a),
            ("curve B", curve.b),
            ("curve C", curve.c),
            ("GET weight", get_weight),
            ("PUT weight", put_weight),
        ] {
            if !value.is_finite() || value < 0. {
                return Err(TransferError::invalid_input(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }

        Ok(Self {
            curve,
            get_weight,
            put_weight,
            zero_size: ZeroSizePolicy::default(),
        })
    }

    rama::utils::macros::generate_set_and_with! {
        /// Define how zero byte transfers are handled.
        pub fn zero_size_policy(mut self, policy: ZeroSizePolicy) -> Self {
            self.zero_size = policy;
            self
        }
    }

    pub fn curve(&self) -> LatencyCurve {
        self.curve
    }

    pub fn weight(&self, op: Operation) -> f64 {
        match op {
            Operation::Get => self.get_weight,
            Operation::Put => self.put_weight,
        }
    }

    /// Target end-to-end latency for transferring `size` bytes.
    ///
    /// Fails only for a zero size under [`ZeroSizePolicy::Reject`] or when
    /// the result does not fit in a [`Duration`].
    pub fn target_latency(&self, op: Operation, size: u64) -> Result<Duration, TransferError> {
        let latency_us = if size == 0 {
            match self.zero_size {
                ZeroSizePolicy::Floor => self.curve.c,
                ZeroSizePolicy::Reject => {
                    return Err(TransferError::invalid_input(
                        "size must be at least 1 byte",
                    ));
                }
            }
        } else {
            self.curve.latency_us(size)
        };

        let target_us = (latency_us * self.weight(op)).max(0.);
        Duration::try_from_secs_f64(target_us / 1_000_000.).map_err(|err| {
            TransferError::invalid_input(format!(
                "target latency of {target_us}us for {op} of {size} bytes out of range: {err}"
            ))
        })
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self {
            curve: LatencyCurve::default(),
            get_weight: Self::DEFAULT_GET_WEIGHT,
            put_weight: Self::DEFAULT_PUT_WEIGHT,
            zero_size: ZeroSizePolicy::default(),
        }
    }
}
