use std::time::Duration;

use rama::http::HeaderMap;

use crate::{
    TransferError,
    wire::{
        HEADER_CREATION_TIME, HEADER_EXPECTED_LATENCY, HEADER_SLEEP_TIME, insert_duration_header,
        read_duration_header,
    },
};

/// Advisory timing information returned with every successful transfer.
///
/// `expected_latency ≈ creation_time + sleep_time + time spent on the exchange`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingMetadata {
    /// Target latency computed by the model.
    pub expected_latency: Duration,
    /// Residual sleep actually applied.
    pub sleep_time: Duration,
    /// Payload creation time (server side for GET, client reported for PUT).
    pub creation_time: Duration,
}

impl TimingMetadata {
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        insert_duration_header(headers, HEADER_EXPECTED_LATENCY, self.expected_latency);
        insert_duration_header(headers, HEADER_SLEEP_TIME, self.sleep_time);
        insert_duration_header(headers, HEADER_CREATION_TIME, self.creation_time);
    }

    /// Parse metadata from response headers; all three are required.
    pub fn try_from_headers(headers: &HeaderMap) -> Result<Self, TransferError> {
        let required = |name| {
            read_duration_header(headers, name)?.ok_or_else(|| {
                TransferError::protocol(format!("missing timing header '{name}' in response"))
            })
        };

        Ok(Self {
            expected_latency: required(&HEADER_EXPECTED_LATENCY)?,
            sleep_time: required(&HEADER_SLEEP_TIME)?,
            creation_time: required(&HEADER_CREATION_TIME)?,
        })
    }
}

/// Time still left to reach `target` after `spent`, clamped at zero.
#[inline]
pub fn residual(target: Duration, spent: Duration) -> Duration {
    target.saturating_sub(spent)
}
