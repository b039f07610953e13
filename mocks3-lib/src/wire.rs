//! HTTP wire contract shared by the transfer service and its clients.
//!
//! | method | path           | body                      |
//! |--------|----------------|---------------------------|
//! | GET    | `/file`        | `size` bytes (unary)      |
//! | GET    | `/file/stream` | `size` bytes (chunked)    |
//! | PUT    | `/file`        | request payload (unary)   |
//! | PUT    | `/file/stream` | request payload (chunked) |
//!
//! Durations travel as integer microseconds in the `x-mocks3-*` headers.

use std::time::Duration;

use rama::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::TransferError;

pub const FILE_PATH: &str = "/file";
pub const FILE_STREAM_PATH: &str = "/file/stream";
pub const PING_PATH: &str = "/ping";

/// Time the client spent creating the payload of a PUT.
pub const HEADER_CREATION_TIME: HeaderName = HeaderName::from_static("x-mocks3-creation-time-us");
/// Target latency computed by the server.
pub const HEADER_EXPECTED_LATENCY: HeaderName =
    HeaderName::from_static("x-mocks3-expected-latency-us");
/// Residual sleep applied by the server.
pub const HEADER_SLEEP_TIME: HeaderName = HeaderName::from_static("x-mocks3-sleep-time-us");
/// Deadline the client grants to the server for handling the request.
pub const HEADER_TIMEOUT: HeaderName = HeaderName::from_static("x-mocks3-timeout-us");

/// Query of a GET request, e.g. `/file/stream?size=4096&chunk=1024`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeQuery {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<usize>,
}

impl SizeQuery {
    pub fn parse(query: Option<&str>) -> Result<Self, TransferError> {
        serde_html_form::from_str(query.unwrap_or_default())
            .map_err(|err| TransferError::invalid_input(format!("invalid size query: {err}")))
    }

    pub fn to_query_string(&self) -> Result<String, TransferError> {
        serde_html_form::to_string(self)
            .map_err(|err| TransferError::invalid_input(format!("encode size query: {err}")))
    }
}

/// JSON body answered to a successful PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub size: u64,
}

pub fn insert_duration_header(headers: &mut HeaderMap, name: HeaderName, value: Duration) {
    let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
    headers.insert(name, HeaderValue::from(micros));
}

/// Read an optional duration header, failing if present but malformed.
pub fn read_duration_header(
    headers: &HeaderMap,
    name: &HeaderName,
) -> Result<Option<Duration>, TransferError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|micros| Some(Duration::from_micros(micros)))
        .ok_or_else(|| TransferError::protocol(format!("invalid value for header '{name}'")))
}
