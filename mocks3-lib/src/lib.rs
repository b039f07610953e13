//! Core of the mocks3 object store emulator.
//!
//! Contains the latency model, payload generation, the HTTP transfer
//! service and the compensating client, shared by the `mocks3-server`
//! and `mocks3-bench` binaries.

#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod error;
pub mod latency;
pub mod payload;
pub mod service;
pub mod timing;
pub mod utils;
pub mod wire;

pub use self::error::TransferError;
