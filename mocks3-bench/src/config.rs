use std::time::Duration;

use clap::Args;
use rama::error::{BoxError, ErrorContext as _};

use mocks3_lib::{
    cli::{ModelArgs, parse_duration},
    client::{ClientConfig, DEFAULT_SERVER_ADDRESS, SERVER_ADDRESS_ENV, TransferClient},
    payload::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
};

/// Client parameters shared by all bench commands.
#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// address of the mocks3 server
    #[arg(
        value_name = "ADDRESS",
        long_help = format!(
            "address of the mocks3 server, \
             falls back to the {SERVER_ADDRESS_ENV} env var and then to {DEFAULT_SERVER_ADDRESS}"
        )
    )]
    pub address: Option<String>,

    /// bound on the network exchange of a single transfer
    #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// use the chunked streaming endpoints
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// chunk size (in bytes) of streaming transfers
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// do not sleep the residual target latency on the client side
    #[arg(long, default_value_t = false)]
    pub no_compensate: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

impl ClientArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.timeout,
            compensate: !self.no_compensate,
            streaming: self.stream,
            chunk_size: self.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn try_new_client(&self) -> Result<TransferClient, BoxError> {
        let model = self
            .model
            .try_to_model()
            .context("create latency model from cli arguments")?;
        TransferClient::try_new(self.address.as_deref(), model, self.client_config())
    }
}
