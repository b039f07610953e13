#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, time::Duration};

use rama::{
    error::{BoxError, ErrorContext},
    graceful::{self, ShutdownGuard},
    net::socket::Interface,
    telemetry::tracing::{self, Instrument as _},
};

use clap::Parser;

use mocks3_lib::{
    cli::{ModelArgs, parse_duration},
    service::{DEFAULT_MAX_MESSAGE_SIZE, EmulationConfig},
    payload::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
    utils::{self, telemetry::Verbosity},
};

pub mod server;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
pub mod test;

/// CLI arguments for configuring the mocks3 server.
#[derive(Debug, Clone, Parser)]
#[command(name = "mocks3-server")]
#[command(bin_name = "mocks3-server")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// network interface to bind the transfer service to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "0.0.0.0:30000"
    )]
    pub bind: Interface,

    /// directory in which data (e.g. the bound address) will be stored on the filesystem
    #[arg(long, short = 'D', default_value = ".mocks3")]
    pub data: PathBuf,

    /// default log verbosity; use RUST_LOG env for more options
    #[arg(long, value_name = "info | debug | trace", default_value_t = Verbosity::Info)]
    pub verbosity: Verbosity,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 1.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    /// max lifetime of a single tcp connection
    #[arg(long, value_name = "DURATION", default_value = "5m", value_parser = parse_duration)]
    pub timeout: Duration,

    /// largest transfer (in bytes) accepted for a single GET or PUT
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: u64,

    /// default chunk size (in bytes) of streamed GET responses
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// compute and report target latencies, but never sleep
    #[arg(long, default_value_t = false)]
    pub disable_latency: bool,

    /// do not subtract the creation time reported by PUT clients
    #[arg(long, default_value_t = false)]
    pub ignore_client_creation_time: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

impl Args {
    fn emulation_config(&self) -> EmulationConfig {
        EmulationConfig {
            latency_enabled: !self.disable_latency,
            use_client_creation_time: !self.ignore_client_creation_time,
            max_message_size: self.max_message_size,
            chunk_size: self.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbosity: args.verbosity,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Runs the mocks3 transfer server and blocks until
/// a critical error occurs or the (graceful) shutdown has been initiated.
///
/// This entry point is used by both the (binary) `main` function as well as
/// for the e2e test suite found in the test module.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    tokio::fs::create_dir_all(&args.data)
        .await
        .context("create data directory")
        .with_context_debug_field("path", || args.data.clone())?;
    tracing::info!(path = ?args.data, "data directory ready to be used");

    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (error_tx, error_rx) = tokio::sync::mpsc::channel::<BoxError>(1);
    let graceful = graceful::Shutdown::new(new_shutdown_signal(error_rx, base_shutdown_signal));

    graceful.spawn_task_fn(move |guard| run_transfer_server(args, guard, error_tx));

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::info!("gracefully shutdown with a delay of: {delay:?}");
    Ok(())
}

async fn run_transfer_server(
    args: Args,
    guard: ShutdownGuard,
    error_tx: tokio::sync::mpsc::Sender<BoxError>,
) {
    tracing::info!("spawning transfer server...");
    if let Err(err) = server::run_transfer_server(args, guard)
        .instrument(tracing::debug_span!(
            "transfer server lifetime",
            server.service.name = utils::env::project_name(),
            otel.kind = "server",
            network.protocol.name = "http",
        ))
        .await
    {
        tracing::error!("transfer server exited with an error: {err}");
        let _ = error_tx.send(err).await;
    }
}

fn new_shutdown_signal(
    error_rx: tokio::sync::mpsc::Receiver<BoxError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        let mut mut_error_rx = error_rx;
        let mut signal = Box::pin(base_shutdown_signal);

        tokio::select! {
            _ = signal.as_mut() => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            err = mut_error_rx.recv() => {
                if let Some(err) = err {
                    tracing::error!("fatal err received: {err}; abort");
                } else {
                    tracing::info!("wait for default signal, no error was received");
                    signal.await;
                    tracing::debug!("default signal triggered: init graceful shutdown");
                }
            }
        }
    }
}
