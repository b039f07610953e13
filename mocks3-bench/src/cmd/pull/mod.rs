//! Cold start load generator.
//!
//! A fixed set of workers each repeatedly pull a container image sized
//! object from the server, spreading the pulls as a poisson process over
//! the configured amount of cold starts per minute.

use std::{sync::Arc, time::Duration};

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing::{self, Instrument as _},
};

use clap::Args;
use mocks3_lib::{client::TransferClient, utils::env::parse_env_var};
use rand::RngExt as _;
use tokio::{task::JoinSet, time::Instant};

use crate::config::ClientArgs;

mod stats;

pub use self::stats::{PullSnapshot, PullStats};

pub const WORKERS_ENV: &str = "NUMBER_OF_WORKERS";
pub const COLDSTARTS_PER_MINUTE_ENV: &str = "COLDSTART_PER_MINUTE";
pub const IMAGE_SIZE_ENV: &str = "IMAGE_SIZE";

pub const DEFAULT_WORKERS: usize = 20;
pub const DEFAULT_COLDSTARTS_PER_MINUTE: f64 = 60.;
pub const DEFAULT_IMAGE_SIZE_MIB: u64 = 128;

const INITIAL_WAIT_SECS: std::ops::Range<f64> = 10.0..40.0;

#[derive(Debug, Clone, Args)]
/// emulate container cold starts pulling their image
pub struct PullCommand {
    #[command(flatten)]
    client: ClientArgs,

    /// number of concurrent pull workers
    /// [env: NUMBER_OF_WORKERS] [default: 20]
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// cold starts per minute, spread over all workers
    /// [env: COLDSTART_PER_MINUTE] [default: 60]
    #[arg(long, value_name = "CPM")]
    coldstarts_per_minute: Option<f64>,

    /// size of the pulled image in MiB
    /// [env: IMAGE_SIZE] [default: 128]
    #[arg(long, value_name = "MiB")]
    image_size: Option<u64>,

    /// stop a worker after this many pulls (runs until shutdown if not defined)
    #[arg(long, value_name = "N")]
    pulls: Option<usize>,

    /// interval at which the aggregated pull statistics are logged
    #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = mocks3_lib::cli::parse_duration)]
    report_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullConfig {
    pub workers: usize,
    pub coldstarts_per_minute: f64,
    pub image_size: u64,
    pub pulls_per_worker: Option<usize>,
}

impl PullConfig {
    /// Mean time between two pulls of the same worker.
    pub fn mean_wait(&self) -> Duration {
        let per_worker = self.coldstarts_per_minute / self.workers as f64;
        Duration::from_secs_f64(60. / per_worker)
    }
}

impl PullCommand {
    /// Cli flags win over env vars, which win over the defaults.
    pub fn try_to_config(&self) -> Result<PullConfig, BoxError> {
        let workers = self
            .workers
            .or_else(|| parse_env_var(WORKERS_ENV))
            .unwrap_or(DEFAULT_WORKERS);
        let coldstarts_per_minute = self
            .coldstarts_per_minute
            .or_else(|| parse_env_var(COLDSTARTS_PER_MINUTE_ENV))
            .unwrap_or(DEFAULT_COLDSTARTS_PER_MINUTE);
        let image_size_mib = self
            .image_size
            .or_else(|| parse_env_var(IMAGE_SIZE_ENV))
            .unwrap_or(DEFAULT_IMAGE_SIZE_MIB);

        if workers == 0 {
            return Err("at least one pull worker is required".into());
        }
        if !(coldstarts_per_minute.is_finite() && coldstarts_per_minute > 0.) {
            return Err(format!(
                "cold starts per minute has to be a positive number, got {coldstarts_per_minute}"
            )
            .into());
        }
        if self.pulls == Some(0) {
            return Err("pulls per worker has to be at least one when defined".into());
        }
        let image_size = image_size_mib
            .checked_mul(1024 * 1024)
            .filter(|size| *size > 0)
            .ok_or_else(|| format!("invalid image size of {image_size_mib} MiB"))?;

        Ok(PullConfig {
            workers,
            coldstarts_per_minute,
            image_size,
            pulls_per_worker: self.pulls,
        })
    }
}

pub async fn exec(guard: ShutdownGuard, args: PullCommand) -> Result<(), BoxError> {
    let cfg = Arc::new(args.try_to_config()?);
    let client = args
        .client
        .try_new_client()
        .context("create mocks3 transfer client")?;

    tracing::info!(
        address = client.address(),
        workers = cfg.workers,
        coldstarts_per_minute = cfg.coldstarts_per_minute,
        image_size = cfg.image_size,
        mean_wait = ?cfg.mean_wait(),
        "pull config ready",
    );

    let stats = Arc::new(PullStats::default());

    let mut workers = JoinSet::new();
    for id in 0..cfg.workers {
        workers.spawn(
            pull_worker(
                id,
                client.clone(),
                cfg.clone(),
                stats.clone(),
                guard.clone_weak().into_cancelled(),
            )
            .instrument(tracing::debug_span!("pull worker", worker = id)),
        );
    }

    let mut report_interval =
        tokio::time::interval(args.report_interval.max(Duration::from_millis(1)));
    report_interval.tick().await;

    loop {
        tokio::select! {
            _ = report_interval.tick() => {
                log_snapshot("pull statistics", stats.snapshot());
            }
            maybe_worker = workers.join_next() => {
                match maybe_worker {
                    Some(Ok(())) => (),
                    Some(Err(err)) => tracing::error!("pull worker panicked: {err}"),
                    None => break,
                }
            }
        }
    }

    log_snapshot("all pull workers finished", stats.snapshot());
    Ok(())
}

fn log_snapshot(msg: &'static str, snapshot: PullSnapshot) {
    tracing::info!(
        pulls = snapshot.pulls,
        failures = snapshot.failures,
        bytes = snapshot.bytes,
        mean_e2e = ?snapshot.mean_e2e(),
        max_e2e = ?snapshot.max_e2e,
        "{msg}"
    );
}

/// Draw from an exponential distribution with the given mean.
pub fn exponential_wait(mean: Duration) -> Duration {
    let u: f64 = rand::rng().random();
    mean.mul_f64(-(1. - u).ln())
}

pub async fn pull_worker<S>(
    id: usize,
    client: TransferClient<S>,
    cfg: Arc<PullConfig>,
    stats: Arc<PullStats>,
    cancelled: impl Future,
) where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    let mut cancelled = std::pin::pin!(cancelled);

    // spread the first cold starts
    let initial_wait = Duration::from_secs_f64(rand::rng().random_range(INITIAL_WAIT_SECS));
    tracing::info!(worker = id, ?initial_wait, "initial wait");
    tokio::select! {
        _ = cancelled.as_mut() => return,
        _ = tokio::time::sleep(initial_wait) => (),
    }

    let mut pulls = 0;
    loop {
        pulls += 1;

        let start = Instant::now();
        let result = tokio::select! {
            _ = cancelled.as_mut() => return,
            result = client.get_file(cfg.image_size) => result,
        };

        let e2e = match result {
            Ok((_, report)) => {
                stats.record_pull(report.size, report.end_to_end);
                report.end_to_end
            }
            Err(err) => {
                tracing::error!(worker = id, "image pull failed: {err}");
                stats.record_failure();
                start.elapsed()
            }
        };

        if cfg.pulls_per_worker.is_some_and(|max| pulls >= max) {
            break;
        }

        let wait = exponential_wait(cfg.mean_wait());
        let net_wait = wait.saturating_sub(start.elapsed());
        tracing::info!(worker = id, ?wait, get = ?e2e, ?net_wait, "wait for next image pull");

        tokio::select! {
            _ = cancelled.as_mut() => return,
            _ = tokio::time::sleep(net_wait) => (),
        }
    }

    tracing::debug!(worker = id, pulls, "pull worker done");
}
