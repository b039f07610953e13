use std::path::PathBuf;

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};

use clap::{Args, ValueEnum};
use mocks3_lib::{client::TransferClient, latency::Operation};
use rand::{Rng, RngExt as _};

use crate::config::ClientArgs;

pub mod reporter;

use self::reporter::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// `get_benchmark.csv` and `put_benchmark.csv` in the data directory
    Csv,
    /// json lines on stdout
    Jsonl,
    /// human-friendly lines on stdout
    Human,
}

#[derive(Debug, Clone, Args)]
/// run the transfer size sweep benchmark
pub struct RunCommand {
    #[command(flatten)]
    client: ClientArgs,

    /// amount of transfers per operation
    #[arg(long, default_value_t = 100)]
    iterations: usize,

    /// operations to benchmark, in order
    #[arg(long, value_delimiter = ',', default_values_t = [Operation::Put, Operation::Get])]
    operations: Vec<Operation>,

    /// transfer sizes are drawn as `floor(2^(U * max_exponent))` bytes, U uniform in [0, 1)
    #[arg(long, value_name = "EXPONENT", default_value_t = 29.)]
    max_exponent: f64,

    /// how the results are reported
    #[arg(long, value_enum, default_value_t = ReportFormat::Csv)]
    format: ReportFormat,
}

pub async fn exec(data: PathBuf, guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let plan = BenchPlan::try_new(args.operations, args.iterations, args.max_exponent)?;
    let client = args
        .client
        .try_new_client()
        .context("create mocks3 transfer client")?;

    tracing::info!(
        address = client.address(),
        ?plan,
        format = ?args.format,
        "benchmark config ready",
    );

    let mut reporter: Box<dyn Reporter> = match args.format {
        ReportFormat::Csv => Box::new(CsvReporter::create(&data, &plan.operations)?),
        ReportFormat::Jsonl => Box::new(JsonlReporter::new()),
        ReportFormat::Human => Box::new(HumanReporter::new()),
    };

    let cancelled = guard.clone_weak().into_cancelled();
    let counters = run_benchmark(&client, &plan, reporter.as_mut(), cancelled).await?;

    for op in &plan.operations {
        let c = counters.get(*op);
        tracing::info!(
            operation = %op,
            ok = c.ok,
            failed = c.failed,
            slow = c.slow,
            mean_deviation = ?c.mean_deviation(),
            "benchmark finished"
        );
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct BenchPlan {
    pub operations: Vec<Operation>,
    pub iterations: usize,
    pub max_exponent: f64,
}

impl BenchPlan {
    pub fn try_new(
        mut operations: Vec<Operation>,
        iterations: usize,
        max_exponent: f64,
    ) -> Result<Self, BoxError> {
        if !(max_exponent.is_finite() && max_exponent > 0. && max_exponent < 63.) {
            return Err(format!("max exponent {max_exponent} not in range (0, 63)").into());
        }
        // keep the first occurrence, order matters (PUT before GET)
        let mut seen = Vec::with_capacity(operations.len());
        operations.retain(|op| {
            if seen.contains(op) {
                return false;
            }
            seen.push(*op);
            true
        });
        if operations.is_empty() {
            return Err("no operations to benchmark".into());
        }
        Ok(Self {
            operations,
            iterations: iterations.max(1),
            max_exponent,
        })
    }
}

/// Draw a transfer size of `floor(2^(U * max_exponent))` bytes.
pub fn random_size<R: Rng + ?Sized>(rng: &mut R, max_exponent: f64) -> u64 {
    let exponent = rng.random::<f64>() * max_exponent;
    2f64.powf(exponent).floor() as u64
}

/// Run all iterations of all planned operations one after the other,
/// feeding every outcome (failures included) to the reporter.
///
/// Stops early, still finishing the reporter, once `cancelled` resolves.
pub async fn run_benchmark<S>(
    client: &TransferClient<S>,
    plan: &BenchPlan,
    reporter: &mut dyn Reporter,
    cancelled: impl Future,
) -> Result<OperationCounters, BoxError>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    let mut cancelled = std::pin::pin!(cancelled);
    let mut counters = OperationCounters::default();

    'bench: for &operation in &plan.operations {
        tracing::info!(%operation, iterations = plan.iterations, "start benchmark");

        for iteration in 0..plan.iterations {
            let size = random_size(&mut rand::rng(), plan.max_exponent);

            let result = tokio::select! {
                _ = cancelled.as_mut() => {
                    tracing::warn!("exit benchmark early: guard shutdown");
                    break 'bench;
                }
                result = client.transfer(operation, size) => result,
            };

            if let Err(err) = &result {
                tracing::error!(%operation, size, iteration, "transfer failed: {err}");
            }

            let ev = TransferEvent {
                iteration,
                operation,
                size,
                result,
            };
            counters.apply(&ev);
            reporter.on_result(&ev)?;
        }
    }

    reporter.finish()?;
    Ok(counters)
}
