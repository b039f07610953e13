use std::io::Write;

use rama::error::{BoxError, ErrorContext as _};
use serde_json::Value;

use mocks3_lib::latency::Operation;

use super::{Counters, OperationCounters, Reporter, TransferEvent};

/// Emits one json object per line: an `event` per transfer
/// and a `final` summary per operation.
pub struct JsonlReporter<W = std::io::Stdout> {
    writer: W,
    counters: OperationCounters,
}

impl JsonlReporter {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for JsonlReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> JsonlReporter<W> {
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            counters: OperationCounters::default(),
        }
    }

    fn emit(&mut self, line: Value) -> Result<(), BoxError> {
        writeln!(self.writer, "{line}").context("write jsonl line")?;
        Ok(())
    }
}

fn counters_json(op: Operation, c: &Counters) -> Value {
    serde_json::json!({
        "type": "final",
        "operation": op.as_str(),
        "total": c.total,
        "ok": c.ok,
        "failed": c.failed,
        "slow": c.slow,
        "bytes": c.bytes,
        "mean_deviation_us": c.mean_deviation().as_micros() as u64,
    })
}

impl<W: Write + Send + 'static> Reporter for JsonlReporter<W> {
    fn on_result(&mut self, ev: &TransferEvent) -> Result<(), BoxError> {
        self.counters.apply(ev);

        let line = match &ev.result {
            Ok(report) => serde_json::json!({
                "type": "event",
                "operation": ev.operation.as_str(),
                "iteration": ev.iteration,
                "size": ev.size,
                "ok": true,
                "e2e_us": report.end_to_end.as_micros() as u64,
                "target_us": report.target.as_micros() as u64,
                "comm_us": report.communication_time.as_micros() as u64,
                "creation_us": report.creation_time.as_micros() as u64,
                "sleep_us": report.server.sleep_time.as_micros() as u64,
                "client_sleep_us": report.client_sleep.as_micros() as u64,
            }),
            Err(err) => serde_json::json!({
                "type": "event",
                "operation": ev.operation.as_str(),
                "iteration": ev.iteration,
                "size": ev.size,
                "ok": false,
                "timeout": err.is_timeout(),
                "error": err.to_string(),
            }),
        };
        self.emit(line)
    }

    fn finish(&mut self) -> Result<(), BoxError> {
        for op in [Operation::Put, Operation::Get] {
            let c = *self.counters.get(op);
            if c.total > 0 {
                self.emit(counters_json(op, &c))?;
            }
        }
        self.writer.flush().context("flush jsonl output")?;
        Ok(())
    }
}
