use std::time::Duration;

use rama::error::BoxError;

use mocks3_lib::{TransferError, client::TransferReport, latency::Operation};

mod csv;
mod human;
mod json;

pub use self::{csv::CsvReporter, human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + 'static {
    fn on_result(&mut self, ev: &TransferEvent) -> Result<(), BoxError>;
    fn finish(&mut self) -> Result<(), BoxError>;
}

#[derive(Debug)]
pub struct TransferEvent {
    pub iteration: usize,
    pub operation: Operation,
    pub size: u64,
    pub result: Result<TransferReport, TransferError>,
}

/// Aggregated outcome of all transfers of a single operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub total: u64,
    pub ok: u64,
    pub failed: u64,
    /// transfers which took longer than the target + 10%
    pub slow: u64,
    pub bytes: u64,
    /// sum of `|e2e - target|` over all successful transfers
    pub deviation: Duration,
}

impl Counters {
    pub fn apply(&mut self, ev: &TransferEvent) {
        self.total += 1;
        match &ev.result {
            Ok(report) => {
                self.ok += 1;
                self.bytes += report.size;
                self.deviation += report.end_to_end.abs_diff(report.target);
                if report.end_to_end > report.target.mul_f64(1.1) {
                    self.slow += 1;
                }
            }
            Err(_) => self.failed += 1,
        }
    }

    pub fn mean_deviation(&self) -> Duration {
        match u32::try_from(self.ok) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(ok) => self.deviation / ok,
        }
    }
}

/// [`Counters`] for GET and PUT.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperationCounters {
    pub get: Counters,
    pub put: Counters,
}

impl OperationCounters {
    pub fn apply(&mut self, ev: &TransferEvent) {
        self.get_mut(ev.operation).apply(ev);
    }

    pub fn get(&self, op: Operation) -> &Counters {
        match op {
            Operation::Get => &self.get,
            Operation::Put => &self.put,
        }
    }

    fn get_mut(&mut self, op: Operation) -> &mut Counters {
        match op {
            Operation::Get => &mut self.get,
            Operation::Put => &mut self.put,
        }
    }
}
