use rama::error::BoxError;

use mocks3_lib::latency::Operation;

use super::{Counters, OperationCounters, Reporter, TransferEvent};

#[derive(Default)]
pub struct HumanReporter {
    counters: OperationCounters,
}

impl HumanReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn summary_line(op: Operation, c: &Counters) -> String {
        format!(
            "{op} done ok={} failed={} slow={} bytes={} mean_deviation={:?}",
            c.ok,
            c.failed,
            c.slow,
            c.bytes,
            c.mean_deviation(),
        )
    }
}

impl Reporter for HumanReporter {
    fn on_result(&mut self, ev: &TransferEvent) -> Result<(), BoxError> {
        self.counters.apply(ev);

        match &ev.result {
            Ok(report) => println!(
                "{} it={} size={} e2e={:?} target={:?} comm={:?} creation={:?} sleep={:?}",
                ev.operation,
                ev.iteration,
                ev.size,
                report.end_to_end,
                report.target,
                report.communication_time,
                report.creation_time,
                report.server.sleep_time,
            ),
            Err(err) => println!(
                "{} it={} size={} failed: {err}",
                ev.operation, ev.iteration, ev.size
            ),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BoxError> {
        for op in [Operation::Put, Operation::Get] {
            let c = self.counters.get(op);
            if c.total > 0 {
                println!("{}", Self::summary_line(op, c));
            }
        }
        Ok(())
    }
}
