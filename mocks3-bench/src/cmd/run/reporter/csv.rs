use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};

use mocks3_lib::latency::Operation;

use super::{Reporter, TransferEvent};

const HEADER: &str = "Payload Size (Bytes),E2E Time (us),Target Time (us),Comm Time (us),Creation Time (us),Sleep Time (us)";

/// Writes one csv row per successful transfer,
/// in a separate file per operation.
///
/// Failed transfers are logged and otherwise skipped.
pub struct CsvReporter<W = BufWriter<File>> {
    get: Option<W>,
    put: Option<W>,
}

impl CsvReporter {
    /// Create `get_benchmark.csv` and/or `put_benchmark.csv` in the given directory,
    /// overwriting previous results.
    pub fn create(dir: &Path, operations: &[Operation]) -> Result<Self, BoxError> {
        let open = |op: Operation| -> Result<Option<BufWriter<File>>, BoxError> {
            if !operations.contains(&op) {
                return Ok(None);
            }
            let path = dir.join(csv_file_name(op));
            let file = File::create(&path)
                .context("create csv benchmark file")
                .with_context_debug_field("path", || path.clone())?;
            tracing::info!(path = ?path, "write {op} benchmark results as csv");
            Ok(Some(BufWriter::new(file)))
        };

        Self::new(open(Operation::Get)?, open(Operation::Put)?)
    }
}

fn csv_file_name(op: Operation) -> &'static str {
    match op {
        Operation::Get => "get_benchmark.csv",
        Operation::Put => "put_benchmark.csv",
    }
}

impl<W: Write> CsvReporter<W> {
    pub fn new(get: Option<W>, put: Option<W>) -> Result<Self, BoxError> {
        let mut reporter = Self { get, put };
        for w in [reporter.get.as_mut(), reporter.put.as_mut()]
            .into_iter()
            .flatten()
        {
            writeln!(w, "{HEADER}").context("write csv header")?;
            w.flush().context("flush csv header")?;
        }
        Ok(reporter)
    }

    pub fn into_inner(self) -> (Option<W>, Option<W>) {
        (self.get, self.put)
    }
}

impl<W: Write + Send + 'static> Reporter for CsvReporter<W> {
    fn on_result(&mut self, ev: &TransferEvent) -> Result<(), BoxError> {
        let report = match &ev.result {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(
                    operation = %ev.operation,
                    size = ev.size,
                    "skip failed transfer in csv output: {err}"
                );
                return Ok(());
            }
        };

        let w = match ev.operation {
            Operation::Get => self.get.as_mut(),
            Operation::Put => self.put.as_mut(),
        };
        let Some(w) = w else {
            return Ok(());
        };

        writeln!(
            w,
            "{},{},{},{},{},{}",
            report.size,
            report.end_to_end.as_micros(),
            report.target.as_micros(),
            report.communication_time.as_micros(),
            report.creation_time.as_micros(),
            report.server.sleep_time.as_micros(),
        )
        .context("write csv row")?;
        // flushed per row, so results survive an aborted run
        w.flush().context("flush csv row")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BoxError> {
        for w in [self.get.as_mut(), self.put.as_mut()].into_iter().flatten() {
            w.flush().context("flush csv file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cmd::run::reporter::test_events;

    #[test]
    fn test_csv_rows_per_operation() {
        let mut reporter = CsvReporter::new(Some(Vec::new()), Some(Vec::new())).unwrap();
        reporter
            .on_result(&test_events::ok(Operation::Put, 1024, 150, 160))
            .unwrap();
        reporter
            .on_result(&test_events::ok(Operation::Get, 2048, 75, 80))
            .unwrap();
        reporter
            .on_result(&test_events::failed(Operation::Get, 4096))
            .unwrap();
        reporter.finish().unwrap();

        let (get, put) = reporter.into_inner();
        assert_eq!(
            format!("{HEADER}\n2048,80,75,20,5,7\n"),
            String::from_utf8(get.unwrap()).unwrap()
        );
        assert_eq!(
            format!("{HEADER}\n1024,160,150,20,5,7\n"),
            String::from_utf8(put.unwrap()).unwrap()
        );
    }

    #[test]
    fn test_csv_skips_unselected_operation() {
        let mut reporter = CsvReporter::new(Some(Vec::new()), None).unwrap();
        reporter
            .on_result(&test_events::ok(Operation::Put, 1, 1, 1))
            .unwrap();

        let (get, put) = reporter.into_inner();
        assert_eq!(format!("{HEADER}\n"), String::from_utf8(get.unwrap()).unwrap());
        assert!(put.is_none());
    }

    #[test]
    fn test_csv_create_files() {
        let dir = mocks3_lib::utils::test::unique_empty_temp_dir("mocks3_csv_reporter").unwrap();

        let mut reporter = CsvReporter::create(&dir, &[Operation::Get]).unwrap();
        reporter
            .on_result(&test_events::ok(Operation::Get, 1, 2, 3))
            .unwrap();
        reporter.finish().unwrap();

        let content = std::fs::read_to_string(dir.join("get_benchmark.csv")).unwrap();
        assert!(content.starts_with("Payload Size (Bytes),"));
        assert!(content.ends_with("1,3,2,20,5,7\n"));
        assert!(!dir.join("put_benchmark.csv").exists());
    }
}
