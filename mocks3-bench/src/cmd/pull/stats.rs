use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullSnapshot {
    pub pulls: u64,
    pub failures: u64,
    pub bytes: u64,
    pub total_e2e: Duration,
    pub max_e2e: Duration,
}

impl PullSnapshot {
    pub fn mean_e2e(&self) -> Duration {
        match u32::try_from(self.pulls) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(pulls) => self.total_e2e / pulls,
        }
    }
}

/// Pull statistics shared by all workers.
#[derive(Debug, Default)]
pub struct PullStats(Mutex<PullSnapshot>);

impl PullStats {
    pub fn record_pull(&self, bytes: u64, e2e: Duration) {
        let mut stats = self.0.lock();
        stats.pulls += 1;
        stats.bytes += bytes;
        stats.total_e2e += e2e;
        stats.max_e2e = stats.max_e2e.max(e2e);
    }

    pub fn record_failure(&self) {
        self.0.lock().failures += 1;
    }

    pub fn snapshot(&self) -> PullSnapshot {
        *self.0.lock()
    }
}
