use std::time::Duration;

use parking_lot::Mutex;

use crate::probe::ProbeResult;

/// Point-in-time copy of the session counters.
///
/// `total == successes + failures` holds for every snapshot, and
/// `latencies` carries exactly one entry per success.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub latencies: Vec<Duration>,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub total_latency: Duration,
}

impl Stats {
    pub fn avg_latency(&self) -> Option<Duration> {
        if self.successes == 0 {
            return None;
        }
        let nanos = self.total_latency.as_nanos() / u128::from(self.successes);
        Some(Duration::from_nanos(nanos as u64))
    }

    /// Population standard deviation of the recorded latencies.
    pub fn std_dev(&self) -> Option<Duration> {
        let avg = self.avg_latency()?.as_secs_f64();
        let variance = self
            .latencies
            .iter()
            .map(|latency| (latency.as_secs_f64() - avg).powi(2))
            .sum::<f64>()
            / self.latencies.len() as f64;
        Some(Duration::from_secs_f64(variance.sqrt()))
    }

    pub fn loss_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failures as f64 / self.total as f64 * 100.0
    }

    fn observe(&mut self, result: &ProbeResult) {
        self.total += 1;
        if result.outcome.is_success() {
            // replies without a measurement count as answered in zero time
            let latency = result.latency.unwrap_or_default();
            self.successes += 1;
            self.latencies.push(latency);
            self.min_latency = Some(self.min_latency.map_or(latency, |min| min.min(latency)));
            self.max_latency = Some(self.max_latency.map_or(latency, |max| max.max(latency)));
            self.total_latency += latency;
        } else {
            self.failures += 1;
        }
    }
}

/// Running counters shared between the tasks of one session.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    inner: Mutex<Stats>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, result: &ProbeResult) {
        self.inner.lock().observe(result);
    }

    pub fn snapshot(&self) -> Stats {
        self.inner.lock().clone()
    }
}
