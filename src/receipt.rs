use std::{sync::Arc, time::Duration};

use log::debug;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::{
    pending::PendingTable,
    probe::{ProbeResult, Sequence},
    reporter::Emitter,
    stats::{Stats, StatsAccumulator},
};

/// Turns replies, reply errors and expirations into counted results.
///
/// Transports call [`ReceiptHandler::on_receipt`] and
/// [`ReceiptHandler::on_receipt_error`] from whatever task observes the
/// reply. Every path resolves the sequence through the [`PendingTable`]
/// first, so a probe is counted by whichever event reaches the table first
/// and ignored by the rest.
#[derive(Debug)]
pub struct ReceiptHandler {
    // held shared from resolution until the result is counted
    gate: RwLock<()>,
    pending: Arc<PendingTable>,
    stats: Arc<StatsAccumulator>,
    emitter: Arc<Emitter>,
    window: Duration,
    throttle: Mutex<FailureThrottle>,
}

impl ReceiptHandler {
    pub(crate) fn new(
        pending: Arc<PendingTable>,
        stats: Arc<StatsAccumulator>,
        emitter: Arc<Emitter>,
        window: Duration,
        throttle_window: Duration,
    ) -> Self {
        Self {
            gate: RwLock::new(()),
            pending,
            stats,
            emitter,
            window,
            throttle: Mutex::new(FailureThrottle::new(throttle_window)),
        }
    }

    /// Handles an echo reply. `rtt` is the round trip measured by the
    /// transport, the time since dispatch is used when it is absent. A reply
    /// arriving after the timeout window counts as a timeout.
    ///
    /// Returns `false` if the probe was no longer pending, e.g. because it
    /// was already swept.
    pub fn on_receipt(&self, sequence: Sequence, rtt: Option<Duration>) -> bool {
        let _gate = self.gate.read();
        let Some(sent_at) = self.pending.resolve(sequence) else {
            debug!("ignoring late reply for seq={}", sequence);
            return false;
        };
        let elapsed = sent_at.elapsed();
        if elapsed > self.window {
            debug!("reply for seq={} arrived after {:?}", sequence, elapsed);
            self.record(ProbeResult::timeout(sequence), None);
        } else {
            let latency = rtt.unwrap_or(elapsed);
            self.record(ProbeResult::success(sequence, latency), None);
        }
        true
    }

    /// Handles a transport error for a pending probe, counting it as failed.
    ///
    /// Returns `false` if the probe was no longer pending.
    pub fn on_receipt_error(&self, sequence: Sequence, reason: &str) -> bool {
        let _gate = self.gate.read();
        if self.pending.resolve(sequence).is_none() {
            debug!("ignoring error for resolved seq={}: {}", sequence, reason);
            return false;
        }
        let result = ProbeResult::failure(sequence);
        self.stats.observe(&result);
        match self.throttle.lock().admit(reason, Instant::now()) {
            Some(suppressed) => self.emitter.emit(result, Some(reason.to_string()), suppressed),
            None => debug!("suppressed failure message for seq={}: {}", sequence, reason),
        }
        true
    }

    /// Counts every probe pending for longer than the timeout window as timed out.
    pub(crate) fn expire_stale(&self) -> usize {
        let _gate = self.gate.read();
        let expired = self.pending.sweep_older_than(self.window);
        for entry in &expired {
            self.record(ProbeResult::timeout(entry.sequence), None);
        }
        expired.len()
    }

    /// Counts every probe still pending as failed and returns the final
    /// counters. Replies racing with this call are either counted before it
    /// or ignored after it.
    pub(crate) fn finish(&self) -> Stats {
        let _gate = self.gate.write();
        for entry in self.pending.drain() {
            self.record(
                ProbeResult::failure(entry.sequence),
                Some("no reply before session end".to_string()),
            );
        }
        self.stats.snapshot()
    }

    pub(crate) fn record(&self, result: ProbeResult, detail: Option<String>) {
        self.stats.observe(&result);
        self.emitter.emit(result, detail, 0);
    }
}

/// Folds repeated identical failure messages arriving within one window.
#[derive(Debug)]
struct FailureThrottle {
    window: Duration,
    last: Option<(String, Instant)>,
    suppressed: usize,
}

impl FailureThrottle {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns the number of folded messages to attach if this one should be
    /// emitted, `None` if it is a repeat inside the window.
    fn admit(&mut self, reason: &str, now: Instant) -> Option<usize> {
        if let Some((last_reason, last_at)) = &self.last {
            if last_reason == reason && now.saturating_duration_since(*last_at) < self.window {
                self.suppressed += 1;
                return None;
            }
        }
        self.last = Some((reason.to_string(), now));
        Some(std::mem::take(&mut self.suppressed))
    }
}

#[cfg(test)]
mod tests {
    use crate::reporter::{ChannelReporter, Report};

    use super::*;

    fn handler() -> (
        ReceiptHandler,
        Arc<PendingTable>,
        Arc<StatsAccumulator>,
        tokio::sync::mpsc::UnboundedReceiver<Report>,
    ) {
        let pending = Arc::new(PendingTable::new());
        let stats = Arc::new(StatsAccumulator::new());
        let (reporter, reports) = ChannelReporter::new();
        let emitter = Arc::new(Emitter::new("10.0.0.1", Arc::new(reporter), None));
        let handler = ReceiptHandler::new(
            Arc::clone(&pending),
            Arc::clone(&stats),
            emitter,
            Duration::from_millis(200),
            Duration::from_secs(1),
        );
        (handler, pending, stats, reports)
    }

    fn drain_events(reports: &mut tokio::sync::mpsc::UnboundedReceiver<Report>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Report::Event(event)) = reports.try_recv() {
            lines.push(event.to_string());
        }
        lines
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_measures_from_dispatch() {
        let (handler, pending, stats, mut reports) = handler();
        pending.record(0, Instant::now());
        tokio::time::advance(Duration::from_millis(40)).await;

        assert!(handler.on_receipt(0, None));

        let stats = stats.snapshot();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.latencies, vec![Duration::from_millis(40)]);
        assert_eq!(
            drain_events(&mut reports),
            vec!["reply from 10.0.0.1: seq=0 time=40.000 ms"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_rtt_preferred() {
        let (handler, pending, stats, _reports) = handler();
        pending.record(0, Instant::now());
        tokio::time::advance(Duration::from_millis(40)).await;

        handler.on_receipt(0, Some(Duration::from_millis(35)));

        assert_eq!(stats.snapshot().latencies, vec![Duration::from_millis(35)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_after_window_is_timeout() {
        let (handler, pending, stats, mut reports) = handler();
        pending.record(0, Instant::now());
        pending.record(1, Instant::now());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(handler.on_receipt(0, Some(Duration::from_millis(5))));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(handler.on_receipt(1, Some(Duration::from_millis(5))));

        let stats = stats.snapshot();
        assert_eq!((stats.successes, stats.failures), (1, 1));
        assert_eq!(
            drain_events(&mut reports),
            vec![
                "reply from 10.0.0.1: seq=0 time=5.000 ms",
                "request timeout for 10.0.0.1: seq=1",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_after_resolution_is_not_counted() {
        let (handler, pending, stats, mut reports) = handler();
        pending.record(4, Instant::now());
        tokio::time::advance(Duration::from_millis(201)).await;
        assert_eq!(handler.expire_stale(), 1);

        assert!(!handler.on_receipt(4, Some(Duration::from_millis(3))));
        assert!(!handler.on_receipt_error(4, "host unreachable"));

        let stats = stats.snapshot();
        assert_eq!((stats.total, stats.successes, stats.failures), (1, 0, 1));
        assert_eq!(
            drain_events(&mut reports),
            vec!["request timeout for 10.0.0.1: seq=4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_are_throttled_but_counted() {
        let (handler, pending, stats, mut reports) = handler();
        for sequence in 0..4 {
            pending.record(sequence, Instant::now());
        }

        handler.on_receipt_error(0, "network unreachable");
        handler.on_receipt_error(1, "network unreachable");
        handler.on_receipt_error(2, "permission denied");
        tokio::time::advance(Duration::from_millis(1500)).await;
        handler.on_receipt_error(3, "permission denied");

        assert_eq!(stats.snapshot().failures, 4);
        assert_eq!(
            drain_events(&mut reports),
            vec![
                "probe to 10.0.0.1 failed: seq=0: network unreachable",
                "probe to 10.0.0.1 failed: seq=2: permission denied (1 repeated messages suppressed)",
                "probe to 10.0.0.1 failed: seq=3: permission denied",
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_flushes_outstanding_probes() {
        let (handler, pending, _stats, mut reports) = handler();
        pending.record(0, Instant::now());
        pending.record(1, Instant::now());
        handler.on_receipt(0, Some(Duration::from_millis(1)));

        let stats = handler.finish();

        assert_eq!((stats.total, stats.successes, stats.failures), (2, 1, 1));
        assert!(pending.is_empty());
        assert!(!handler.on_receipt(1, None));
        assert_eq!(
            drain_events(&mut reports)[1],
            "probe to 10.0.0.1 failed: seq=1: no reply before session end"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window() {
        let mut throttle = FailureThrottle::new(Duration::from_secs(1));
        let start = Instant::now();
        assert_eq!(throttle.admit("down", start), Some(0));
        assert_eq!(throttle.admit("down", start + Duration::from_millis(999)), None);
        assert_eq!(throttle.admit("down", start + Duration::from_millis(1000)), Some(1));
    }
}
