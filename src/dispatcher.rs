use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    pending::PendingTable, probe::Sequence, receipt::ReceiptHandler, transport::EchoTransport,
};

/// Sends one echo per interval until the count is reached or the token fires.
#[derive(Debug)]
pub(crate) struct Dispatcher<T> {
    transport: Arc<T>,
    pending: Arc<PendingTable>,
    handler: Arc<ReceiptHandler>,
    count: u64,
    interval: Duration,
}

impl<T: EchoTransport> Dispatcher<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        pending: Arc<PendingTable>,
        handler: Arc<ReceiptHandler>,
        count: u64,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            pending,
            handler,
            count,
            interval,
        }
    }

    /// Returns the number of probes sent.
    pub(crate) async fn run(&self, token: &CancellationToken) -> u64 {
        let mut sequence: Sequence = 0;
        while !token.is_cancelled() {
            // record before sending so a fast reply always finds its entry
            if !self.pending.record(sequence, Instant::now()) {
                warn!("seq={} is already pending, skipping", sequence);
            } else {
                debug!("sending echo seq={}", sequence);
                tokio::select! {
                    sent = self.transport.send_echo(sequence) => {
                        if let Err(err) = sent {
                            self.handler.on_receipt_error(sequence, &err.to_string());
                        }
                    }
                    // left pending, flushed as a failure at session end
                    _ = token.cancelled() => {
                        sequence += 1;
                        break;
                    }
                }
            }
            sequence += 1;
            if self.count > 0 && sequence >= self.count {
                break;
            }
            if !pause(self.interval, token).await {
                break;
            }
        }
        sequence
    }
}

/// Waits for `interval`, returning `false` if the token fired first.
///
/// A zero interval still yields once, so timers and signal handlers sharing
/// the runtime get to run between back-to-back probes.
pub(crate) async fn pause(interval: Duration, token: &CancellationToken) -> bool {
    if interval.is_zero() {
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_interrupted_by_cancellation() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel();
            })
        };
        let start = Instant::now();
        assert!(!pause(Duration::from_secs(3600), &token).await);
        assert_eq!(start.elapsed(), Duration::from_millis(10));
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_completes() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(pause(Duration::from_millis(250), &token).await);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert!(pause(Duration::ZERO, &token).await);
    }

    #[tokio::test]
    async fn test_zero_pause_lets_other_tasks_run() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move { token.cancel() })
        };
        let mut rounds = 0;
        while pause(Duration::ZERO, &token).await {
            rounds += 1;
            assert!(rounds < 1000, "spawned task never ran");
        }
        canceller.await.unwrap();
    }
}
