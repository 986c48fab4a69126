use std::{sync::Arc, time::Duration};

use log::trace;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::receipt::ReceiptHandler;

/// Expires probes that stayed unanswered longer than the timeout window.
#[derive(Debug)]
pub(crate) struct TimeoutSweeper {
    handler: Arc<ReceiptHandler>,
    tick: Duration,
}

impl TimeoutSweeper {
    pub(crate) fn new(handler: Arc<ReceiptHandler>, tick: Duration) -> Self {
        Self { handler, tick }
    }

    pub(crate) async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.sweep(),
            }
        }
    }

    fn sweep(&self) {
        let expired = self.handler.expire_stale();
        trace!("sweep expired {} probes", expired);
    }
}
