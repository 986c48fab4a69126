use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::EchoTransport;

/// Single stop switch of a session.
///
/// Every component of a session watches the controller's token. The first
/// [`CancellationController::stop`] cancels it, later calls do nothing. A
/// controller created with [`CancellationController::linked`] also stops
/// when the parent token is cancelled, without ever cancelling the parent.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests a stop. Returns `true` only for the call that fired it.
    pub fn stop(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let already_cancelled = self.token.is_cancelled();
        self.token.cancel();
        !already_cancelled
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    /// Stops the controller once `deadline` has elapsed, unless it stops earlier.
    pub fn stop_after(&self, deadline: Duration) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    if controller.stop() {
                        debug!("deadline of {:?} reached", deadline);
                    }
                }
                _ = controller.stopped() => {}
            }
        })
    }

    /// Calls [`EchoTransport::stop`] once the controller stops.
    pub(crate) fn attach<T: EchoTransport>(&self, transport: Arc<T>) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            transport.stop();
        })
    }
}
