use std::{fmt, future::Future, io::Write, sync::Arc, time::Duration};

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    cancel::CancellationController,
    config::{ProbeConfig, Protocol},
    dispatcher::Dispatcher,
    error::Result,
    http::{self, HttpProber},
    icmp::IcmpTransport,
    pending::PendingTable,
    receipt::ReceiptHandler,
    reporter::{Emitter, LogSink, Reporter, Summary},
    stats::StatsAccumulator,
    sweeper::TimeoutSweeper,
    transport::EchoTransport,
};

/// One run of probes against a single target.
///
/// The session owns everything the run needs and returns the final
/// [`Summary`] once the configured number of probes resolved or the run was
/// cancelled. Cancellation is not an error, a cancelled run still yields a
/// summary in which every sent probe is counted exactly once.
///
/// # Example
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use async_ping::{ChannelReporter, ProbeConfigBuilder, ProbeSession};
///
/// tokio_test::block_on(async {
///     let config = ProbeConfigBuilder::new("127.0.0.1")
///         .with_count(3)
///         .with_interval(Duration::from_millis(200))
///         .build()
///         .unwrap();
///     let (reporter, _reports) = ChannelReporter::new();
///     let summary = ProbeSession::new(config, Arc::new(reporter))
///         .run()
///         .await
///         .unwrap();
///     assert_eq!(summary.stats.total, summary.stats.successes + summary.stats.failures);
/// })
/// ```
pub struct ProbeSession {
    config: ProbeConfig,
    reporter: Arc<dyn Reporter>,
    controller: CancellationController,
    deadline: Option<Duration>,
    log_sink: Option<LogSink>,
}

impl ProbeSession {
    pub fn new(config: ProbeConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            reporter,
            controller: CancellationController::new(),
            deadline: None,
            log_sink: None,
        }
    }

    /// Stops the session when `token` is cancelled. Replaces the session's
    /// controller, so call it before [`ProbeSession::controller`].
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.controller = CancellationController::linked(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Mirrors every reported line into `sink`. Write errors are logged and ignored.
    pub fn with_log_sink<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.log_sink = Some(Box::new(sink));
        self
    }

    /// Handle to stop the session from elsewhere.
    pub fn controller(&self) -> CancellationController {
        self.controller.clone()
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Runs the session with the transport matching the configured protocol.
    ///
    /// # Errors
    /// Returns an error if the transport cannot be opened. Nothing is sent in
    /// that case.
    pub async fn run(self) -> Result<Summary> {
        match self.config.protocol() {
            Protocol::Icmp => {
                let transport = IcmpTransport::new(self.config.target(), self.config.timeout())?;
                self.run_with_transport(transport).await
            }
            Protocol::Http => {
                let prober = HttpProber::new(self.config.target(), self.config.http_timeout())?;
                self.run_http(prober).await
            }
        }
    }

    /// Runs the echo strategy over the given transport.
    pub async fn run_with_transport<T: EchoTransport>(self, transport: T) -> Result<Summary> {
        let Self {
            config,
            reporter,
            controller,
            deadline,
            log_sink,
        } = self;
        let parts = Parts::new(&config, reporter, log_sink);
        let transport = Arc::new(transport);
        transport.register(Arc::clone(&parts.handler));

        info!(
            "probing {} over ICMP, count={}, interval={:?}, timeout={:?}",
            config.target(),
            config.count(),
            config.interval(),
            config.timeout()
        );
        let mut task_spawner = BackgroundTaskSpawner::new(controller.token());
        task_spawner.track(controller.attach(Arc::clone(&transport)));
        if let Some(deadline) = deadline {
            task_spawner.track(controller.stop_after(deadline));
        }
        task_spawner.spawn(
            TimeoutSweeper::new(Arc::clone(&parts.handler), config.sweep_tick())
                .run(controller.token()),
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&parts.pending),
            Arc::clone(&parts.handler),
            config.count(),
            config.interval(),
        );
        let sent = dispatcher.run(&controller.token()).await;
        if !config.is_unbounded() {
            tokio::select! {
                _ = parts.pending.drained() => {}
                _ = controller.stopped() => {}
            }
        }

        controller.stop();
        task_spawner.join().await;
        Ok(parts.finish(&config, Protocol::Icmp, sent))
    }

    async fn run_http(self, prober: HttpProber) -> Result<Summary> {
        let Self {
            config,
            reporter,
            controller,
            deadline,
            log_sink,
        } = self;
        let parts = Parts::new(&config, reporter, log_sink);

        info!(
            "probing {} over HTTP, count={}, interval={:?}",
            prober.url(),
            config.count(),
            config.interval()
        );
        let mut task_spawner = BackgroundTaskSpawner::new(controller.token());
        if let Some(deadline) = deadline {
            task_spawner.track(controller.stop_after(deadline));
        }

        let sent = http::run(
            &prober,
            &parts.handler,
            config.count(),
            config.interval(),
            &controller.token(),
        )
        .await;

        controller.stop();
        task_spawner.join().await;
        Ok(parts.finish(&config, Protocol::Http, sent))
    }
}

impl fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeSession")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Shared state of one run.
struct Parts {
    pending: Arc<PendingTable>,
    handler: Arc<ReceiptHandler>,
    emitter: Arc<Emitter>,
}

impl Parts {
    fn new(config: &ProbeConfig, reporter: Arc<dyn Reporter>, log_sink: Option<LogSink>) -> Self {
        let pending = Arc::new(PendingTable::new());
        let emitter = Arc::new(Emitter::new(config.target(), reporter, log_sink));
        let handler = Arc::new(ReceiptHandler::new(
            Arc::clone(&pending),
            Arc::new(StatsAccumulator::new()),
            Arc::clone(&emitter),
            config.timeout(),
            config.throttle_window(),
        ));
        Self {
            pending,
            handler,
            emitter,
        }
    }

    fn finish(self, config: &ProbeConfig, protocol: Protocol, sent: u64) -> Summary {
        let stats = self.handler.finish();
        if stats.total != sent {
            warn!("sent {} probes but resolved {}", sent, stats.total);
        }
        info!(
            "finished probing {}: {} sent, {} ok, {} failed",
            config.target(),
            stats.total,
            stats.successes,
            stats.failures
        );
        let summary = Summary {
            target: config.target().to_string(),
            protocol,
            interval: config.interval(),
            stats,
        };
        self.emitter.summary(&summary);
        summary
    }
}

/// Owns the background tasks of a session and cancels them if dropped early.
#[derive(Debug)]
struct BackgroundTaskSpawner {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTaskSpawner {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::task::spawn(async move {
            tokio::select! {
                _ = task => {},
                _ = token.cancelled() => {}
            }
        });
        self.handles.push(handle);
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Waits for every task. The token must have been cancelled before.
    async fn join(mut self) {
        for handle in std::mem::take(&mut self.handles) {
            if let Err(err) = handle.await {
                warn!("background task failed: {}", err);
            }
        }
    }
}

impl Drop for BackgroundTaskSpawner {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.token.cancel();
        }
    }
}
