use std::{fmt, io::Write, sync::Arc, time::Duration};

use log::warn;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    config::Protocol,
    probe::{ProbeOutcome, ProbeResult},
    stats::Stats,
};

/// One per-probe message handed to the [`Reporter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeEvent {
    pub target: Arc<str>,
    pub result: ProbeResult,
    /// Why the probe failed, when the transport said so.
    pub detail: Option<String>,
    /// Identical failure messages folded into this one.
    pub suppressed: usize,
}

impl fmt::Display for ProbeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sequence = self.result.sequence;
        match self.result.outcome {
            ProbeOutcome::Success => {
                let latency = self.result.latency.unwrap_or_default();
                write!(
                    f,
                    "reply from {}: seq={} time={:.3} ms",
                    self.target,
                    sequence,
                    latency.as_secs_f64() * 1000.0
                )
            }
            ProbeOutcome::Timeout => {
                write!(f, "request timeout for {}: seq={}", self.target, sequence)
            }
            ProbeOutcome::Failure => {
                write!(f, "probe to {} failed: seq={}", self.target, sequence)?;
                if let Some(detail) = &self.detail {
                    write!(f, ": {}", detail)?;
                }
                if self.suppressed > 0 {
                    write!(f, " ({} repeated messages suppressed)", self.suppressed)?;
                }
                Ok(())
            }
        }
    }
}

/// Final values of a finished session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub target: String,
    pub protocol: Protocol,
    pub interval: Duration,
    pub stats: Stats,
}

impl Summary {
    pub fn protocol_label(&self) -> &'static str {
        self.protocol.label()
    }
}

/// Receives everything a session has to tell, possibly from several tasks at once.
pub trait Reporter: Send + Sync {
    fn on_event(&self, event: &ProbeEvent);

    fn on_summary(&self, _summary: &Summary) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_event(&self, _event: &ProbeEvent) {}
}

#[derive(Debug)]
pub enum Report {
    Event(ProbeEvent),
    Summary(Summary),
}

/// Forwards every report over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<Report>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Report>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Reporter for ChannelReporter {
    fn on_event(&self, event: &ProbeEvent) {
        // a dropped receiver only means nobody is listening anymore
        let _ = self.sender.send(Report::Event(event.clone()));
    }

    fn on_summary(&self, summary: &Summary) {
        let _ = self.sender.send(Report::Summary(summary.clone()));
    }
}

pub(crate) type LogSink = Box<dyn Write + Send>;

/// Delivers events to the reporter and mirrors them into the optional log sink.
pub(crate) struct Emitter {
    target: Arc<str>,
    reporter: Arc<dyn Reporter>,
    sink: Option<Mutex<LogSink>>,
}

impl Emitter {
    pub(crate) fn new(target: &str, reporter: Arc<dyn Reporter>, sink: Option<LogSink>) -> Self {
        Self {
            target: target.into(),
            reporter,
            sink: sink.map(Mutex::new),
        }
    }

    pub(crate) fn emit(&self, result: ProbeResult, detail: Option<String>, suppressed: usize) {
        let event = ProbeEvent {
            target: Arc::clone(&self.target),
            result,
            detail,
            suppressed,
        };
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock();
            if let Err(err) = writeln!(sink, "{}", event).and_then(|_| sink.flush()) {
                warn!("failed to write to log sink, reason: {}", err);
            }
        }
        self.reporter.on_event(&event);
    }

    pub(crate) fn summary(&self, summary: &Summary) {
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock();
            let stats = &summary.stats;
            if let Err(err) = writeln!(
                sink,
                "--- {} {} statistics: {} sent, {} ok, {} failed ---",
                summary.target,
                summary.protocol_label(),
                stats.total,
                stats.successes,
                stats.failures
            )
            .and_then(|_| sink.flush())
            {
                warn!("failed to write to log sink, reason: {}", err);
            }
        }
        self.reporter.on_summary(summary);
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("target", &self.target)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}
