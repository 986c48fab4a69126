use std::time::Duration;
use tokio::time::Instant;

/// Per-session probe identifier, starting at zero.
pub type Sequence = u64;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ProbeOutcome {
    Success,
    Failure,
    Timeout,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ProbeResult {
    pub sequence: Sequence,
    pub outcome: ProbeOutcome,
    /// Present only for [`ProbeOutcome::Success`].
    pub latency: Option<Duration>,
    pub timestamp: Instant,
}

impl ProbeResult {
    pub fn success(sequence: Sequence, latency: Duration) -> Self {
        Self {
            sequence,
            outcome: ProbeOutcome::Success,
            latency: Some(latency),
            timestamp: Instant::now(),
        }
    }

    pub fn failure(sequence: Sequence) -> Self {
        Self::unanswered(sequence, ProbeOutcome::Failure)
    }

    pub fn timeout(sequence: Sequence) -> Self {
        Self::unanswered(sequence, ProbeOutcome::Timeout)
    }

    fn unanswered(sequence: Sequence, outcome: ProbeOutcome) -> Self {
        Self {
            sequence,
            outcome,
            latency: None,
            timestamp: Instant::now(),
        }
    }
}
