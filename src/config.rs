use std::{fmt, str::FromStr, time::Duration};

use crate::error::{Error, Result};

/// Interval between dispatched probes unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
/// Client-side timeout of a single HTTP probe.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Period of the timeout sweep, independent of the probe interval.
pub const DEFAULT_SWEEP_TICK: Duration = Duration::from_millis(100);
/// Window in which repeated failure messages are folded into one.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(1);
/// The timeout window is this multiple of the probe interval, floored at the
/// sweep tick.
pub const TIMEOUT_INTERVAL_FACTOR: u32 = 2;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum Protocol {
    #[default]
    Icmp,
    Http,
}

impl Protocol {
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Icmp => "ICMP",
            Protocol::Http => "HTTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "http" => Ok(Protocol::Http),
            _ => Err(Error::InvalidProtocol(s.to_string())),
        }
    }
}

/// Immutable parameters of one probing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    target: String,
    protocol: Protocol,
    count: u64,
    interval: Duration,
    timeout: Duration,
    http_timeout: Duration,
    sweep_tick: Duration,
    throttle_window: Duration,
}

impl ProbeConfig {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Number of probes to send, `0` means until cancelled.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Age after which an unanswered ICMP probe is declared timed out.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn sweep_tick(&self) -> Duration {
        self.sweep_tick
    }

    pub fn throttle_window(&self) -> Duration {
        self.throttle_window
    }

    pub(crate) fn is_unbounded(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfigBuilder {
    target: String,
    protocol: Protocol,
    count: u64,
    interval: Duration,
    timeout: Option<Duration>,
    http_timeout: Duration,
    sweep_tick: Duration,
    throttle_window: Duration,
}

impl ProbeConfigBuilder {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.into(),
            protocol: Protocol::default(),
            count: 0,
            interval: DEFAULT_INTERVAL,
            timeout: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            sweep_tick: DEFAULT_SWEEP_TICK,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the timeout window, which otherwise follows the interval.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_sweep_tick(mut self, tick: Duration) -> Self {
        self.sweep_tick = tick;
        self
    }

    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// # Errors
    /// Returns [`Error::EmptyTarget`] if the target is blank.
    pub fn build(self) -> Result<ProbeConfig> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(Error::EmptyTarget);
        }
        // a zero period would make the sweeper's interval panic
        let sweep_tick = self.sweep_tick.max(Duration::from_millis(1));
        // a derived window is at least one sweep tick
        let timeout = self.timeout.unwrap_or_else(|| {
            self.interval
                .saturating_mul(TIMEOUT_INTERVAL_FACTOR)
                .max(sweep_tick)
        });
        Ok(ProbeConfig {
            target: target.to_string(),
            protocol: self.protocol,
            count: self.count,
            interval: self.interval,
            timeout,
            http_timeout: self.http_timeout,
            sweep_tick,
            throttle_window: self.throttle_window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProbeConfigBuilder::new("8.8.8.8").build().unwrap();
        assert_eq!(config.protocol(), Protocol::Icmp);
        assert_eq!(config.count(), 0);
        assert_eq!(config.interval(), DEFAULT_INTERVAL);
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert_eq!(config.http_timeout(), DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn test_timeout_follows_interval() {
        let config = ProbeConfigBuilder::new("10.0.0.1")
            .with_interval(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(500));

        let config = ProbeConfigBuilder::new("10.0.0.1")
            .with_interval(Duration::from_millis(250))
            .with_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_interval_keeps_a_timeout_window() {
        let config = ProbeConfigBuilder::new("10.0.0.1")
            .with_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.timeout(), DEFAULT_SWEEP_TICK);

        let config = ProbeConfigBuilder::new("10.0.0.1")
            .with_interval(Duration::ZERO)
            .with_timeout(Duration::from_millis(5))
            .build()
            .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(5));
    }

    #[test]
    fn test_huge_interval_saturates_timeout() {
        let config = ProbeConfigBuilder::new("10.0.0.1")
            .with_interval(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(config.interval(), Duration::MAX);
        assert_eq!(config.timeout(), Duration::MAX);
    }

    #[test]
    fn test_blank_target_rejected() {
        assert!(matches!(
            ProbeConfigBuilder::new("   ").build(),
            Err(Error::EmptyTarget)
        ));
        assert!(matches!(
            ProbeConfigBuilder::new("").build(),
            Err(Error::EmptyTarget)
        ));
    }

    #[test]
    fn test_target_trimmed() {
        let config = ProbeConfigBuilder::new("  example.com\n").build().unwrap();
        assert_eq!(config.target(), "example.com");
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("icmp".parse::<Protocol>().unwrap(), Protocol::Icmp);
        assert_eq!("HTTP".parse::<Protocol>().unwrap(), Protocol::Http);
        assert!(matches!(
            "tcp".parse::<Protocol>(),
            Err(Error::InvalidProtocol(p)) if p == "tcp"
        ));
        assert_eq!(Protocol::Http.to_string(), "HTTP");
    }
}
