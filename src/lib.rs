//! Repeatedly probes a single target over ICMP echo or HTTP `HEAD`, measures
//! round-trip latency and keeps exact statistics, even when the run is
//! cancelled halfway.
//!
//! ## Example
//! Following example pings a host until interrupted (or until `--count`
//! probes resolved) and prints a summary table.
//! ```rust,no_run
#![doc = include_str!("../demos/probe.rs")]
//! ```
//! Custom transports can be plugged in through [`EchoTransport`] and
//! [`ProbeSession::run_with_transport`].

pub mod cancel;
pub mod config;
pub mod error;
pub mod http;
pub mod icmp;
pub mod pending;
pub mod probe;
pub mod receipt;
pub mod reporter;
pub mod session;
pub mod stats;
pub mod transport;

pub(crate) mod dispatcher;
pub(crate) mod sweeper;

pub use cancel::CancellationController;
pub use config::{ProbeConfig, ProbeConfigBuilder, Protocol};
pub use error::{Error, Result};
pub use http::HttpProber;
pub use icmp::IcmpTransport;
pub use pending::{PendingEntry, PendingTable};
pub use probe::{ProbeOutcome, ProbeResult, Sequence};
pub use receipt::ReceiptHandler;
pub use reporter::{ChannelReporter, NullReporter, ProbeEvent, Report, Reporter, Summary};
pub use session::ProbeSession;
pub use stats::{Stats, StatsAccumulator};
pub use transport::{EchoTransport, SocketKind};
