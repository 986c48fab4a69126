use std::{
    fmt,
    net::IpAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    probe::Sequence,
    receipt::ReceiptHandler,
    transport::{EchoTransport, SocketKind},
};

/// Echo payload size of a standard ping.
const PAYLOAD_SIZE: usize = 56;
const PAYLOAD: [u8; PAYLOAD_SIZE] = [0; PAYLOAD_SIZE];

/// ICMP echo transport backed by a `surge-ping` client.
///
/// Every echo is awaited in its own task, so replies are delivered to the
/// [`ReceiptHandler`] in whatever order the network returns them.
pub struct IcmpTransport {
    client: Client,
    target: IpAddr,
    identifier: PingIdentifier,
    reply_timeout: Duration,
    kind: SocketKind,
    handler: OnceLock<Arc<ReceiptHandler>>,
    token: CancellationToken,
}

impl IcmpTransport {
    /// Opens an ICMP socket towards `target`, trying the socket kinds of
    /// [`SocketKind::platform_preference`] in order.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTarget`] if `target` is not an IP address and an
    /// opaque error if no socket kind can be opened.
    pub fn new(target: &str, reply_timeout: Duration) -> Result<Self> {
        let ip = parse_target(target)?;
        let mut last_err = None;
        for kind in SocketKind::platform_preference() {
            match Self::with_socket_kind(ip, reply_timeout, *kind) {
                Ok(transport) => {
                    debug!("opened {:?} ICMP socket for {}", transport.socket_kind(), ip);
                    return Ok(transport);
                }
                Err(err) => {
                    debug!("cannot open {:?} ICMP socket: {}", kind, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::Opaque("no ICMP socket kind available".into())))
    }

    /// Opens an ICMP socket of the given kind.
    pub fn with_socket_kind(target: IpAddr, reply_timeout: Duration, kind: SocketKind) -> Result<Self> {
        let builder = Config::builder().sock_type_hint(kind.socket_type());
        let config = match target {
            IpAddr::V4(_) => builder.build(),
            IpAddr::V6(_) => builder.kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(|err| {
            Error::Opaque(format!("failed to open {:?} ICMP socket, reason: {}", kind, err).into())
        })?;
        Ok(Self {
            client,
            target,
            identifier: PingIdentifier(std::process::id() as u16),
            reply_timeout,
            kind,
            handler: OnceLock::new(),
            token: CancellationToken::new(),
        })
    }

    pub fn socket_kind(&self) -> SocketKind {
        self.kind
    }
}

fn parse_target(target: &str) -> Result<IpAddr> {
    target
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(target.to_string()))
}

#[async_trait]
impl EchoTransport for IcmpTransport {
    fn register(&self, handler: Arc<ReceiptHandler>) {
        if self.handler.set(handler).is_err() {
            warn!("receipt handler already registered, keeping the first one");
        }
    }

    async fn send_echo(&self, sequence: Sequence) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::TransportStopped);
        }
        let handler = self
            .handler
            .get()
            .cloned()
            .ok_or_else(|| Error::Opaque("no receipt handler registered".into()))?;
        let mut pinger = self.client.pinger(self.target, self.identifier).await;
        pinger.timeout(self.reply_timeout);
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                reply = pinger.ping(PingSequence(sequence as u16), &PAYLOAD) => match reply {
                    Ok((_, rtt)) => {
                        handler.on_receipt(sequence, Some(rtt));
                    }
                    // expiry belongs to the sweeper
                    Err(SurgeError::Timeout { .. }) => debug!("no echo reply for seq={}", sequence),
                    Err(err) => {
                        handler.on_receipt_error(sequence, &err.to_string());
                    }
                },
                _ = token.cancelled() => {}
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.token.cancel();
    }
}

impl fmt::Debug for IcmpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcmpTransport")
            .field("target", &self.target)
            .field("identifier", &self.identifier.0)
            .field("reply_timeout", &self.reply_timeout)
            .field("kind", &self.kind)
            .field("stopped", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
