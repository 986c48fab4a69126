use std::sync::Arc;

use async_trait::async_trait;
use socket2::Type;

use crate::{error::Result, probe::Sequence, receipt::ReceiptHandler};

/// Sends echo requests and reports their replies.
///
/// A transport is registered with exactly one [`ReceiptHandler`] before the
/// first send. Replies are reported through
/// [`ReceiptHandler::on_receipt`], errors through
/// [`ReceiptHandler::on_receipt_error`]. A transport never reports a timeout,
/// unanswered probes are expired by the session.
#[async_trait]
pub trait EchoTransport: Send + Sync + 'static {
    fn register(&self, handler: Arc<ReceiptHandler>);

    /// Sends the echo request for `sequence`, returning once it is handed
    /// to the network. The reply arrives later through the handler.
    async fn send_echo(&self, sequence: Sequence) -> Result<()>;

    /// Releases the transport. Called once per session, further sends fail.
    fn stop(&self);
}

/// Kind of socket used for ICMP echo.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum SocketKind {
    /// `SOCK_RAW`, usually requires elevated privileges.
    Raw,
    /// Unprivileged ICMP datagram socket.
    Datagram,
}

impl SocketKind {
    /// Socket kinds to try on this platform, in order of preference.
    pub fn platform_preference() -> &'static [SocketKind] {
        if cfg!(target_os = "windows") {
            &[SocketKind::Raw]
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            &[SocketKind::Datagram, SocketKind::Raw]
        } else {
            &[SocketKind::Raw, SocketKind::Datagram]
        }
    }

    pub(crate) fn socket_type(&self) -> Type {
        match self {
            SocketKind::Raw => Type::RAW,
            SocketKind::Datagram => Type::DGRAM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_preference_not_empty() {
        let preference = SocketKind::platform_preference();
        assert!(!preference.is_empty());
        if cfg!(target_os = "linux") {
            assert_eq!(preference, &[SocketKind::Raw, SocketKind::Datagram]);
        }
    }
}
