//! HTTP probing.
//!
//! Each probe is a `HEAD` request whose outcome is known before the next one
//! is sent, so this strategy never tracks pending probes. It shares the
//! counters, reporting and cancellation of the echo strategy.

use std::time::Duration;

use log::debug;
use reqwest::Client;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::pause,
    error::{Error, Result},
    probe::{ProbeResult, Sequence},
    receipt::ReceiptHandler,
};

#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    url: String,
}

impl HttpProber {
    /// Builds a prober for `target`, prefixing `http://` when no scheme is given.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        // a proxy in between would be measured instead of the target
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| {
                Error::Opaque(format!("failed to build HTTP client, reason: {}", err).into())
            })?;
        Ok(Self {
            client,
            url: target_url(target),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one `HEAD` request, returning its latency or why it failed.
    pub async fn probe(&self) -> std::result::Result<Duration, String> {
        let start = Instant::now();
        match self.client.head(&self.url).send().await {
            Ok(response) if response.status().is_success() => Ok(start.elapsed()),
            Ok(response) => Err(format!("unexpected status {}", response.status())),
            Err(err) if err.is_timeout() => Err("request timed out".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }
}

fn target_url(target: &str) -> String {
    let target = target.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// Probes until `count` requests completed (forever if zero) or the token fires.
///
/// Returns the number of probes sent.
pub(crate) async fn run(
    prober: &HttpProber,
    handler: &ReceiptHandler,
    count: u64,
    interval: Duration,
    token: &CancellationToken,
) -> u64 {
    let mut sequence: Sequence = 0;
    while !token.is_cancelled() {
        debug!("sending HEAD {} seq={}", prober.url(), sequence);
        tokio::select! {
            outcome = prober.probe() => match outcome {
                Ok(latency) => handler.record(ProbeResult::success(sequence, latency), None),
                Err(reason) => handler.record(ProbeResult::failure(sequence), Some(reason)),
            },
            _ = token.cancelled() => {
                handler.record(
                    ProbeResult::failure(sequence),
                    Some("cancelled while awaiting response".to_string()),
                );
                sequence += 1;
                break;
            }
        }
        sequence += 1;
        if count > 0 && sequence >= count {
            break;
        }
        if !pause(interval, token).await {
            break;
        }
    }
    sequence
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Serves every connection with the given status line until the task is dropped.
    pub(crate) async fn serve(status: &'static str) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0; 1024];
                    let mut request = Vec::new();
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        status
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (addr.to_string(), handle)
    }

    #[test]
    fn test_target_url() {
        assert_eq!(target_url("example.com"), "http://example.com");
        assert_eq!(target_url("10.0.0.1:8080"), "http://10.0.0.1:8080");
        assert_eq!(target_url("https://example.com/health"), "https://example.com/health");
    }

    #[tokio::test]
    async fn test_probe_success() {
        let (addr, server) = serve("204 No Content").await;
        let prober = HttpProber::new(&addr, Duration::from_secs(5)).unwrap();
        assert!(prober.probe().await.is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn test_probe_non_success_status() {
        let (addr, server) = serve("503 Service Unavailable").await;
        let prober = HttpProber::new(&addr, Duration::from_secs(5)).unwrap();
        let reason = prober.probe().await.unwrap_err();
        assert!(reason.contains("503"), "{}", reason);
        server.abort();
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        // bind and drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let prober = HttpProber::new(&addr.to_string(), Duration::from_secs(5)).unwrap();
        assert!(prober.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and never answer
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let prober = HttpProber::new(&addr.to_string(), Duration::from_millis(200)).unwrap();
        assert_eq!(prober.probe().await.unwrap_err(), "request timed out");
        server.abort();
    }
}
