use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Span};

use crate::commands::Command;
use crate::config::Config;
use crate::endpoint::DeviceAddress;
use crate::error::{ErrorClass, WxError};
use crate::frame::{self, hex_dump, FRAME_HEADER};
use crate::record::{decode, Value};
use crate::retry::RetryPolicy;
use crate::schema::{ByteOrder, DISCOVERY};

/// A silent wait and a transient socket error are both worth another broadcast.
pub const DISCOVERY_RETRYABLE: &[ErrorClass] =
    &[ErrorClass::Transient, ErrorClass::DiscoveryFailed];

const MAX_DATAGRAM: usize = 1024;

/// What a console advertises in its discovery reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Console {
    pub address: DeviceAddress,
    pub mac: [u8; 6],
    pub ssid: String,
}

impl Console {
    #[must_use]
    pub fn mac_string(&self) -> String {
        self.mac
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Validate and interpret one discovery datagram.
///
/// # Errors
///
/// `WxError::ChecksumInvalid` on a bad trailing checksum, `WxError::Protocol` for a
/// truncated datagram or an unexpected header/command.
pub fn parse_discovery_reply(datagram: &[u8]) -> Result<Console, WxError> {
    let rec = decode(datagram, DISCOVERY, ByteOrder::Big);
    if !rec.is_complete() {
        return Err(WxError::Protocol(format!(
            "truncated discovery reply: {} bytes, {} of {} fields",
            datagram.len(),
            rec.decoded_fields(),
            rec.len()
        )));
    }
    let header = rec.get("header").and_then(Value::as_bytes);
    if header != Some(&FRAME_HEADER[..]) {
        return Err(WxError::Protocol(format!(
            "discovery reply with bad header: {}",
            hex_dump(&datagram[..2])
        )));
    }
    frame::verify_checksum(&datagram[..rec.consumed()])?;

    let opcode = Command::Discover.opcode()[0];
    if rec.get("command").and_then(Value::as_i64) != Some(i64::from(opcode)) {
        return Err(WxError::Protocol(format!(
            "unexpected command in discovery reply: {:?}",
            rec.get("command")
        )));
    }

    let field = |label: &str| {
        rec.get(label)
            .ok_or_else(|| WxError::Protocol(format!("discovery reply missing {label}")))
    };
    let mac: [u8; 6] = field("mac")?
        .as_bytes()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| WxError::Protocol("discovery mac is not 6 bytes".into()))?;
    let ip: [u8; 4] = field("ip")?
        .as_bytes()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| WxError::Protocol("discovery ip is not 4 bytes".into()))?;
    let port = field("port")?
        .as_i64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| WxError::Protocol("discovery port out of range".into()))?;
    let ssid = field("ssid")?.as_str().unwrap_or_default().to_string();

    Ok(Console {
        address: DeviceAddress::from_octets(ip, port),
        mac,
        ssid,
    })
}

/// Locates a console with the UDP discovery handshake.
pub struct DiscoveryClient {
    target: String,
    timeout: Duration,
    retry: RetryPolicy,
    span: Span,
}

impl DiscoveryClient {
    /// `target` is `"host:port"`; host may be a broadcast address.
    #[must_use]
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        let target = target.into();
        let span = info_span!("discovery", target = %target);
        Self {
            retry: RetryPolicy::new(5, DISCOVERY_RETRYABLE).with_span(span.clone()),
            target,
            timeout,
            span,
        }
    }

    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.discovery_target(), cfg.discovery_timeout()).with_retry(
            RetryPolicy::new(cfg.max_retries, DISCOVERY_RETRYABLE)
                .with_backoff(cfg.retry_backoff()),
        )
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.with_span(self.span.clone());
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.retry = self.retry.with_span(span.clone());
        self.span = span;
        self
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Address of the first console that answers with a valid reply.
    ///
    /// # Errors
    ///
    /// See [`DiscoveryClient::discover_console`].
    pub async fn discover(&self) -> Result<DeviceAddress, WxError> {
        self.discover_console().await.map(|c| c.address)
    }

    /// Broadcast the discovery command and wait for the first checksum-valid reply.
    ///
    /// The socket is bound once; each retry re-sends the command on it. The socket is
    /// closed before returning on every path.
    ///
    /// # Errors
    ///
    /// `WxError::DiscoveryFailed` when no valid reply arrives within the retry budget,
    /// `WxError::Config` for an unresolvable target, or socket setup errors.
    pub async fn discover_console(&self) -> Result<Console, WxError> {
        let remote = self.resolve().await?;
        let bind_addr = if remote.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        self.span.in_scope(|| info!(bind_addr, %remote, "opening udp socket"));
        let sock = UdpSocket::bind(bind_addr).await?;
        sock.set_broadcast(true)?;

        let packet = frame::encode(Command::Discover.opcode(), &[])?;
        let result = self
            .supervise(|attempt| {
                let sock = &sock;
                let packet = &packet;
                async move {
                    debug!(attempt, "sending discovery to {remote}");
                    log::debug!("[WX UDP send] {}", hex_dump(packet));
                    sock.send_to(packet, remote).await?;
                    self.await_reply(sock, attempt + 1).await
                }
            })
            .await;

        self.span.in_scope(|| info!("closing udp socket"));
        drop(sock);

        if let Ok(console) = &result {
            self.span.in_scope(|| {
                info!(
                    address = %console.address,
                    mac = %console.mac_string(),
                    ssid = %console.ssid,
                    "console discovered"
                );
            });
        }
        result
    }

    /// Run `attempt_once` under the retry policy. An exhausted `Transient` or
    /// `DiscoveryFailed` comes back as `DiscoveryFailed` carrying the real attempt count.
    async fn supervise<F, Fut>(&self, mut attempt_once: F) -> Result<Console, WxError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Console, WxError>>,
    {
        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .run("discovery", |attempt| {
                attempts.store(attempt + 1, Ordering::Relaxed);
                attempt_once(attempt)
            })
            .await;
        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Err(WxError::DiscoveryFailed { reason, .. }) => Err(self.failed(attempts, reason)),
            Err(WxError::Transient(e)) => Err(self.failed(attempts, e.to_string())),
            other => other,
        }
    }

    fn failed(&self, attempts: u32, reason: String) -> WxError {
        WxError::DiscoveryFailed {
            target: self.target.clone(),
            attempts,
            reason,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, WxError> {
        lookup_host(self.target.as_str())
            .await
            .map_err(|e| WxError::Config(format!("bad discovery target {}: {e}", self.target)))?
            .next()
            .ok_or_else(|| WxError::Config(format!("no address for {}", self.target)))
    }

    async fn await_reply(&self, sock: &UdpSocket, attempt: u32) -> Result<Console, WxError> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut rejected = 0usize;
        loop {
            let (n, src) = match timeout_at(deadline, sock.recv_from(&mut buf)).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(self.failed(
                        attempt,
                        format!(
                            "no valid reply within {:?} ({rejected} datagram(s) rejected)",
                            self.timeout
                        ),
                    ))
                }
            };
            let datagram = &buf[..n];
            log::debug!("[WX UDP recv] from {src}: {}", hex_dump(datagram));
            match parse_discovery_reply(datagram) {
                Ok(console) => return Ok(console),
                Err(e) => {
                    rejected += 1;
                    warn!(%src, error = %e, "discarding discovery datagram");
                    if matches!(e, WxError::ChecksumInvalid { .. }) {
                        // the checksum scheme is inferred; keep the raw bytes for diagnosis
                        log::warn!("[WX UDP bad checksum] from {src}: {}", hex_dump(datagram));
                    }
                }
            }
        }
    }
}
