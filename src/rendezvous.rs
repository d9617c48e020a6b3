//! Legacy console rendezvous.
//!
//! The client broadcasts a search packet and listens; the console opens the TCP
//! connection back to the client. The listener is bound once, before the search goes
//! out, and only the accept is retried.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, info_span, Span};

use crate::config::Config;
use crate::error::WxError;
use crate::frame::hex_dump;
use crate::record::{encode_fields, Value};
use crate::retry::{RetryPolicy, TRANSIENT};
use crate::schema::{ByteOrder, LEGACY_COMMAND};

const LEGACY_HEAD: &str = "PC2000";
const LISTEN_BACKLOG: u32 = 5;

fn legacy_packet(cmd: &str, table: &str) -> Result<Vec<u8>, WxError> {
    encode_fields(
        &[
            Value::Text(LEGACY_HEAD.into()),
            Value::Text(cmd.into()),
            Value::Text(table.into()),
            Value::Int(0),
            Value::Int(0),
        ],
        LEGACY_COMMAND,
        ByteOrder::Native,
    )
}

/// 40-byte `SEARCH` broadcast.
///
/// # Errors
///
/// Only if the legacy command layout cannot hold the packet.
pub fn search_packet() -> Result<Vec<u8>, WxError> {
    legacy_packet("SEARCH", "")
}

/// 40-byte `READ <table>` request, e.g. `NOWRECORD`.
///
/// # Errors
///
/// `WxError::InvalidFrame` when `table` is longer than 16 bytes.
pub fn read_packet(table: &str) -> Result<Vec<u8>, WxError> {
    legacy_packet("READ", table)
}

/// Send one search datagram to `target` (`host:port`) and close the socket.
///
/// # Errors
///
/// `WxError::Config` for an unresolvable target, otherwise socket errors.
pub async fn send_search(target: &str) -> Result<(), WxError> {
    let remote = lookup_host(target)
        .await
        .map_err(|e| WxError::Config(format!("bad search target {target}: {e}")))?
        .next()
        .ok_or_else(|| WxError::Config(format!("no address for {target}")))?;
    let bind_addr = if remote.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    info!(%remote, "opening udp socket");
    let sock = UdpSocket::bind(bind_addr).await?;
    sock.set_broadcast(true)?;
    let packet = search_packet()?;
    info!(%remote, "sending search broadcast");
    log::debug!("[WX UDP send] {}", hex_dump(&packet));
    let sent = sock.send_to(&packet, remote).await;
    info!("closing udp socket");
    drop(sock);
    sent?;
    Ok(())
}

/// Listener the console dials back into.
pub struct Rendezvous {
    listener: TcpListener,
    accept_wait: Duration,
    retry: RetryPolicy,
    span: Span,
}

impl Rendezvous {
    /// Bind and listen on `addr` with address reuse enabled.
    ///
    /// # Errors
    ///
    /// Socket setup errors, e.g. the port is already taken.
    pub fn bind(addr: SocketAddr, accept_wait: Duration) -> Result<Self, WxError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        Ok(Self::from_listener(listener, accept_wait))
    }

    /// Bind `0.0.0.0:listen_port` with the configured accept wait and retry budget.
    ///
    /// # Errors
    ///
    /// See [`Rendezvous::bind`].
    pub fn from_config(cfg: &Config) -> Result<Self, WxError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
        Ok(Self::bind(addr, cfg.accept_wait())?.with_retry(
            RetryPolicy::new(cfg.max_retries, TRANSIENT).with_backoff(cfg.retry_backoff()),
        ))
    }

    #[must_use]
    pub fn from_listener(listener: TcpListener, accept_wait: Duration) -> Self {
        let span = info_span!("rendezvous");
        Self {
            listener,
            accept_wait,
            retry: RetryPolicy::new(5, TRANSIENT).with_span(span.clone()),
            span,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.with_span(self.span.clone());
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.retry = std::mem::take(&mut self.retry).with_span(span.clone());
        self.span = span;
        self
    }

    /// # Errors
    ///
    /// Propagates the OS error.
    pub fn local_addr(&self) -> Result<SocketAddr, WxError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the console's inbound connection. A wait longer than `accept_wait`
    /// counts as a transient failure and is retried.
    ///
    /// # Errors
    ///
    /// `WxError::Transient` once the retry budget is spent, or a non-transient accept error.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), WxError> {
        self.retry
            .run("accept", |attempt| async move {
                debug!(attempt, "waiting for console connection");
                match timeout(self.accept_wait, self.listener.accept()).await {
                    Ok(Ok((stream, peer))) => {
                        info!(%peer, "accepted connection");
                        Ok((stream, peer))
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(WxError::Transient(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no console connection within {:?}", self.accept_wait),
                    ))),
                }
            })
            .await
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        self.span.in_scope(|| info!("closing server"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_packet_layout() {
        let p = read_packet("NOWRECORD").expect("packet");
        assert_eq!(p.len(), 40);
        assert_eq!(&p[8..12], b"READ");
        assert_eq!(&p[16..25], b"NOWRECORD");
        assert!(read_packet("A_TABLE_NAME_TOO_LONG").is_err());
    }

    #[tokio::test]
    async fn accept_gives_up_after_budget() {
        let rv = Rendezvous::bind("127.0.0.1:0".parse().expect("addr"), Duration::from_millis(20))
            .expect("bind")
            .with_retry(RetryPolicy::new(2, TRANSIENT));
        let started = std::time::Instant::now();
        let err = rv.accept().await.expect_err("nobody dials in");
        assert!(matches!(err, WxError::Transient(_)));
        // three waits of 20ms
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn caller_span_keeps_retry_budget() {
        let rv = Rendezvous::bind("127.0.0.1:0".parse().expect("addr"), Duration::from_millis(500))
            .expect("bind")
            .with_retry(RetryPolicy::new(1, TRANSIENT))
            .with_span(info_span!("station", name = "backyard"));
        let addr = rv.local_addr().expect("local addr");
        let dial = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (_stream, peer) = rv.accept().await.expect("console dials in");
        assert_eq!(peer.ip(), addr.ip());
        dial.await.expect("join").expect("connect");
    }
}
