use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::endpoint::DeviceAddress;
use crate::error::WxError;
use crate::frame::hex_dump;
use crate::retry::{RetryPolicy, TRANSIENT};

const READ_CHUNK: usize = 1024;

/// Seconds since the Unix epoch, as stamped on every sample of one reply.
#[must_use]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Bytes read from one request, stamped when reading stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub bytes: Vec<u8>,
    pub timestamp: i64,
    /// False when the read deadline cut the reply short.
    pub complete: bool,
}

/// One request/response exchange over TCP.
pub struct SessionClient {
    connect_timeout: Duration,
    read_deadline: Duration,
    settle_delay: Duration,
    retry: RetryPolicy,
    dump_on_error: bool,
    span: Span,
}

impl SessionClient {
    #[must_use]
    pub fn new(connect_timeout: Duration, read_deadline: Duration) -> Self {
        let span = info_span!("session");
        Self {
            connect_timeout,
            read_deadline,
            settle_delay: Duration::from_secs(2),
            retry: RetryPolicy::new(5, TRANSIENT).with_span(span.clone()),
            dump_on_error: false,
            span,
        }
    }

    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.connect_timeout(), cfg.read_deadline())
            .with_settle_delay(cfg.settle_delay())
            .with_retry(
                RetryPolicy::new(cfg.max_retries, TRANSIENT).with_backoff(cfg.retry_backoff()),
            )
            .with_dump_on_error(cfg.dump_on_error)
    }

    /// Pause between connect and write; the console's stack drops early writes.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry.with_span(self.span.clone());
        self
    }
    #[must_use]
    pub const fn with_dump_on_error(mut self, dump: bool) -> Self {
        self.dump_on_error = dump;
        self
    }
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.retry = self.retry.with_span(span.clone());
        self.span = span;
        self
    }

    /// Connect to `address`, send `frame` and read the reply.
    ///
    /// Only the connect is retried. Reading stops at end of stream, once `expect` bytes
    /// arrived, or at the read deadline; in the last case the partial reply is returned.
    ///
    /// # Errors
    ///
    /// `WxError::Transient` when every connect attempt timed out or was interrupted,
    /// `WxError::SessionFailed` for refused connections and write/read failures.
    pub async fn request(
        &self,
        address: &DeviceAddress,
        frame: &[u8],
        expect: Option<usize>,
    ) -> Result<Response, WxError> {
        let stream = self.connect(address).await?;
        self.exchange(stream, &address.addr(), frame, expect).await
    }

    /// Open the TCP connection, retrying transient failures.
    ///
    /// # Errors
    ///
    /// See [`SessionClient::request`].
    pub async fn connect(&self, address: &DeviceAddress) -> Result<TcpStream, WxError> {
        let addr = address.addr();
        self.retry
            .run("connect", |attempt| {
                let addr = addr.as_str();
                async move {
                    debug!(attempt, addr, "connecting");
                    self.connect_once(addr).await
                }
            })
            .await
    }

    async fn connect_once(&self, addr: &str) -> Result<TcpStream, WxError> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => {
                info!(addr, "connected");
                Ok(s)
            }
            Ok(Err(e)) => Err(WxError::session(addr, e)),
            Err(_) => Err(WxError::Transient(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out after {:?}", self.connect_timeout),
            ))),
        }
    }

    /// Send and read on an already established stream; the stream is closed before
    /// this returns.
    ///
    /// # Errors
    ///
    /// `WxError::SessionFailed` (or `Transient`) on a write or read failure.
    pub async fn exchange(
        &self,
        mut stream: TcpStream,
        peer: &str,
        frame: &[u8],
        expect: Option<usize>,
    ) -> Result<Response, WxError> {
        self.send(&mut stream, peer, frame).await?;
        self.read_reply(stream, peer, expect).await
    }

    /// Wait the settle delay, then write `frame` in full.
    ///
    /// # Errors
    ///
    /// `WxError::SessionFailed` (or `Transient`) when the write fails.
    pub async fn send(
        &self,
        stream: &mut TcpStream,
        peer: &str,
        frame: &[u8],
    ) -> Result<(), WxError> {
        async {
            if !self.settle_delay.is_zero() {
                debug!(delay = ?self.settle_delay, "settling before write");
                sleep(self.settle_delay).await;
            }
            info!(peer, bytes = frame.len(), "sending request");
            stream
                .write_all(frame)
                .await
                .map_err(|e| WxError::session(peer, e))?;
            log::debug!("[WX TCP send] {}", hex_dump(frame));
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Read until end of stream, `expect` bytes, or the read deadline, then close.
    ///
    /// # Errors
    ///
    /// `WxError::SessionFailed` (or `Transient`) when the read fails outright.
    pub async fn read_reply(
        &self,
        stream: TcpStream,
        peer: &str,
        expect: Option<usize>,
    ) -> Result<Response, WxError> {
        self.read_inner(stream, peer, expect)
            .instrument(self.span.clone())
            .await
    }

    async fn read_inner(
        &self,
        mut stream: TcpStream,
        peer: &str,
        expect: Option<usize>,
    ) -> Result<Response, WxError> {
        info!(peer, "awaiting response");
        let deadline = Instant::now() + self.read_deadline;
        let mut buf: Vec<u8> = Vec::new();
        let mut tmp = [0u8; READ_CHUNK];
        let complete = loop {
            if expect.is_some_and(|n| buf.len() >= n) {
                break true;
            }
            match timeout_at(deadline, stream.read(&mut tmp)).await {
                Ok(Ok(0)) => break true,
                Ok(Ok(n)) => buf.extend_from_slice(&tmp[..n]),
                Ok(Err(e)) => return Err(WxError::session(peer, e)),
                Err(_) => {
                    warn!(
                        peer,
                        received = buf.len(),
                        expected = ?expect,
                        "read deadline expired, using partial reply"
                    );
                    if self.dump_on_error {
                        log::warn!("[WX TCP partial] {}", hex_dump(&buf));
                    }
                    break false;
                }
            }
        };
        let timestamp = unix_timestamp();
        log::debug!("[WX TCP recv] {}", hex_dump(&buf));

        info!(peer, "closing client connection");
        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "shutdown after read");
        }
        Ok(Response {
            bytes: buf,
            timestamp,
            complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_recent() {
        // 2020-01-01
        assert!(unix_timestamp() > 1_577_836_800);
    }

    #[tokio::test]
    async fn refused_connect_is_not_retried_as_transient() {
        // bind then drop to get a port nobody listens on
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            l.local_addr().expect("addr").port()
        };
        let client = SessionClient::new(Duration::from_millis(500), Duration::from_millis(500))
            .with_settle_delay(Duration::ZERO);
        let err = client
            .request(&DeviceAddress::new("127.0.0.1", port), &[0x01], None)
            .await
            .expect_err("nothing listening");
        assert!(matches!(err, WxError::SessionFailed { .. }), "got {err}");
    }
}
