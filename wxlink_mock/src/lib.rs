//! Fake console for exercising wxlink clients without hardware.
//!
//! One `MockConsole` can answer discovery datagrams, serve TCP record requests and dial
//! back into a legacy rendezvous listener. Misbehavior is scripted through
//! [`ConsoleProfile`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use wxlink::commands::Command;
use wxlink::frame::{self, FRAME_HEADER};
use wxlink::record::{encode_fields, Value};
use wxlink::schema::{ByteOrder, DISCOVERY, LEGACY_COMMAND, LIVE_DATA, RAIN_DATA};

const MAX_REQUEST: usize = 256;
const CORRUPT_PER_POLL: usize = 8;

/// Values the console reports in its live record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveReading {
    pub wind_direction: u16,
    pub humidity_indoor: u8,
    pub humidity_outdoor: u8,
    pub temperature_indoor: f32,
    pub pressure_absolute: f32,
    pub pressure_relative: f32,
    pub temperature_outdoor: f32,
    pub dewpoint: f32,
    pub windchill: f32,
    pub wind_average: f32,
    pub wind_gust: f32,
    pub rain_hourly: f32,
    pub rain_daily: f32,
    pub rain_weekly: f32,
    pub rain_monthly: f32,
    pub rain_yearly: f32,
    pub solar_radiation: f32,
    pub uv_index: u8,
}

impl Default for LiveReading {
    fn default() -> Self {
        Self {
            wind_direction: 255,
            humidity_indoor: 43,
            humidity_outdoor: 77,
            temperature_indoor: 64.9,
            pressure_absolute: 29.232,
            pressure_relative: 29.5,
            temperature_outdoor: 46.0,
            dewpoint: 39.2,
            windchill: 46.0,
            wind_average: 0.0,
            wind_gust: 1.3,
            rain_hourly: 0.0,
            rain_daily: 0.028,
            rain_weekly: 0.98,
            rain_monthly: 2.244,
            rain_yearly: 2.366,
            solar_radiation: 142.3,
            uv_index: 1,
        }
    }
}

/// Rain totals served for the rain-data command.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RainTotals {
    pub rate: u32,
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: u32,
}

/// Identity and scripted misbehavior of one fake console.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleProfile {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
    /// TCP port advertised in discovery replies.
    pub port: u16,
    pub ssid: String,
    /// Byte order of the live record.
    pub byte_order: ByteOrder,
    pub reading: LiveReading,
    pub rain: RainTotals,
    /// Port the console dials back to after a legacy search.
    pub callback_port: u16,
    /// Send only this many bytes of a record reply.
    pub truncate_after: Option<usize>,
    /// Keep the connection open after replying instead of closing it.
    pub stall: bool,
    /// Replies with a broken checksum sent ahead of the first valid one, at most
    /// eight per poll.
    pub corrupt_replies: usize,
    /// Flip the trailing checksum byte of every record reply.
    pub corrupt_records: bool,
    /// Junk datagrams sent ahead of every discovery reply.
    pub noise_datagrams: usize,
    /// Discovery polls to leave unanswered.
    pub ignore_polls: usize,
}

impl Default for ConsoleProfile {
    fn default() -> Self {
        Self {
            mac: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
            ip: [192, 168, 1, 50],
            port: 45000,
            ssid: "GW1000B-WIFI".to_string(),
            byte_order: ByteOrder::Little,
            reading: LiveReading::default(),
            rain: RainTotals::default(),
            callback_port: 6500,
            truncate_after: None,
            stall: false,
            corrupt_replies: 0,
            corrupt_records: false,
            noise_datagrams: 0,
            ignore_polls: 0,
        }
    }
}

impl ConsoleProfile {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Checksummed discovery reply for `profile`.
pub fn discovery_reply(profile: &ConsoleProfile) -> anyhow::Result<Vec<u8>> {
    let mut raw = encode_fields(
        &[
            Value::Bytes(FRAME_HEADER.to_vec()),
            Value::Int(i64::from(Command::Discover.opcode()[0])),
            Value::Int(0),
            Value::Bytes(profile.mac.to_vec()),
            Value::Bytes(profile.ip.to_vec()),
            Value::Int(i64::from(profile.port)),
            Value::Text(profile.ssid.clone()),
            Value::Int(0),
        ],
        DISCOVERY,
        ByteOrder::Big,
    )?;
    frame::finish_frame(&mut raw, 2)?;
    Ok(raw)
}

/// The 104-byte live record.
pub fn live_frame(reading: &LiveReading, order: ByteOrder) -> anyhow::Result<Vec<u8>> {
    let f = |v: f32| Value::Float(f64::from(v));
    let values = vec![
        Value::Text("PC2000".into()),
        Value::Text("READ".into()),
        Value::Text("NOWRECORD".into()),
        Value::Int(104),
        Value::Int(0),
        Value::Int(i64::from(reading.wind_direction)),
        Value::Int(i64::from(reading.humidity_indoor)),
        Value::Int(i64::from(reading.humidity_outdoor)),
        f(reading.temperature_indoor),
        f(reading.pressure_absolute),
        f(reading.pressure_relative),
        f(reading.temperature_outdoor),
        f(reading.dewpoint),
        f(reading.windchill),
        f(reading.wind_average),
        f(reading.wind_gust),
        f(reading.rain_hourly),
        f(reading.rain_daily),
        f(reading.rain_weekly),
        f(reading.rain_monthly),
        f(reading.rain_yearly),
        f(reading.solar_radiation),
        Value::Int(i64::from(reading.uv_index)),
        Value::Int(255),
        Value::Int(0),
    ];
    Ok(encode_fields(&values, LIVE_DATA, order)?)
}

/// Checksummed rain-totals reply.
pub fn rain_frame(rain: &RainTotals) -> anyhow::Result<Vec<u8>> {
    let mut raw = encode_fields(
        &[
            Value::Bytes(FRAME_HEADER.to_vec()),
            Value::Int(i64::from(Command::RainData.opcode()[0])),
            Value::Int(0),
            Value::Int(i64::from(rain.rate)),
            Value::Int(i64::from(rain.day)),
            Value::Int(i64::from(rain.week)),
            Value::Int(i64::from(rain.month)),
            Value::Int(i64::from(rain.year)),
            Value::Int(0),
        ],
        RAIN_DATA,
        ByteOrder::Big,
    )?;
    frame::finish_frame(&mut raw, 1)?;
    Ok(raw)
}

fn is_legacy(packet: &[u8], cmd: &str) -> bool {
    let rec = wxlink::record::decode(packet, LEGACY_COMMAND, ByteOrder::Native);
    rec.is_complete()
        && rec.get("HP_HEAD").and_then(Value::as_str) == Some("PC2000")
        && rec.get("HP_CMD").and_then(Value::as_str) == Some(cmd)
}

struct Inner {
    profile: ConsoleProfile,
    discovery_polls: AtomicUsize,
    corrupt_sent: AtomicUsize,
    record_requests: AtomicUsize,
}

#[derive(Clone)]
pub struct MockConsole {
    inner: Arc<Inner>,
}

impl Default for MockConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConsole {
    pub fn new() -> Self {
        Self::with_profile(ConsoleProfile::default())
    }

    pub fn with_profile(profile: ConsoleProfile) -> Self {
        Self {
            inner: Arc::new(Inner {
                profile,
                discovery_polls: AtomicUsize::new(0),
                corrupt_sent: AtomicUsize::new(0),
                record_requests: AtomicUsize::new(0),
            }),
        }
    }

    pub fn profile(&self) -> &ConsoleProfile {
        &self.inner.profile
    }

    /// Discovery commands received so far, answered or not.
    pub fn discovery_polls(&self) -> usize {
        self.inner.discovery_polls.load(Ordering::SeqCst)
    }

    /// Record requests served over TCP (direct or dial-back).
    pub fn record_requests(&self) -> usize {
        self.inner.record_requests.load(Ordering::SeqCst)
    }

    /// Answer discovery and legacy search datagrams on `sock` until it fails.
    pub async fn run_discovery_on(&self, sock: UdpSocket) -> anyhow::Result<()> {
        let discover = frame::encode(Command::Discover.opcode(), &[])?;
        let mut buf = vec![0u8; 1024];
        loop {
            let (n, src) = sock.recv_from(&mut buf).await?;
            let datagram = &buf[..n];
            if datagram == discover.as_slice() {
                self.answer_discovery(&sock, src).await?;
            } else if is_legacy(datagram, "SEARCH") {
                info!(%src, "legacy search, dialing back");
                let target = SocketAddr::new(src.ip(), self.inner.profile.callback_port);
                let console = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = console.call_back(target).await {
                        warn!(%target, error = %e, "dial back failed");
                    }
                });
            } else {
                debug!(%src, bytes = n, "ignoring datagram");
            }
        }
    }

    async fn answer_discovery(&self, sock: &UdpSocket, src: SocketAddr) -> anyhow::Result<()> {
        let profile = &self.inner.profile;
        let poll = self.inner.discovery_polls.fetch_add(1, Ordering::SeqCst);
        if poll < profile.ignore_polls {
            debug!(%src, poll, "leaving discovery poll unanswered");
            return Ok(());
        }
        for i in 0..profile.noise_datagrams {
            // truncated reply header, then garbage
            let junk: &[u8] = if i % 2 == 0 {
                &[0xFF, 0xFF, 0x12, 0x00]
            } else {
                b"not a console"
            };
            sock.send_to(junk, src).await?;
        }
        let reply = discovery_reply(profile)?;
        for _ in 0..CORRUPT_PER_POLL {
            if self.inner.corrupt_sent.load(Ordering::SeqCst) >= profile.corrupt_replies {
                break;
            }
            self.inner.corrupt_sent.fetch_add(1, Ordering::SeqCst);
            let mut bad = reply.clone();
            let last = bad.len() - 1;
            bad[last] ^= 0x01;
            sock.send_to(&bad, src).await?;
        }
        if self.inner.corrupt_sent.load(Ordering::SeqCst) < profile.corrupt_replies {
            debug!(%src, "corrupt budget left, withholding valid reply");
            return Ok(());
        }
        sock.send_to(&reply, src).await?;
        info!(%src, "discovery answered");
        Ok(())
    }

    /// Serve record requests on `listener` until it fails.
    pub async fn run_listener_on(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let console = self.clone();
            tokio::spawn(async move {
                if let Err(e) = console.serve(stream).await {
                    warn!(%peer, error = %e, "session ended with error");
                }
            });
        }
    }

    /// Connect to a legacy rendezvous listener and serve the request that follows.
    pub async fn call_back(&self, target: SocketAddr) -> anyhow::Result<()> {
        let stream = TcpStream::connect(target).await?;
        info!(%target, "connected back to client");
        self.serve(stream).await
    }

    async fn serve(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_REQUEST];
        let n = stream.read(&mut buf).await?;
        let request = &buf[..n];
        let mut reply = if is_legacy(request, "READ") {
            live_frame(&self.inner.profile.reading, self.inner.profile.byte_order)?
        } else if request.starts_with(&FRAME_HEADER) && frame::verify_checksum(request).is_ok() {
            match request.get(2).copied() {
                Some(0x27) => {
                    live_frame(&self.inner.profile.reading, self.inner.profile.byte_order)?
                }
                Some(0x34) => rain_frame(&self.inner.profile.rain)?,
                other => {
                    warn!(opcode = ?other, "unsupported command");
                    return Ok(());
                }
            }
        } else {
            warn!(bytes = n, "unrecognized request");
            return Ok(());
        };
        self.inner.record_requests.fetch_add(1, Ordering::SeqCst);
        if self.inner.profile.corrupt_records {
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }

        let len = self
            .inner
            .profile
            .truncate_after
            .map_or(reply.len(), |t| t.min(reply.len()));
        stream.write_all(&reply[..len]).await?;
        stream.flush().await?;
        debug!(sent = len, total = reply.len(), "reply written");

        if self.inner.profile.stall {
            // hold the session until the client hangs up
            let mut sink = [0u8; 64];
            while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlink::schema::fixed_len;

    #[test]
    fn frames_have_schema_lengths() {
        let p = ConsoleProfile::default();
        assert_eq!(
            live_frame(&p.reading, ByteOrder::Big).expect("live").len(),
            fixed_len(LIVE_DATA).expect("fixed")
        );
        let rain = rain_frame(&p.rain).expect("rain");
        assert_eq!(rain.len(), 25);
        frame::verify_checksum(&rain).expect("valid checksum");
        frame::verify_checksum(&discovery_reply(&p).expect("reply")).expect("valid checksum");
    }

    #[test]
    fn profile_from_toml() {
        let p = ConsoleProfile::from_toml_str(
            r#"
port = 45001
truncate_after = 40
stall = true
[reading]
temperature_outdoor = 50.5
"#,
        )
        .expect("parse");
        assert_eq!(p.port, 45001);
        assert_eq!(p.truncate_after, Some(40));
        assert!((p.reading.temperature_outdoor - 50.5).abs() < f32::EPSILON);
        assert_eq!(p.reading.humidity_indoor, 43);
    }
}
