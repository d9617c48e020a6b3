//! One acquisition: locate the console, request a record, decode, emit.

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, info, info_span, warn, Span};

use crate::commands::Command;
use crate::config::{Config, Family};
use crate::discovery::DiscoveryClient;
use crate::emitter::{emit, OutOfRange, Sample};
use crate::endpoint::DeviceAddress;
use crate::error::WxError;
use crate::frame::{self, hex_dump};
use crate::record::{decode, DecodedRecord};
use crate::rendezvous::{self, Rendezvous};
use crate::schema::fixed_len;
use crate::session::{Response, SessionClient};
use crate::sink::SampleSink;

/// Legacy table holding the current readings.
const LEGACY_TABLE: &str = "NOWRECORD";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Discovering,
    Discovered,
    Connecting,
    Requesting,
    AwaitingResponse,
    Decoding,
    Emitting,
    Done,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Requesting => "requesting",
            Self::AwaitingResponse => "awaiting_response",
            Self::Decoding => "decoding",
            Self::Emitting => "emitting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful acquisition.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub address: DeviceAddress,
    pub record: DecodedRecord,
    pub samples: Vec<Sample>,
    pub rejected: Vec<OutOfRange>,
    /// Captured when the read finished; shared by every sample.
    pub timestamp: i64,
    /// False when the read deadline cut the reply short.
    pub complete: bool,
}

/// Builds its clients from one [`Config`] and runs acquisitions sequentially.
pub struct Acquirer {
    config: Config,
    discovery: DiscoveryClient,
    session: SessionClient,
    span: Span,
}

impl Acquirer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let span = info_span!("acquire", family = ?config.family, command = config.command.as_str());
        Self {
            discovery: DiscoveryClient::from_config(&config).with_span(span.clone()),
            session: SessionClient::from_config(&config).with_span(span.clone()),
            config,
            span,
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.discovery = self.discovery.with_span(span.clone());
        self.session = self.session.with_span(span.clone());
        self.span = span;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    fn enter(&self, phase: Phase) {
        self.span.in_scope(|| debug!(phase = phase.as_str(), "phase"));
    }

    /// Acquire one snapshot.
    ///
    /// # Errors
    ///
    /// `DiscoveryFailed` or `Transient` after retry exhaustion, `SessionFailed` on a broken
    /// session, `ChecksumInvalid` for a complete reply with a bad checksum, `Config` for an
    /// unusable configuration.
    pub async fn acquire(&self) -> Result<Snapshot, WxError> {
        self.enter(Phase::Idle);
        let command = self.config.command;
        if command == Command::Discover {
            return Err(WxError::Config(
                "discover is not a record command; use live_data or rain_data".into(),
            ));
        }
        let result = match self.config.family {
            Family::Gateway => self.acquire_gateway(command).await,
            Family::Legacy => self.acquire_legacy(command).await,
        };
        match result {
            Ok(snapshot) => {
                self.enter(Phase::Done);
                Ok(snapshot)
            }
            Err(e) => {
                self.span
                    .in_scope(|| warn!(error = %e, "acquisition failed, back to idle"));
                self.enter(Phase::Idle);
                Err(e)
            }
        }
    }

    /// Acquire and hand the samples to `sink`. Returns how many were written.
    ///
    /// # Errors
    ///
    /// Any acquisition error, or the sink's own error.
    pub async fn acquire_into<S: SampleSink>(&self, sink: &mut S) -> Result<usize, WxError> {
        let snapshot = self.acquire().await?;
        sink.write_batch(&snapshot.samples)?;
        Ok(snapshot.samples.len())
    }

    async fn acquire_gateway(&self, command: Command) -> Result<Snapshot, WxError> {
        let address = match self.config.static_address()? {
            Some(a) => {
                self.span
                    .in_scope(|| info!(address = %a, "static address, skipping discovery"));
                a
            }
            None => {
                self.enter(Phase::Discovering);
                self.discovery.discover().await?
            }
        };
        self.enter(Phase::Discovered);

        let request = frame::encode(command.opcode(), &[])?;
        self.enter(Phase::Connecting);
        let mut stream = self.session.connect(&address).await?;
        let peer = address.addr();
        self.enter(Phase::Requesting);
        self.session.send(&mut stream, &peer, &request).await?;
        self.enter(Phase::AwaitingResponse);
        let expect = fixed_len(command.response_schema());
        let response = self.session.read_reply(stream, &peer, expect).await?;
        self.finish(command, address, &response)
    }

    async fn acquire_legacy(&self, command: Command) -> Result<Snapshot, WxError> {
        if command != Command::LiveData {
            return Err(WxError::Config(format!(
                "{} is not served by the legacy family",
                command.as_str()
            )));
        }
        if self.config.address.is_some() {
            self.span.in_scope(|| {
                warn!("static address is ignored by the legacy family; the console dials back");
            });
        }
        let rendezvous = Rendezvous::from_config(&self.config)?.with_span(self.span.clone());
        self.enter(Phase::Discovering);
        rendezvous::send_search(&self.config.discovery_target()).await?;

        self.enter(Phase::Connecting);
        let (mut stream, peer) = rendezvous.accept().await?;
        let address = peer_address(peer);
        self.enter(Phase::Discovered);

        let peer = address.addr();
        let request = rendezvous::read_packet(LEGACY_TABLE)?;
        self.enter(Phase::Requesting);
        self.session.send(&mut stream, &peer, &request).await?;
        self.enter(Phase::AwaitingResponse);
        let expect = fixed_len(command.response_schema());
        let response = self.session.read_reply(stream, &peer, expect).await?;
        drop(rendezvous);
        self.finish(command, address, &response)
    }

    fn finish(
        &self,
        command: Command,
        address: DeviceAddress,
        response: &Response,
    ) -> Result<Snapshot, WxError> {
        self.enter(Phase::Decoding);
        let specs = command.response_schema();
        let order = command.response_byte_order(self.config.byte_order);
        let record = decode(&response.bytes, specs, order);
        if !record.is_complete() {
            self.span.in_scope(|| {
                warn!(
                    received = response.bytes.len(),
                    decoded = record.decoded_fields(),
                    fields = record.len(),
                    "partial response, trailing fields are null"
                );
            });
        }
        if command.response_checksummed() && record.is_complete() {
            if let Err(e) = frame::verify_checksum(&response.bytes[..record.consumed()]) {
                if self.config.dump_on_error {
                    log::warn!("[WX bad checksum] {}", hex_dump(&response.bytes));
                }
                return Err(e);
            }
        }

        self.enter(Phase::Emitting);
        let emission = emit(&record, specs, response.timestamp);
        for r in &emission.rejected {
            self.span.in_scope(|| warn!(%r, "field out of range, dropped"));
        }
        self.span.in_scope(|| {
            info!(
                address = %address,
                samples = emission.samples.len(),
                rejected = emission.rejected.len(),
                "snapshot acquired"
            );
        });
        Ok(Snapshot {
            address,
            record,
            samples: emission.samples,
            rejected: emission.rejected,
            timestamp: response.timestamp,
            complete: response.complete,
        })
    }
}

fn peer_address(peer: SocketAddr) -> DeviceAddress {
    DeviceAddress::new(peer.ip().to_string(), peer.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_is_not_a_record_command() {
        let cfg = Config {
            command: Command::Discover,
            ..Config::default()
        };
        let err = Acquirer::new(cfg).acquire().await.expect_err("rejected");
        assert!(matches!(err, WxError::Config(_)));
    }

    #[tokio::test]
    async fn legacy_serves_live_data_only() {
        let cfg = Config {
            family: Family::Legacy,
            command: Command::RainData,
            ..Config::default()
        };
        let err = Acquirer::new(cfg).acquire().await.expect_err("rejected");
        assert!(matches!(err, WxError::Config(_)));
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::AwaitingResponse.to_string(), "awaiting_response");
    }
}
