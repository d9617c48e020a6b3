#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! wxlink
//!
//! wxlink reads live telemetry from home weather-station consoles over their LAN
//! protocol and turns it into timestamped samples for a time-series store.
//!
//! Main pieces:
//! - frame building and checksums (`frame`), declarative layouts (`schema`) and
//!   total decoding (`record`)
//! - UDP discovery (`discovery`), TCP sessions (`session`) and the legacy
//!   dial-back listener (`rendezvous`), all under a bounded `retry` policy
//! - sample emission (`emitter`) and sink adapters (`sink`)
//! - a fake console for tests (separate crate `wxlink_mock`)
//!
//! ```no_run
//! use wxlink::{Acquirer, Config, MemorySink};
//! # async fn run() -> Result<(), wxlink::WxError> {
//! let acquirer = Acquirer::new(Config::from_env());
//! let mut sink = MemorySink::new();
//! let written = acquirer.acquire_into(&mut sink).await?;
//! # Ok(()) }
//! ```

pub mod acquire;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod emitter;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod json_record;
pub mod record;
pub mod rendezvous;
pub mod retry;
pub mod schema;
pub mod session;
pub mod sink;

pub use acquire::{Acquirer, Phase, Snapshot};
pub use commands::Command;
pub use config::{config, Config, Family};
pub use discovery::{Console, DiscoveryClient};
pub use emitter::{emit, Emission, OutOfRange, Sample};
pub use endpoint::DeviceAddress;
pub use error::{ErrorClass, WxError};
pub use record::{decode, encode_fields, DecodedRecord, Value};
pub use retry::RetryPolicy;
pub use schema::{ByteOrder, Encoding, FieldSpec};
pub use session::{Response, SessionClient};
pub use sink::{LineProtocolSink, MemorySink, SampleSink};
