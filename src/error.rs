use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WxError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("discovery failed for {target} after {attempts} attempt(s): {reason}")]
    DiscoveryFailed {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("transient socket error: {0}")]
    Transient(io::Error),

    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumInvalid { expected: u8, actual: u8 },

    #[error("session with {addr} failed: {source}")]
    SessionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("sink error: {0}")]
    Sink(String),
}

/// Fieldless discriminant of [`WxError`], used to describe retryable sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    InvalidFrame,
    DiscoveryFailed,
    Transient,
    ChecksumInvalid,
    SessionFailed,
    Io,
    Config,
    Protocol,
    Sink,
}

impl WxError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidFrame(_) => ErrorClass::InvalidFrame,
            Self::DiscoveryFailed { .. } => ErrorClass::DiscoveryFailed,
            Self::Transient(_) => ErrorClass::Transient,
            Self::ChecksumInvalid { .. } => ErrorClass::ChecksumInvalid,
            Self::SessionFailed { .. } => ErrorClass::SessionFailed,
            Self::Io(_) => ErrorClass::Io,
            Self::Config(_) => ErrorClass::Config,
            Self::Protocol(_) => ErrorClass::Protocol,
            Self::Sink(_) => ErrorClass::Sink,
        }
    }

    /// Wrap an error from an established session, keeping transient kinds retryable.
    #[must_use]
    pub fn session(addr: impl Into<String>, source: io::Error) -> Self {
        if is_transient_kind(source.kind()) {
            Self::Transient(source)
        } else {
            Self::SessionFailed {
                addr: addr.into(),
                source,
            }
        }
    }
}

/// EINTR, EAGAIN/EWOULDBLOCK, ECONNABORTED and timeouts are the benign
/// interruptions a console's embedded stack produces under load.
#[must_use]
pub const fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionAborted
    )
}

impl From<io::Error> for WxError {
    fn from(e: io::Error) -> Self {
        if is_transient_kind(e.kind()) {
            Self::Transient(e)
        } else {
            Self::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_are_classified() {
        let e: WxError = io::Error::new(io::ErrorKind::Interrupted, "eintr").into();
        assert_eq!(e.class(), ErrorClass::Transient);
        let e: WxError = io::Error::new(io::ErrorKind::WouldBlock, "eagain").into();
        assert_eq!(e.class(), ErrorClass::Transient);
        let e: WxError = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(e.class(), ErrorClass::Io);
    }

    #[test]
    fn session_errors_keep_addr() {
        let e = WxError::session(
            "10.0.0.2:45000",
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        assert_eq!(e.class(), ErrorClass::SessionFailed);
        assert!(e.to_string().contains("10.0.0.2:45000"));
    }
}
