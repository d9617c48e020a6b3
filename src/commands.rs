use serde::Deserialize;
use std::str::FromStr;

use crate::schema::{ByteOrder, FieldSpec, DISCOVERY, LIVE_DATA, RAIN_DATA};

/// Console commands this crate issues. Variant names match the config ids
/// (`"live_data"`, `"rain_data"`).
#[derive(Debug, Deserialize, PartialEq, Eq, Hash, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Discover,
    #[default]
    LiveData,
    RainData,
}

impl Command {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::LiveData => "live_data",
            Self::RainData => "rain_data",
        }
    }

    #[must_use]
    pub const fn opcode(&self) -> &'static [u8] {
        match self {
            Self::Discover => &[0x12, 0x00],
            Self::LiveData => &[0x27],
            Self::RainData => &[0x34],
        }
    }

    /// Layout of the reply to this command.
    #[must_use]
    pub fn response_schema(&self) -> &'static [FieldSpec] {
        match self {
            Self::Discover => DISCOVERY,
            Self::LiveData => LIVE_DATA,
            Self::RainData => RAIN_DATA,
        }
    }

    /// Whether the reply ends with a checksum byte.
    #[must_use]
    pub const fn response_checksummed(&self) -> bool {
        matches!(self, Self::Discover | Self::RainData)
    }

    /// Checksummed replies are always big-endian; the live record follows `configured`.
    #[must_use]
    pub const fn response_byte_order(&self, configured: ByteOrder) -> ByteOrder {
        match self {
            Self::Discover | Self::RainData => ByteOrder::Big,
            Self::LiveData => configured,
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discover" => Ok(Self::Discover),
            "live_data" => Ok(Self::LiveData),
            "rain_data" => Ok(Self::RainData),
            other => Err(format!("unknown command id: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for c in [Command::Discover, Command::LiveData, Command::RainData] {
            assert_eq!(c.as_str().parse::<Command>(), Ok(c));
        }
        assert!("write_config".parse::<Command>().is_err());
    }

    #[test]
    fn checksummed_replies_are_big_endian() {
        assert_eq!(
            Command::RainData.response_byte_order(ByteOrder::Little),
            ByteOrder::Big
        );
        assert_eq!(
            Command::LiveData.response_byte_order(ByteOrder::Little),
            ByteOrder::Little
        );
    }
}
