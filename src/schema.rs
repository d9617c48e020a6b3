//! Declarative wire layouts.
//!
//! A layout is an ordered `&'static [FieldSpec]`; the order is the on-wire byte order
//! of the fields. Layouts are process-wide constants and are never mutated.

use serde::{Deserialize, Serialize};

/// Byte order used for numeric fields. Passed to every decode/encode call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    Big,
    Little,
    /// Host order, as the legacy console family writes its records.
    #[default]
    Native,
}

impl ByteOrder {
    /// Resolve `Native` to the concrete order of the running host.
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Native => {
                if cfg!(target_endian = "big") {
                    Self::Big
                } else {
                    Self::Little
                }
            }
            other => other,
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "be" => Some(Self::Big),
            "little" | "le" => Some(Self::Little),
            "native" | "host" => Some(Self::Native),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntWidth {
    W1,
    W2,
    W4,
}

impl IntWidth {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W1 => 1,
            Self::W2 => 2,
            Self::W4 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// How a field is laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Int { width: IntWidth, signed: bool },
    Float(FloatWidth),
    /// Exactly N bytes; the first zero byte terminates the string.
    FixedString(usize),
    /// One length byte followed by that many bytes.
    LengthPrefixedString,
    /// Exactly N opaque bytes (MAC and IP addresses).
    Bytes(usize),
}

impl Encoding {
    pub const U8: Self = Self::Int {
        width: IntWidth::W1,
        signed: false,
    };
    pub const U16: Self = Self::Int {
        width: IntWidth::W2,
        signed: false,
    };
    pub const U32: Self = Self::Int {
        width: IntWidth::W4,
        signed: false,
    };
    pub const I16: Self = Self::Int {
        width: IntWidth::W2,
        signed: true,
    };
    pub const F32: Self = Self::Float(FloatWidth::F32);

    /// Width in bytes, or `None` when the width is carried on the wire.
    #[must_use]
    pub const fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Int { width, .. } => Some(width.bytes()),
            Self::Float(w) => Some(w.bytes()),
            Self::FixedString(n) | Self::Bytes(n) => Some(*n),
            Self::LengthPrefixedString => None,
        }
    }
}

/// Inclusive validity range for a published measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    #[must_use]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

impl std::fmt::Display for ValidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    /// Wire label, unique within a layout.
    pub label: &'static str,
    /// Series name the value is published under; `None` for structural slots.
    pub series: Option<&'static str>,
    pub encoding: Encoding,
    pub valid_range: Option<ValidRange>,
}

impl FieldSpec {
    /// A structural field (header, checksum, reserved slot).
    #[must_use]
    pub const fn slot(label: &'static str, encoding: Encoding) -> Self {
        Self {
            label,
            series: None,
            encoding,
            valid_range: None,
        }
    }

    /// A published measurement named after its label.
    #[must_use]
    pub const fn measurement(label: &'static str, encoding: Encoding) -> Self {
        Self {
            label,
            series: Some(label),
            encoding,
            valid_range: None,
        }
    }

    #[must_use]
    pub const fn with_range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(ValidRange { min, max });
        self
    }
}

/// Sum of the fixed widths, or `None` if the layout contains a variable-length field.
#[must_use]
pub fn fixed_len(specs: &[FieldSpec]) -> Option<usize> {
    specs.iter().map(|s| s.encoding.fixed_width()).sum()
}

/// `NOWRECORD` live-data snapshot, 104 bytes.
pub static LIVE_DATA: &[FieldSpec] = &[
    FieldSpec::slot("HP_HEAD", Encoding::FixedString(8)),
    FieldSpec::slot("HP_CMD", Encoding::FixedString(8)),
    FieldSpec::slot("HP_TABLE", Encoding::FixedString(16)),
    FieldSpec::slot("HP_LEN", Encoding::U32),
    FieldSpec::slot("HP_CRC", Encoding::U32),
    FieldSpec::measurement("wind_direction", Encoding::U16).with_range(0.0, 360.0),
    FieldSpec::measurement("humidity_indoor", Encoding::U8).with_range(0.0, 100.0),
    FieldSpec::measurement("humidity_outdoor", Encoding::U8).with_range(0.0, 100.0),
    FieldSpec::measurement("temperature_indoor", Encoding::F32).with_range(-99.0, 1000.0),
    FieldSpec::measurement("pressure_absolute", Encoding::F32).with_range(10.0, 40.0),
    FieldSpec::measurement("pressure_relative", Encoding::F32).with_range(10.0, 40.0),
    FieldSpec::measurement("temperature_outdoor", Encoding::F32).with_range(-99.0, 1000.0),
    FieldSpec::measurement("dewpoint", Encoding::F32).with_range(-99.0, 1000.0),
    FieldSpec::measurement("windchill", Encoding::F32).with_range(-99.0, 1000.0),
    FieldSpec::measurement("wind_average", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("wind_gust", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("rain_hourly", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("rain_daily", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("rain_weekly", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("rain_monthly", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("rain_yearly", Encoding::F32).with_range(0.0, 1000.0),
    FieldSpec::measurement("solar_radiation", Encoding::F32).with_range(0.0, 10000.0),
    FieldSpec::measurement("uv_index", Encoding::U8).with_range(0.0, 100.0),
    // heat index or soil? typically 255 and 0
    FieldSpec::slot("field25", Encoding::U8),
    FieldSpec::slot("field26", Encoding::U16),
];

/// Reply to the discovery broadcast (big-endian, checksummed).
pub static DISCOVERY: &[FieldSpec] = &[
    FieldSpec::slot("header", Encoding::Bytes(2)),
    FieldSpec::slot("command", Encoding::U8),
    FieldSpec::slot("size", Encoding::U16),
    FieldSpec::slot("mac", Encoding::Bytes(6)),
    FieldSpec::slot("ip", Encoding::Bytes(4)),
    FieldSpec::slot("port", Encoding::U16),
    FieldSpec::slot("ssid", Encoding::LengthPrefixedString),
    FieldSpec::slot("checksum", Encoding::U8),
];

/// Reply to the rain-totals command (big-endian, checksummed).
pub static RAIN_DATA: &[FieldSpec] = &[
    FieldSpec::slot("header", Encoding::Bytes(2)),
    FieldSpec::slot("command", Encoding::U8),
    FieldSpec::slot("size", Encoding::U8),
    FieldSpec::measurement("rain_rate", Encoding::U32),
    FieldSpec::measurement("rain_day", Encoding::U32),
    FieldSpec::measurement("rain_week", Encoding::U32),
    FieldSpec::measurement("rain_month", Encoding::U32),
    FieldSpec::measurement("rain_year", Encoding::U32),
    FieldSpec::slot("checksum", Encoding::U8),
];

/// Fixed 40-byte command packet of the legacy family (`SEARCH`, `READ NOWRECORD`).
pub static LEGACY_COMMAND: &[FieldSpec] = &[
    FieldSpec::slot("HP_HEAD", Encoding::FixedString(8)),
    FieldSpec::slot("HP_CMD", Encoding::FixedString(8)),
    FieldSpec::slot("HP_TABLE", Encoding::FixedString(16)),
    FieldSpec::slot("HP_LEN", Encoding::U32),
    FieldSpec::slot("HP_CRC", Encoding::U32),
];
