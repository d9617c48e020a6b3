//! Decoding raw replies into [`DecodedRecord`]s, and the inverse for fixed packets.
//!
//! `decode` is total: bytes are consumed left to right and the first field that does
//! not fit nulls itself and everything after it.

use std::fmt;

use crate::error::WxError;
use crate::schema::{ByteOrder, Encoding, FieldSpec, FloatWidth, IntWidth};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Numeric view used for range checks and samples.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) | Self::Bytes(_) => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "{}", crate::frame::hex_dump(b)),
        }
    }
}

/// One decoded slot; `value` is `None` when the reply ran out before this field.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub label: &'static str,
    pub value: Option<Value>,
}

/// Ordered label -> value mapping. Always has exactly one entry per field spec.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedRecord {
    entries: Vec<Entry>,
    consumed: usize,
}

impl DecodedRecord {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .and_then(|e| e.value.as_ref())
    }

    /// True when every field decoded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.value.is_some())
    }

    /// Number of leading fields that decoded.
    #[must_use]
    pub fn decoded_fields(&self) -> usize {
        self.entries.iter().take_while(|e| e.value.is_some()).count()
    }

    /// Bytes consumed by the decoded fields.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }
}

fn read_uint(bytes: &[u8], order: ByteOrder) -> u64 {
    match order.resolve() {
        ByteOrder::Little => bytes
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        _ => bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
    }
}

fn decode_field(
    encoding: Encoding,
    raw: &[u8],
    order: ByteOrder,
) -> Option<(Value, usize)> {
    match encoding {
        Encoding::Int { width, signed } => {
            let n = width.bytes();
            let bytes = raw.get(..n)?;
            let u = read_uint(bytes, order);
            #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            let v = if signed {
                match width {
                    IntWidth::W1 => i64::from(u as u8 as i8),
                    IntWidth::W2 => i64::from(u as u16 as i16),
                    IntWidth::W4 => i64::from(u as u32 as i32),
                }
            } else {
                u as i64
            };
            Some((Value::Int(v), n))
        }
        Encoding::Float(width) => {
            let n = width.bytes();
            let bytes = raw.get(..n)?;
            let u = read_uint(bytes, order);
            #[allow(clippy::cast_possible_truncation)]
            let v = match width {
                FloatWidth::F32 => f64::from(f32::from_bits(u as u32)),
                FloatWidth::F64 => f64::from_bits(u),
            };
            Some((Value::Float(v), n))
        }
        Encoding::FixedString(n) => {
            let bytes = raw.get(..n)?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(n);
            Some((
                Value::Text(String::from_utf8_lossy(&bytes[..end]).into_owned()),
                n,
            ))
        }
        Encoding::LengthPrefixedString => {
            let len = usize::from(*raw.first()?);
            let bytes = raw.get(1..=len)?;
            Some((
                Value::Text(String::from_utf8_lossy(bytes).into_owned()),
                len + 1,
            ))
        }
        Encoding::Bytes(n) => {
            let bytes = raw.get(..n)?;
            Some((Value::Bytes(bytes.to_vec()), n))
        }
    }
}

/// Decode `raw` through `specs`. Never fails; missing tail fields are `None`.
#[must_use]
pub fn decode(raw: &[u8], specs: &[FieldSpec], order: ByteOrder) -> DecodedRecord {
    let mut entries = Vec::with_capacity(specs.len());
    let mut offset = 0usize;
    let mut truncated = false;
    for spec in specs {
        let value = if truncated {
            None
        } else {
            match decode_field(spec.encoding, &raw[offset..], order) {
                Some((v, used)) => {
                    offset += used;
                    Some(v)
                }
                None => {
                    truncated = true;
                    None
                }
            }
        };
        entries.push(Entry {
            label: spec.label,
            value,
        });
    }
    DecodedRecord {
        entries,
        consumed: offset,
    }
}

fn write_uint(out: &mut Vec<u8>, v: u64, n: usize, order: ByteOrder) {
    let be = v.to_be_bytes();
    let tail = &be[be.len() - n..];
    match order.resolve() {
        ByteOrder::Little => out.extend(tail.iter().rev()),
        _ => out.extend_from_slice(tail),
    }
}

fn mismatch(spec: &FieldSpec, value: &Value) -> WxError {
    WxError::InvalidFrame(format!(
        "value {value} does not fit field {} ({:?})",
        spec.label, spec.encoding
    ))
}

/// Lay `values` out according to `specs`. Inverse of [`decode`] for complete records.
///
/// # Errors
///
/// Returns `WxError::InvalidFrame` on a count mismatch, a value whose kind does not
/// match its encoding, an integer outside the field width, or an oversize string.
pub fn encode_fields(
    values: &[Value],
    specs: &[FieldSpec],
    order: ByteOrder,
) -> Result<Vec<u8>, WxError> {
    if values.len() != specs.len() {
        return Err(WxError::InvalidFrame(format!(
            "{} values for {} fields",
            values.len(),
            specs.len()
        )));
    }
    let mut out = Vec::new();
    for (spec, value) in specs.iter().zip(values) {
        match (spec.encoding, value) {
            (Encoding::Int { width, signed }, Value::Int(i)) => {
                let n = width.bytes();
                let bits = 8 * u32::try_from(n).unwrap_or(8);
                let fits = if signed {
                    let lim = 1i64 << (bits - 1);
                    (-lim..lim).contains(i)
                } else {
                    (0..(1i64 << bits)).contains(i)
                };
                if !fits {
                    return Err(mismatch(spec, value));
                }
                #[allow(clippy::cast_sign_loss)]
                let u = *i as u64;
                write_uint(&mut out, u, n, order);
            }
            (Encoding::Float(FloatWidth::F32), Value::Float(f)) => {
                #[allow(clippy::cast_possible_truncation)]
                let bits = (*f as f32).to_bits();
                write_uint(&mut out, u64::from(bits), 4, order);
            }
            (Encoding::Float(FloatWidth::F64), Value::Float(f)) => {
                write_uint(&mut out, f.to_bits(), 8, order);
            }
            (Encoding::FixedString(n), Value::Text(s)) => {
                // Z-style: at most n bytes, zero padded
                if s.len() > n {
                    return Err(mismatch(spec, value));
                }
                out.extend_from_slice(s.as_bytes());
                out.resize(out.len() + n - s.len(), 0);
            }
            (Encoding::LengthPrefixedString, Value::Text(s)) => {
                let len = u8::try_from(s.len()).map_err(|_| mismatch(spec, value))?;
                out.push(len);
                out.extend_from_slice(s.as_bytes());
            }
            (Encoding::Bytes(n), Value::Bytes(b)) if b.len() == n => {
                out.extend_from_slice(b);
            }
            _ => return Err(mismatch(spec, value)),
        }
    }
    Ok(out)
}
