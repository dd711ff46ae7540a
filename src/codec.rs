//! Typed serialization of Generic-channel attribute payloads.
//!
//! Every function here is pure; the attribute catalog in
//! [`crate::attribute`] decides which [`Codec`] and width apply.
//!
//! | Codec | Wire form | Example |
//! |---|---|---|
//! | [`Codec::Unsigned`] | big-endian, `wire_size` bytes | `250` → `00 00 fa` |
//! | [`Codec::FunkyFloat`] | integer byte, fraction × 256 byte | `8.5` → `08 80` |
//! | [`Codec::Raw`] | pass-through | EEPROM sub-pages |

use std::fmt;

use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// How an attribute value maps to payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Unsigned,
    /// The device's two-byte gain encoding (8-bit fixed point fraction).
    FunkyFloat,
    Raw,
}

/// Codec plus width and comparison tolerance for one attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireFormat {
    pub codec: Codec,
    pub wire_size: u8,
    /// Tolerance used by [`approx_eq`]; `0.0` means exact.
    pub epsilon: f64,
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Unsigned(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Unsigned(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Unsigned(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Bytes(b) => write!(f, "{b:02x?}"),
        }
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Unsigned(v)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Unsigned(v as u64)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Unsigned(v as u64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue::Bytes(v)
    }
}

// ── Unsigned ─────────────────────────────────────────────────────────────────

/// Big-endian reconstruction: `Σ byte[i] << (8 × (n − 1 − i))`.
pub fn decode_unsigned_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Big-endian encoding into exactly `width` bytes, or `None` if it doesn't fit.
pub fn encode_unsigned_be(value: u64, width: u8) -> Option<Vec<u8>> {
    let width = width as usize;
    if width == 0 || width > 8 {
        return None;
    }
    if width < 8 && value >> (8 * width) != 0 {
        return None;
    }
    Some(value.to_be_bytes()[8 - width..].to_vec())
}

// ── Funky float ──────────────────────────────────────────────────────────────

/// `byte[0] + byte[1] / 256`.
pub fn decode_funky_float(bytes: [u8; 2]) -> f64 {
    bytes[0] as f64 + bytes[1] as f64 / 256.0
}

/// Inverse of [`decode_funky_float`], rounding the fraction to the nearest
/// 1/256. Returns `None` for negative, non-finite or ≥ 256 values.
pub fn encode_funky_float(value: f64) -> Option<[u8; 2]> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let mut whole = value.trunc();
    let mut frac = ((value - whole) * 256.0).round();
    if frac >= 256.0 {
        whole += 1.0;
        frac = 0.0;
    }
    if whole > 255.0 {
        return None;
    }
    Some([whole as u8, frac as u8])
}

// ── Attribute-level API ──────────────────────────────────────────────────────

/// Serialize `value` for the attribute called `name`.
pub fn serialize(name: &'static str, format: &WireFormat, value: &AttributeValue) -> Result<Vec<u8>> {
    let out_of_range = || ProtocolError::ValueOutOfRange {
        attribute: name,
        value: value.to_string(),
        wire_size: format.wire_size,
    };

    match (format.codec, value) {
        (Codec::Unsigned, AttributeValue::Unsigned(v)) => {
            encode_unsigned_be(*v, format.wire_size).ok_or_else(out_of_range)
        }
        (Codec::Unsigned, _) => Err(ProtocolError::TypeMismatch {
            attribute: name,
            expected: "unsigned integer",
        }),
        (Codec::FunkyFloat, AttributeValue::Float(_) | AttributeValue::Unsigned(_)) => {
            let v = value.as_f64().unwrap_or_default();
            encode_funky_float(v).map(|b| b.to_vec()).ok_or_else(out_of_range)
        }
        (Codec::FunkyFloat, AttributeValue::Bytes(_)) => Err(ProtocolError::TypeMismatch {
            attribute: name,
            expected: "float",
        }),
        (Codec::Raw, AttributeValue::Bytes(b)) => Ok(b.clone()),
        (Codec::Raw, _) => Err(ProtocolError::TypeMismatch {
            attribute: name,
            expected: "byte block",
        }),
    }
}

/// Decode a response payload for the attribute called `name`.
///
/// Payloads shorter than the declared width are rejected as a whole; they
/// are never partially decoded. Trailing bytes beyond the width are ignored.
pub fn deserialize(name: &'static str, format: &WireFormat, payload: &[u8]) -> Result<AttributeValue> {
    let width = format.wire_size as usize;
    if payload.len() < width {
        return Err(ProtocolError::MalformedResponse {
            attribute: name,
            expected: width,
            payload: payload.to_vec(),
        });
    }
    let bytes = &payload[..width];

    Ok(match format.codec {
        Codec::Unsigned => AttributeValue::Unsigned(decode_unsigned_be(bytes)),
        Codec::FunkyFloat => match bytes {
            [int, frac, ..] => AttributeValue::Float(decode_funky_float([*int, *frac])),
            _ => {
                return Err(ProtocolError::MalformedResponse {
                    attribute: name,
                    expected: 2,
                    payload: payload.to_vec(),
                })
            }
        },
        Codec::Raw => AttributeValue::Bytes(bytes.to_vec()),
    })
}

/// Compare two values within the attribute's epsilon.
///
/// The device rounds floating attributes to 8-bit fixed point, so a value
/// read back after a write is only expected to match within `epsilon`.
pub fn approx_eq(format: &WireFormat, a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::Bytes(x), AttributeValue::Bytes(y)) => x == y,
        (AttributeValue::Unsigned(x), AttributeValue::Unsigned(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= format.epsilon + f64::EPSILON * 16.0,
            _ => false,
        },
    }
}
