//! Binary decoders for spectrometer BLE notification payloads.
//!
//! All public functions in this module are pure (no I/O, no allocation beyond
//! the returned collections) and are safe to call from any async or sync context.
//!
//! | Function | Characteristic | Format |
//! |---|---|---|
//! | [`parse_acquire_notification`] | ACQUIRE | u16 BE first pixel, then status or u16 LE pixels |
//! | [`parse_laser_state`] | LASER_STATE | 7 × u8, truncatable |
//! | [`parse_battery_state`] | BATTERY_STATE | percentage, charging flag |

use crate::error::{ProtocolError, Result};
use crate::protocol::STATUS_SENTINEL;
use crate::types::{AcquisitionStatus, BatteryState, LaserState, StatusCode};

// ── Acquire ──────────────────────────────────────────────────────────────────

/// The two payload kinds multiplexed on the Acquire characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireNotification {
    Status(AcquisitionStatus),
    Pixels { first_pixel: u16, intensities: Vec<u16> },
}

/// Decode little-endian u16 intensities (`[lsb, msb]` pairs).
///
/// Returns `None` if `data` holds an odd number of bytes.
pub fn decode_pixels_le(data: &[u8]) -> Option<Vec<u16>> {
    if data.len() % 2 != 0 {
        return None;
    }
    Some(
        data.chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
    )
}

/// Decode one Acquire notification.
///
/// Wire layout:
/// ```text
/// bytes 0–1 : first_pixel (u16 BE)
/// if first_pixel == 0xFFFF:
///     byte 2   : status code
///     bytes 3..: status payload
/// else:
///     bytes 2..: u16 LE intensities starting at pixel `first_pixel`
/// ```
pub fn parse_acquire_notification(data: &[u8]) -> Result<AcquireNotification> {
    let malformed = |reason| ProtocolError::MalformedNotification {
        channel: "ACQUIRE",
        reason,
        payload: data.to_vec(),
    };

    let [hi, lo, rest @ ..] = data else {
        return Err(malformed("shorter than the first_pixel header"));
    };
    let first_pixel = u16::from_be_bytes([*hi, *lo]);

    if first_pixel == STATUS_SENTINEL {
        let [code, payload @ ..] = rest else {
            return Err(malformed("status notification without a code"));
        };
        let status = StatusCode::from_byte(*code).ok_or_else(|| ProtocolError::UnknownStatusCode {
            code: *code,
            payload: payload.to_vec(),
        })?;
        return Ok(AcquireNotification::Status(AcquisitionStatus {
            code: status,
            payload: payload.to_vec(),
        }));
    }

    let intensities = decode_pixels_le(rest).ok_or_else(|| malformed("odd number of pixel bytes"))?;
    Ok(AcquireNotification::Pixels {
        first_pixel,
        intensities,
    })
}

// ── Laser state ──────────────────────────────────────────────────────────────

/// Decode a LASER_STATE notification.
///
/// | Byte | Field |
/// |---|---|
/// | 0 | mode |
/// | 1 | type |
/// | 2 | enable |
/// | 3 | watchdog seconds |
/// | 4–5 | reserved |
/// | 6 | status mask (bit 0 interlock closed, bit 1 firing) |
///
/// Trailing bytes may be omitted by the device; missing fields read as `0`.
/// Returns `None` for an empty notification.
pub fn parse_laser_state(data: &[u8]) -> Option<LaserState> {
    if data.is_empty() {
        return None;
    }
    let at = |i: usize| data.get(i).copied().unwrap_or(0);
    Some(LaserState {
        mode: at(0),
        laser_type: at(1),
        enable: at(2) != 0,
        watchdog_sec: at(3),
        status_mask: at(6),
    })
}

// ── Battery ──────────────────────────────────────────────────────────────────

/// Decode a BATTERY_STATE payload: `[percentage, charging]`.
///
/// Returns `None` if fewer than 2 bytes are present.
pub fn parse_battery_state(data: &[u8]) -> Option<BatteryState> {
    match data {
        [pct, charging, ..] => Some(BatteryState {
            percentage: (*pct).min(100),
            charging: *charging != 0,
        }),
        _ => None,
    }
}
