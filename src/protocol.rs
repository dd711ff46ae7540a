//! GATT UUIDs, envelope constants, and Generic-channel framing helpers.
//!
//! All UUIDs belong to the spectrometer vendor namespace
//! `d1a7XXXX-af78-4449-a34f-4da1afaf51bc`, where `XXXX` is a 16-bit
//! characteristic code.

use std::fmt;

use uuid::Uuid;

// ── UUID template ─────────────────────────────────────────────────────────────

/// Vendor UUID with the 16-bit code bits cleared.
const UUID_TEMPLATE: u128 = 0xd1a70000_af78_4449_a34f_4da1afaf51bc;

/// Build a vendor UUID from its 16-bit characteristic code.
///
/// ```
/// # use spectro_ble::protocol::uuid_for_code;
/// assert_eq!(
///     uuid_for_code(0xff0a).to_string(),
///     "d1a7ff0a-af78-4449-a34f-4da1afaf51bc"
/// );
/// ```
pub const fn uuid_for_code(code: u16) -> Uuid {
    Uuid::from_u128(UUID_TEMPLATE | ((code as u128) << 96))
}

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service advertised by the spectrometer.
pub const SERVICE_UUID: Uuid = uuid_for_code(0xff00);

// ── Characteristics ───────────────────────────────────────────────────────────

/// The four shared characteristics the device exposes.
///
/// | Variant | Code | Direction |
/// |---|---|---|
/// | `LaserState` | `ff03` | notify |
/// | `Acquire` | `ff04` | write trigger, notify status/pixels |
/// | `BatteryState` | `ff09` | notify |
/// | `Generic` | `ff0a` | write request, notify response |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Characteristic {
    LaserState,
    Acquire,
    BatteryState,
    Generic,
}

impl Characteristic {
    pub const ALL: [Characteristic; 4] = [
        Characteristic::LaserState,
        Characteristic::Acquire,
        Characteristic::BatteryState,
        Characteristic::Generic,
    ];

    pub const fn code(self) -> u16 {
        match self {
            Characteristic::LaserState => 0xff03,
            Characteristic::Acquire => 0xff04,
            Characteristic::BatteryState => 0xff09,
            Characteristic::Generic => 0xff0a,
        }
    }

    pub const fn uuid(self) -> Uuid {
        uuid_for_code(self.code())
    }

    pub const fn name(self) -> &'static str {
        match self {
            Characteristic::LaserState => "LASER_STATE",
            Characteristic::Acquire => "ACQUIRE",
            Characteristic::BatteryState => "BATTERY_STATE",
            Characteristic::Generic => "GENERIC",
        }
    }

    /// Reverse lookup used when routing notifications.
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Generic channel ───────────────────────────────────────────────────────────

/// Escalation byte. Each occurrence before an opcode moves it one tier up.
pub const NEXT_TIER: u8 = 0xff;

/// Highest tier used by the attribute catalog.
pub const MAX_TIER: u8 = 2;

/// Status byte carried in every Generic response envelope.
///
/// ```text
/// byte 0     : seq
/// byte 1     : response code
/// bytes 2..  : attribute payload (absent for plain acknowledgements)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    NoResponseFromHost,
    FpgaReadFailure,
    InvalidAttribute,
    UnsupportedCommand,
    /// Any code outside the documented range.
    UnsupportedResponseError(u8),
}

impl ResponseCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => ResponseCode::Ok,
            1 => ResponseCode::NoResponseFromHost,
            2 => ResponseCode::FpgaReadFailure,
            3 => ResponseCode::InvalidAttribute,
            4 => ResponseCode::UnsupportedCommand,
            other => ResponseCode::UnsupportedResponseError(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::NoResponseFromHost => 1,
            ResponseCode::FpgaReadFailure => 2,
            ResponseCode::InvalidAttribute => 3,
            ResponseCode::UnsupportedCommand => 4,
            ResponseCode::UnsupportedResponseError(b) => b,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Ok => f.write_str("OK"),
            ResponseCode::NoResponseFromHost => f.write_str("NO_RESPONSE_FROM_HOST (1)"),
            ResponseCode::FpgaReadFailure => f.write_str("FPGA_READ_FAILURE (2)"),
            ResponseCode::InvalidAttribute => f.write_str("INVALID_ATTRIBUTE (3)"),
            ResponseCode::UnsupportedCommand => f.write_str("UNSUPPORTED_COMMAND (4)"),
            ResponseCode::UnsupportedResponseError(b) => {
                write!(f, "UNSUPPORTED_RESPONSE_ERROR ({b})")
            }
        }
    }
}

/// A decoded Generic response envelope borrowing the notification bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericResponse<'a> {
    pub seq: u8,
    pub code: ResponseCode,
    pub payload: &'a [u8],
}

/// Prefix a registry-generated request body with its correlation id.
///
/// ```
/// # use spectro_ble::protocol::frame_generic_request;
/// assert_eq!(frame_generic_request(7, &[0xff, 0x01, 0, 2, 3]), vec![7, 0xff, 0x01, 0, 2, 3]);
/// ```
pub fn frame_generic_request(seq: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(seq);
    out.extend_from_slice(body);
    out
}

/// Split a Generic notification into seq, response code and payload.
///
/// Returns `None` when fewer than two bytes arrived; the seq alone (if any)
/// is not enough to resolve a transaction safely.
pub fn decode_generic_response(bytes: &[u8]) -> Option<GenericResponse<'_>> {
    match bytes {
        [seq, code, payload @ ..] => Some(GenericResponse {
            seq: *seq,
            code: ResponseCode::from_byte(*code),
            payload,
        }),
        _ => None,
    }
}

// ── EEPROM geometry ───────────────────────────────────────────────────────────

/// Number of 64-byte pages in the configuration EEPROM.
pub const EEPROM_PAGES: usize = 8;
/// Bytes per EEPROM page.
pub const EEPROM_PAGE_SIZE: usize = 64;
/// Bytes returned by one `EEPROM_DATA` read; sized to fit the BLE MTU.
pub const EEPROM_SUBPAGE_SIZE: usize = 16;
/// Sub-page reads needed to assemble one page.
pub const EEPROM_SUBPAGES: usize = EEPROM_PAGE_SIZE / EEPROM_SUBPAGE_SIZE;

// ── Acquire channel ───────────────────────────────────────────────────────────

/// `first_pixel` value marking an Acquire notification as a status message.
pub const STATUS_SENTINEL: u16 = 0xffff;

// ── Laser state ───────────────────────────────────────────────────────────────

/// `status_mask` bit set while the safety interlock is closed.
pub const LASER_INTERLOCK_CLOSED: u8 = 0x01;
/// `status_mask` bit set while the laser is emitting.
pub const LASER_FIRING: u8 = 0x02;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_uuids_follow_the_template() {
        assert_eq!(
            Characteristic::Acquire.uuid().to_string(),
            "d1a7ff04-af78-4449-a34f-4da1afaf51bc"
        );
        assert_eq!(
            SERVICE_UUID.to_string(),
            "d1a7ff00-af78-4449-a34f-4da1afaf51bc"
        );
        for c in Characteristic::ALL {
            assert_eq!(Characteristic::from_uuid(c.uuid()), Some(c));
        }
        assert_eq!(Characteristic::from_uuid(uuid_for_code(0x1234)), None);
    }

    #[test]
    fn response_codes_map_unknown_values() {
        assert_eq!(ResponseCode::from_byte(0), ResponseCode::Ok);
        assert_eq!(ResponseCode::from_byte(2), ResponseCode::FpgaReadFailure);
        assert_eq!(
            ResponseCode::from_byte(9),
            ResponseCode::UnsupportedResponseError(9)
        );
        assert_eq!(ResponseCode::from_byte(9).as_byte(), 9);
    }

    #[test]
    fn generic_response_needs_seq_and_code() {
        assert_eq!(decode_generic_response(&[]), None);
        assert_eq!(decode_generic_response(&[5]), None);

        let ack = decode_generic_response(&[5, 0]).unwrap();
        assert_eq!(ack.seq, 5);
        assert_eq!(ack.code, ResponseCode::Ok);
        assert!(ack.payload.is_empty());

        let r = decode_generic_response(&[9, 3, 0xaa]).unwrap();
        assert_eq!(r.code, ResponseCode::InvalidAttribute);
        assert_eq!(r.payload, &[0xaa]);
    }
}
