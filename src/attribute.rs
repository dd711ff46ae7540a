//! Static catalog of the named attributes reachable over the Generic
//! characteristic, and the request builders that turn a name into wire bytes.
//!
//! A single opcode byte is not enough to address every setting, so opcodes
//! are grouped into tiers. The tier is the number of `0xFF` escalation bytes
//! written before the opcode:
//!
//! ```text
//! tier 0 : [opcode] [payload..]
//! tier 1 : [0xFF] [opcode] [payload..]
//! tier 2 : [0xFF] [0xFF] [opcode] [payload..]
//! ```
//!
//! The correlation id is prepended later by the session (see
//! [`crate::protocol::frame_generic_request`]).

use std::fmt;
use std::str::FromStr;

use crate::codec::{self, AttributeValue, Codec, WireFormat};
use crate::error::{ProtocolError, Result};
use crate::protocol::NEXT_TIER;

/// Every attribute the registry knows about.
///
/// Discriminant order matches [`CATALOG`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    LaserEnable,
    LaserTecMode,
    LaserWarningDelaySec,
    IntegrationTimeMs,
    GainDb,
    HighGainMode,
    DetectorTemperature,
    FirmwareVersion,
    EepromData,
    BatteryState,
    LaserWatchdogSec,
    StartLine,
    StopLine,
    ScansToAverage,
    AutoRamanMaxMs,
    AutoRamanSaturation,
    ClearDeviceErrors,
}

/// Wire behaviour of one attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSpec {
    pub attribute: Attribute,
    pub name: &'static str,
    pub tier: u8,
    pub setter: Option<u8>,
    pub getter: Option<u8>,
    pub format: WireFormat,
}

impl AttributeSpec {
    pub const fn wire_size(&self) -> u8 {
        self.format.wire_size
    }

    pub const fn epsilon(&self) -> f64 {
        self.format.epsilon
    }
}

const fn unsigned(wire_size: u8) -> WireFormat {
    WireFormat {
        codec: Codec::Unsigned,
        wire_size,
        epsilon: 0.0,
    }
}

const fn entry(
    attribute: Attribute,
    name: &'static str,
    tier: u8,
    setter: Option<u8>,
    getter: Option<u8>,
    format: WireFormat,
) -> AttributeSpec {
    AttributeSpec {
        attribute,
        name,
        tier,
        setter,
        getter,
        format,
    }
}

/// The attribute table, indexed by `Attribute as usize`.
pub static CATALOG: [AttributeSpec; 17] = [
    entry(Attribute::LaserEnable, "LASER_ENABLE", 0, Some(0xbe), Some(0xe2), unsigned(1)),
    entry(Attribute::LaserTecMode, "LASER_TEC_MODE", 0, Some(0x84), Some(0x85), unsigned(1)),
    entry(
        Attribute::LaserWarningDelaySec,
        "LASER_WARNING_DELAY_SEC",
        0,
        Some(0x8a),
        Some(0x8b),
        unsigned(1),
    ),
    entry(
        Attribute::IntegrationTimeMs,
        "INTEGRATION_TIME_MS",
        0,
        Some(0xb2),
        Some(0xbf),
        unsigned(3),
    ),
    entry(
        Attribute::GainDb,
        "GAIN_DB",
        0,
        Some(0xb7),
        Some(0xc5),
        WireFormat {
            codec: Codec::FunkyFloat,
            wire_size: 2,
            epsilon: 0.01,
        },
    ),
    entry(Attribute::HighGainMode, "HIGH_GAIN_MODE", 0, Some(0xeb), Some(0xec), unsigned(1)),
    entry(
        Attribute::DetectorTemperature,
        "DETECTOR_TEMPERATURE",
        0,
        None,
        Some(0xd7),
        unsigned(2),
    ),
    entry(Attribute::FirmwareVersion, "FIRMWARE_VERSION", 0, None, Some(0xc0), unsigned(4)),
    entry(
        Attribute::EepromData,
        "EEPROM_DATA",
        1,
        None,
        Some(0x01),
        WireFormat {
            codec: Codec::Raw,
            wire_size: crate::protocol::EEPROM_SUBPAGE_SIZE as u8,
            epsilon: 0.0,
        },
    ),
    entry(Attribute::BatteryState, "BATTERY_STATE", 1, None, Some(0x13), unsigned(2)),
    entry(
        Attribute::LaserWatchdogSec,
        "LASER_WATCHDOG_SEC",
        1,
        Some(0x18),
        Some(0x19),
        unsigned(2),
    ),
    entry(Attribute::StartLine, "START_LINE", 1, Some(0x21), Some(0x22), unsigned(2)),
    entry(Attribute::StopLine, "STOP_LINE", 1, Some(0x23), Some(0x24), unsigned(2)),
    entry(
        Attribute::ScansToAverage,
        "SCANS_TO_AVERAGE",
        1,
        Some(0x62),
        Some(0x63),
        unsigned(2),
    ),
    entry(
        Attribute::AutoRamanMaxMs,
        "AUTO_RAMAN_MAX_MS",
        2,
        Some(0x10),
        Some(0x11),
        unsigned(3),
    ),
    entry(
        Attribute::AutoRamanSaturation,
        "AUTO_RAMAN_SATURATION",
        2,
        Some(0x12),
        Some(0x13),
        unsigned(2),
    ),
    entry(
        Attribute::ClearDeviceErrors,
        "CLEAR_DEVICE_ERRORS",
        2,
        Some(0x20),
        None,
        unsigned(1),
    ),
];

impl Attribute {
    pub const ALL: [Attribute; 17] = [
        Attribute::LaserEnable,
        Attribute::LaserTecMode,
        Attribute::LaserWarningDelaySec,
        Attribute::IntegrationTimeMs,
        Attribute::GainDb,
        Attribute::HighGainMode,
        Attribute::DetectorTemperature,
        Attribute::FirmwareVersion,
        Attribute::EepromData,
        Attribute::BatteryState,
        Attribute::LaserWatchdogSec,
        Attribute::StartLine,
        Attribute::StopLine,
        Attribute::ScansToAverage,
        Attribute::AutoRamanMaxMs,
        Attribute::AutoRamanSaturation,
        Attribute::ClearDeviceErrors,
    ];

    pub fn spec(self) -> &'static AttributeSpec {
        &CATALOG[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Look an attribute up by its upper-case wire name, e.g. `"GAIN_DB"`.
    pub fn from_name(name: &str) -> Result<Attribute> {
        CATALOG
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.attribute)
            .ok_or_else(|| ProtocolError::UnknownAttribute(name.to_owned()))
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Attribute::from_name(s)
    }
}

fn tier_prefix(tier: u8, opcode: u8, capacity: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(tier as usize + 1 + capacity);
    out.extend(std::iter::repeat(NEXT_TIER).take(tier as usize));
    out.push(opcode);
    out
}

/// Build the request body that sets `attribute` to `value`.
///
/// ```
/// # use spectro_ble::attribute::{write_request, Attribute};
/// let body = write_request(Attribute::IntegrationTimeMs, &250u64.into()).unwrap();
/// assert_eq!(body, vec![0xb2, 0x00, 0x00, 0xfa]);
/// ```
pub fn write_request(attribute: Attribute, value: &AttributeValue) -> Result<Vec<u8>> {
    let spec = attribute.spec();
    let setter = spec.setter.ok_or(ProtocolError::NotWritable(spec.name))?;
    let payload = codec::serialize(spec.name, &spec.format, value)?;
    let mut out = tier_prefix(spec.tier, setter, payload.len());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Build the request body that reads `attribute`.
///
/// `args` is appended after the getter opcode; most attributes take none,
/// `EEPROM_DATA` takes `[page_hi, page, subpage]`.
pub fn read_request(attribute: Attribute, args: &[u8]) -> Result<Vec<u8>> {
    let spec = attribute.spec();
    let getter = spec.getter.ok_or(ProtocolError::NotReadable(spec.name))?;
    let mut out = tier_prefix(spec.tier, getter, args.len());
    out.extend_from_slice(args);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_TIER;

    #[test]
    fn catalog_is_indexed_by_discriminant() {
        for (i, attr) in Attribute::ALL.iter().enumerate() {
            assert_eq!(CATALOG[i].attribute, *attr);
            assert_eq!(attr.spec().attribute, *attr);
            assert!(attr.spec().tier <= MAX_TIER);
            assert!(attr.spec().setter.is_some() || attr.spec().getter.is_some());
        }
    }

    #[test]
    fn names_resolve_both_ways() {
        for attr in Attribute::ALL {
            assert_eq!(Attribute::from_name(attr.name()).unwrap(), attr);
        }
        assert_eq!("gain_db".parse::<Attribute>().unwrap(), Attribute::GainDb);
        assert!(matches!(
            Attribute::from_name("FLUX_CAPACITOR"),
            Err(ProtocolError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn integration_time_writes_three_byte_big_endian() {
        let body = write_request(Attribute::IntegrationTimeMs, &250u64.into()).unwrap();
        assert_eq!(body, vec![0xb2, 0x00, 0x00, 0xfa]);
        assert_eq!(read_request(Attribute::IntegrationTimeMs, &[]).unwrap(), vec![0xbf]);
    }

    #[test]
    fn tiers_prefix_escalation_bytes() {
        assert_eq!(
            write_request(Attribute::StartLine, &250u64.into()).unwrap(),
            vec![0xff, 0x21, 0x00, 0xfa]
        );
        assert_eq!(
            read_request(Attribute::AutoRamanMaxMs, &[]).unwrap(),
            vec![0xff, 0xff, 0x11]
        );
        assert_eq!(
            read_request(Attribute::EepromData, &[0, 3, 2]).unwrap(),
            vec![0xff, 0x01, 0x00, 0x03, 0x02]
        );
    }

    #[test]
    fn gain_uses_the_funky_float() {
        assert_eq!(
            write_request(Attribute::GainDb, &8.5.into()).unwrap(),
            vec![0xb7, 8, 128]
        );
    }

    #[test]
    fn missing_opcodes_are_rejected() {
        assert!(matches!(
            write_request(Attribute::EepromData, &vec![0u8; 16].into()),
            Err(ProtocolError::NotWritable("EEPROM_DATA"))
        ));
        assert!(matches!(
            write_request(Attribute::FirmwareVersion, &1u64.into()),
            Err(ProtocolError::NotWritable("FIRMWARE_VERSION"))
        ));
        assert!(matches!(
            read_request(Attribute::ClearDeviceErrors, &[]),
            Err(ProtocolError::NotReadable("CLEAR_DEVICE_ERRORS"))
        ));
    }
}
