//! Reconstruction of the 8 × 64-byte configuration EEPROM over BLE.
//!
//! A page does not fit in one notification, so each page is fetched as four
//! 16-byte sub-pages through the `EEPROM_DATA` attribute. Reads are issued
//! one at a time; the image only exists once all 32 have succeeded.
//!
//! Individual settings are then pulled out with a static
//! `(page, offset, length, type)` schema. Multi-byte fields are little-endian.

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;

use crate::attribute::Attribute;
use crate::codec::AttributeValue;
use crate::error::{ProtocolError, Result};
use crate::protocol::{EEPROM_PAGES, EEPROM_PAGE_SIZE, EEPROM_SUBPAGES, EEPROM_SUBPAGE_SIZE};

/// Anything that can perform a Generic attribute read.
///
/// Implemented by [`crate::session::Session`]; tests substitute a fake.
#[async_trait]
pub trait AttributeReader: Send + Sync {
    async fn read_attribute(&self, attribute: Attribute, args: &[u8]) -> Result<AttributeValue>;
}

/// A complete EEPROM image. Only [`read_image`] and [`EepromImage::from_pages`]
/// construct one, so a partial image is never observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromImage {
    pages: [[u8; EEPROM_PAGE_SIZE]; EEPROM_PAGES],
}

/// Read all pages, sub-page by sub-page.
///
/// Any failed sub-page aborts the whole read with
/// [`ProtocolError::EepromReadIncomplete`]; the reader does not retry.
pub async fn read_image<R>(reader: &R) -> Result<EepromImage>
where
    R: AttributeReader + ?Sized,
{
    let mut pages = [[0u8; EEPROM_PAGE_SIZE]; EEPROM_PAGES];

    for (page, buf) in pages.iter_mut().enumerate() {
        for subpage in 0..EEPROM_SUBPAGES {
            let incomplete = |source: ProtocolError| ProtocolError::EepromReadIncomplete {
                page: page as u8,
                subpage: subpage as u8,
                source: Box::new(source),
            };

            let args = [0, page as u8, subpage as u8];
            let value = reader
                .read_attribute(Attribute::EepromData, &args)
                .await
                .map_err(incomplete)?;

            let chunk = match value.as_bytes() {
                Some(b) if b.len() == EEPROM_SUBPAGE_SIZE => b,
                _ => {
                    return Err(incomplete(ProtocolError::MalformedResponse {
                        attribute: Attribute::EepromData.name(),
                        expected: EEPROM_SUBPAGE_SIZE,
                        payload: value.as_bytes().map(<[u8]>::to_vec).unwrap_or_default(),
                    }))
                }
            };
            let start = subpage * EEPROM_SUBPAGE_SIZE;
            buf[start..start + EEPROM_SUBPAGE_SIZE].copy_from_slice(chunk);
        }
        debug!("EEPROM: page {page} read");
    }

    info!("EEPROM: {} pages read", EEPROM_PAGES);
    Ok(EepromImage { pages })
}

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    F32,
    Bool,
    Str,
}

/// Location and type of one EEPROM setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromField {
    pub name: &'static str,
    pub page: u8,
    pub offset: u8,
    pub len: u8,
    pub kind: FieldKind,
}

const fn field(name: &'static str, page: u8, offset: u8, len: u8, kind: FieldKind) -> EepromField {
    EepromField {
        name,
        page,
        offset,
        len,
        kind,
    }
}

pub mod fields {
    use super::{field, EepromField, FieldKind};

    pub const MODEL: EepromField = field("model", 0, 0, 16, FieldKind::Str);
    pub const SERIAL_NUMBER: EepromField = field("serial_number", 0, 16, 16, FieldKind::Str);
    pub const BAUD_RATE: EepromField = field("baud_rate", 0, 32, 4, FieldKind::U32);
    pub const HAS_COOLING: EepromField = field("has_cooling", 0, 36, 1, FieldKind::Bool);
    pub const HAS_BATTERY: EepromField = field("has_battery", 0, 37, 1, FieldKind::Bool);
    pub const HAS_LASER: EepromField = field("has_laser", 0, 38, 1, FieldKind::Bool);
    pub const FORMAT: EepromField = field("format", 0, 63, 1, FieldKind::U8);

    pub const WAVECAL_C0: EepromField = field("wavecal_c0", 1, 0, 4, FieldKind::F32);
    pub const WAVECAL_C1: EepromField = field("wavecal_c1", 1, 4, 4, FieldKind::F32);
    pub const WAVECAL_C2: EepromField = field("wavecal_c2", 1, 8, 4, FieldKind::F32);
    pub const WAVECAL_C3: EepromField = field("wavecal_c3", 1, 12, 4, FieldKind::F32);

    pub const DETECTOR: EepromField = field("detector", 2, 0, 16, FieldKind::Str);
    pub const ACTIVE_PIXELS_HORIZONTAL: EepromField =
        field("active_pixels_horizontal", 2, 16, 2, FieldKind::U16);
    pub const ACTIVE_PIXELS_VERTICAL: EepromField =
        field("active_pixels_vertical", 2, 19, 2, FieldKind::U16);
    pub const WAVECAL_C4: EepromField = field("wavecal_c4", 2, 21, 4, FieldKind::F32);

    /// Wavelength polynomial coefficients, lowest order first.
    pub const WAVECAL: [EepromField; 5] = [WAVECAL_C0, WAVECAL_C1, WAVECAL_C2, WAVECAL_C3, WAVECAL_C4];
}

/// A decoded EEPROM field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u32),
    Float(f32),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl EepromImage {
    /// Build an image from already-complete pages.
    pub fn from_pages(pages: [[u8; EEPROM_PAGE_SIZE]; EEPROM_PAGES]) -> Self {
        Self { pages }
    }

    pub fn page(&self, index: usize) -> Option<&[u8; EEPROM_PAGE_SIZE]> {
        self.pages.get(index)
    }

    /// The raw bytes behind `field`, or `None` if the schema entry falls
    /// outside its page.
    pub fn bytes(&self, field: &EepromField) -> Option<&[u8]> {
        let page = self.pages.get(field.page as usize)?;
        let start = field.offset as usize;
        page.get(start..start + field.len as usize)
    }

    pub fn field(&self, field: &EepromField) -> Option<FieldValue> {
        let b = self.bytes(field)?;
        Some(match (field.kind, b) {
            (FieldKind::U8, [v, ..]) => FieldValue::Unsigned(*v as u32),
            (FieldKind::U16, [lo, hi, ..]) => FieldValue::Unsigned(u16::from_le_bytes([*lo, *hi]) as u32),
            (FieldKind::U32, [a, b, c, d, ..]) => FieldValue::Unsigned(u32::from_le_bytes([*a, *b, *c, *d])),
            (FieldKind::F32, [a, b, c, d, ..]) => FieldValue::Float(f32::from_le_bytes([*a, *b, *c, *d])),
            (FieldKind::Bool, [v, ..]) => FieldValue::Bool(*v != 0),
            (FieldKind::Str, _) => {
                let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
                FieldValue::Text(String::from_utf8_lossy(&b[..end]).trim().to_owned())
            }
            // Schema entry narrower than its type.
            _ => return None,
        })
    }

    pub fn active_pixels_horizontal(&self) -> usize {
        self.field(&fields::ACTIVE_PIXELS_HORIZONTAL)
            .and_then(|v| v.as_u32())
            .unwrap_or(0) as usize
    }

    pub fn summary(&self) -> EepromSummary {
        let text = |f: &EepromField| {
            self.field(f)
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default()
        };
        let unsigned = |f: &EepromField| self.field(f).and_then(|v| v.as_u32()).unwrap_or(0);

        EepromSummary {
            format: unsigned(&fields::FORMAT) as u8,
            model: text(&fields::MODEL),
            serial_number: text(&fields::SERIAL_NUMBER),
            detector: text(&fields::DETECTOR),
            active_pixels_horizontal: unsigned(&fields::ACTIVE_PIXELS_HORIZONTAL) as u16,
            active_pixels_vertical: unsigned(&fields::ACTIVE_PIXELS_VERTICAL) as u16,
            wavelength_coeffs: fields::WAVECAL.map(|f| {
                self.field(&f).and_then(|v| v.as_f32()).unwrap_or(0.0)
            }),
        }
    }
}

/// The handful of EEPROM fields the session and demo binary care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EepromSummary {
    pub format: u8,
    pub model: String,
    pub serial_number: String,
    pub detector: String,
    pub active_pixels_horizontal: u16,
    pub active_pixels_vertical: u16,
    pub wavelength_coeffs: [f32; 5],
}

impl EepromSummary {
    /// Wavelength in nm of every pixel: `Σ cᵢ · pixelⁱ`.
    pub fn wavelengths(&self) -> Vec<f64> {
        (0..self.active_pixels_horizontal)
            .map(|px| {
                let x = px as f64;
                self.wavelength_coeffs
                    .iter()
                    .rev()
                    .fold(0.0, |acc, &c| acc * x + c as f64)
            })
            .collect()
    }
}
