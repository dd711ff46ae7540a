//! # spectro-ble
//!
//! Async Rust client for handheld Raman spectrometers that speak a
//! seq-correlated attribute protocol over Bluetooth Low Energy.
//!
//! ## GATT layout
//!
//! | Characteristic | UUID | Direction | Carries |
//! |---|---|---|---|
//! | LASER_STATE | `d1a7ff03-…` | notify | laser mode, enable, watchdog, interlock/firing flags |
//! | ACQUIRE | `d1a7ff04-…` | write + notify | acquisition trigger; spectrum fragments and status codes |
//! | BATTERY_STATE | `d1a7ff09-…` | notify | charge percentage and charging flag |
//! | GENERIC | `d1a7ff0a-…` | write + notify | `[seq][0xFF…][opcode][payload]` requests and `[seq][code][payload]` responses |
//!
//! Every attribute (integration time, gain, laser enable, EEPROM sub-pages …)
//! is a closed [`attribute::Attribute`] variant with a static wire description,
//! so there is no string dispatch on the hot path.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spectro_ble::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default();
//!     let (peripheral, name) = find_spectrometer(&config).await?;
//!     let transport = BleTransport::connect(peripheral, name, &config).await?;
//!     let (session, _events) = Session::start(Arc::new(transport), SessionConfig::default()).await?;
//!
//!     session.write(Attribute::IntegrationTimeMs, 400u64).await?;
//!     let spectrum = session.acquire(AcquisitionMode::Plain).await?;
//!     println!("{} pixels, peak {:?}", spectrum.len(), spectrum.peak());
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`session`] | The public async API: attribute I/O, EEPROM, acquisition, push channels |
//! | [`ble`] | btleplug transport and device discovery |
//! | [`transport`] | The [`transport::Transport`] seam the session runs over |
//! | [`attribute`] | Attribute catalog and request-body builders |
//! | [`codec`] | Unsigned, 8.8 "funky float" and raw value encodings |
//! | [`sequencer`] | 256-slot seq arena correlating requests and responses |
//! | [`dispatcher`] | Routes Generic responses to their waiting requests |
//! | [`eeprom`] | Paged EEPROM reader and field schema |
//! | [`acquisition`] | Spectrum fragment reassembly and status handling |
//! | [`laser`] | Latest-value laser state channel |
//! | [`types`] | Event and data types produced by the session |
//! | [`protocol`] | GATT UUIDs, response codes, framing and geometry constants |
//! | [`parse`] | Byte decoders for the notify-only characteristics |
//! | [`config`] | Scan and session timing configuration |
//! | [`error`] | [`error::ProtocolError`] |

pub mod acquisition;
pub mod attribute;
pub mod ble;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod eeprom;
pub mod error;
pub mod laser;
pub mod parse;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Connection ────────────────────────────────────────────────────────────
    pub use crate::ble::{find_spectrometer, BleTransport};
    pub use crate::config::{ClientConfig, SessionConfig};
    pub use crate::session::Session;
    pub use crate::transport::Transport;

    // ── Attributes ────────────────────────────────────────────────────────────
    pub use crate::attribute::Attribute;
    pub use crate::codec::AttributeValue;
    pub use crate::eeprom::{EepromImage, EepromSummary};

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::types::{
        AcquisitionMode, AcquisitionPhase, AcquisitionStatus, BatteryState, LaserState, Spectrum,
        SpectrometerEvent, StatusCode,
    };

    pub use crate::error::{ProtocolError, Result};
}
