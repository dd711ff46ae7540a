//! Configuration for [`crate::ble`] and [`crate::session::Session`].
//!
//! Plain structs with sensible defaults; override fields with struct-update
//! syntax, e.g. `SessionConfig { attribute_timeout: Duration::from_secs(5), ..Default::default() }`.

use std::time::Duration;

/// How to find and connect to a spectrometer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Match peripherals whose advertised name starts with this string.
    /// Default: `"WP-"`.
    pub name_prefix: String,
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Upper bound on `connect()` plus service discovery. Default: `10`.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name_prefix: "WP-".into(),
            scan_timeout_secs: 15,
            connect_timeout_secs: 10,
        }
    }
}

/// Protocol timing for a [`crate::session::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long one Generic transaction may wait for its response. Default: 3 s.
    pub attribute_timeout: Duration,
    /// Age after which an unanswered seq slot is reclaimed, even if nobody
    /// cancelled it. Must exceed `attribute_timeout`; [`crate::session::Session::start`]
    /// raises it to twice the attribute timeout otherwise. Default: 10 s.
    pub stale_request_age: Duration,
    /// Fixed part of every acquisition timeout. Default: 5 s.
    pub acquisition_timeout_base: Duration,
    /// Extra time granted to auto-Raman for exposure optimisation and laser
    /// warmup. Default: 30 s.
    pub acquisition_auto_margin: Duration,
    /// Integration time assumed until one has been read or written. Default: 1000 ms.
    pub default_integration_time_ms: u64,
    /// Capacity of the event channel; events are dropped when it is full.
    /// Default: 256.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attribute_timeout: Duration::from_secs(3),
            stale_request_age: Duration::from_secs(10),
            acquisition_timeout_base: Duration::from_secs(5),
            acquisition_auto_margin: Duration::from_secs(30),
            default_integration_time_ms: 1000,
            event_capacity: 256,
        }
    }
}
