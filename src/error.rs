//! Error type shared by every layer of the protocol stack.
//!
//! Each variant carries enough context to diagnose a failure without a
//! packet capture: the attribute or acquisition involved, the numeric code
//! the device sent, and the raw payload when one was received.

use thiserror::Error;

use crate::protocol::ResponseCode;

/// Convenience alias for results using [`ProtocolError`].
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("attribute {0} is read-only or unknown (no setter opcode)")]
    NotWritable(&'static str),

    #[error("attribute {0} is write-only or unknown (no getter opcode)")]
    NotReadable(&'static str),

    #[error("unknown attribute name {0:?}")]
    UnknownAttribute(String),

    #[error("value {value} does not fit attribute {attribute} ({wire_size} byte(s) on the wire)")]
    ValueOutOfRange {
        attribute: &'static str,
        value: String,
        wire_size: u8,
    },

    #[error("attribute {attribute} expects a {expected} value")]
    TypeMismatch {
        attribute: &'static str,
        expected: &'static str,
    },

    #[error("all sequence numbers are in flight (seq {seq} still pending)")]
    SequencerExhausted { seq: u8 },

    #[error("attribute {0} already has a transaction in flight")]
    AttributeBusy(&'static str),

    #[error("device reported {code} for {attribute} (payload {payload:02x?})")]
    DeviceReportedError {
        attribute: &'static str,
        code: ResponseCode,
        payload: Vec<u8>,
    },

    #[error("malformed response for {attribute}: expected {expected} byte(s), got {payload:02x?}")]
    MalformedResponse {
        attribute: &'static str,
        expected: usize,
        payload: Vec<u8>,
    },

    #[error("malformed notification on {channel}: {reason} (payload {payload:02x?})")]
    MalformedNotification {
        channel: &'static str,
        reason: &'static str,
        payload: Vec<u8>,
    },

    #[error("no response for {attribute} (seq {seq}) within {timeout_ms} ms")]
    Timeout {
        attribute: &'static str,
        seq: u8,
        timeout_ms: u64,
    },

    #[error("EEPROM read aborted at page {page} sub-page {subpage}: {source}")]
    EepromReadIncomplete {
        page: u8,
        subpage: u8,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("out-of-order spectrum fragment: expected first pixel {expected}, got {got}")]
    OutOfOrderFragment { expected: usize, got: usize },

    #[error("spectrum fragment overruns the buffer: {pixels_read} + {count} > {total}")]
    OverlongFragment {
        pixels_read: usize,
        count: usize,
        total: usize,
    },

    #[error("unknown acquisition status code {code} (payload {payload:02x?})")]
    UnknownStatusCode { code: u8, payload: Vec<u8> },

    #[error("acquisition failed with status {name} ({code}): {message}")]
    AcquisitionFailed {
        code: u8,
        name: &'static str,
        message: &'static str,
    },

    #[error("an acquisition is already in flight")]
    AcquisitionInProgress,

    #[error("acquisition did not complete within {timeout_ms} ms ({pixels_read} of {total} pixels)")]
    AcquisitionTimeout {
        timeout_ms: u64,
        pixels_read: usize,
        total: usize,
    },

    #[error("read-back of {attribute} returned {actual}, wrote {expected}")]
    VerifyMismatch {
        attribute: &'static str,
        expected: String,
        actual: String,
    },

    #[error("EEPROM reports zero active pixels; cannot size a spectrum")]
    NoPixelCount,

    #[error("characteristic {0} not found on the peripheral")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session is disconnected")]
    Disconnected,
}

impl From<btleplug::Error> for ProtocolError {
    fn from(e: btleplug::Error) -> Self {
        ProtocolError::Transport(e.to_string())
    }
}
