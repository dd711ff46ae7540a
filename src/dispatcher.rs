//! Routing of Generic-channel notifications to their waiting transactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::codec;
use crate::error::ProtocolError;
use crate::protocol::{decode_generic_response, ResponseCode};
use crate::sequencer::{RequestKind, RequestSequencer};

/// What [`ResponseDispatcher::dispatch`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A waiting transaction was completed (successfully or with an error).
    Resolved { seq: u8 },
    /// A fire-and-forget write was acknowledged; nobody was waiting.
    Acknowledged { seq: u8 },
    /// No pending request had this seq (late or duplicate response).
    Orphan { seq: u8 },
    /// Too short to carry a seq and response code.
    Malformed,
}

/// Decodes every notification on the Generic characteristic and resolves
/// the matching [`crate::sequencer::PendingRequest`].
///
/// The dispatcher never retries; device-reported errors are handed to the
/// caller, which decides whether to retry or abort.
pub struct ResponseDispatcher {
    sequencer: Arc<Mutex<RequestSequencer>>,
    orphans: AtomicU64,
}

impl ResponseDispatcher {
    pub fn new(sequencer: Arc<Mutex<RequestSequencer>>) -> Self {
        Self {
            sequencer,
            orphans: AtomicU64::new(0),
        }
    }

    /// Responses that arrived with no matching request since construction.
    ///
    /// A steadily climbing count usually means the attribute timeout is
    /// shorter than the link's real round-trip time.
    pub fn orphaned_responses(&self) -> u64 {
        self.orphans.load(Ordering::Relaxed)
    }

    pub fn dispatch(&self, data: &[u8]) -> Dispatch {
        let Some(response) = decode_generic_response(data) else {
            warn!("Generic: dropping short notification {data:02x?}");
            return Dispatch::Malformed;
        };
        let seq = response.seq;

        let pending = self
            .sequencer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(seq);

        let Some(pending) = pending else {
            let n = self.orphans.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= 5 || n % 100 == 0 {
                warn!(
                    "Generic: orphan response seq={seq} code={} ({n} so far)",
                    response.code
                );
            } else {
                debug!("Generic: orphan response seq={seq}");
            }
            return Dispatch::Orphan { seq };
        };

        let name = pending.attribute.name();
        let Some(responder) = pending.responder else {
            if response.code == ResponseCode::Ok {
                debug!("Generic: {name} seq={seq} acknowledged");
            } else {
                warn!("Generic: unacknowledged write of {name} failed with {}", response.code);
            }
            return Dispatch::Acknowledged { seq };
        };

        let outcome = if response.code != ResponseCode::Ok {
            Err(ProtocolError::DeviceReportedError {
                attribute: name,
                code: response.code,
                payload: response.payload.to_vec(),
            })
        } else {
            match pending.kind {
                RequestKind::Write => Ok(None),
                RequestKind::Read => {
                    codec::deserialize(name, &pending.attribute.spec().format, response.payload)
                        .map(Some)
                }
            }
        };

        debug!(
            "Generic: {name} seq={seq} resolved in {:?} ({})",
            pending.created_at.elapsed(),
            if outcome.is_ok() { "ok" } else { "error" }
        );
        if responder.send(outcome).is_err() {
            debug!("Generic: waiter for {name} seq={seq} already gone");
        }
        Dispatch::Resolved { seq }
    }
}
