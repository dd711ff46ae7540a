//! Correlation ids for the Generic characteristic.
//!
//! BLE gives no request/response pairing for a write followed by a
//! notification, so every request carries a one-byte `seq` and the device
//! echoes it in the response. The sequencer keeps a fixed arena of 256 slots,
//! one per seq value, so "every id is in flight" is a checkable condition
//! rather than unbounded growth.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::attribute::Attribute;
use crate::codec::AttributeValue;
use crate::error::{ProtocolError, Result};

/// Number of distinct seq values.
pub const SEQ_SPACE: usize = 256;

/// Completion side of a transaction: the decoded value for reads, `None`
/// for write acknowledgements.
pub type Responder = oneshot::Sender<Result<Option<AttributeValue>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// One unresolved transaction.
#[derive(Debug)]
pub struct PendingRequest {
    pub seq: u8,
    pub attribute: Attribute,
    pub kind: RequestKind,
    pub created_at: Instant,
    /// Distinguishes successive occupants of the same slot.
    pub generation: u64,
    /// `None` for fire-and-forget writes; their acknowledgement is dropped.
    pub responder: Option<Responder>,
}

/// Handle returned by [`RequestSequencer::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub seq: u8,
    pub generation: u64,
}

pub struct RequestSequencer {
    next: u8,
    generation: u64,
    stale_after: Duration,
    slots: Vec<Option<PendingRequest>>,
}

impl RequestSequencer {
    /// `stale_after` bounds how long an unanswered slot may stay occupied.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            next: 0,
            generation: 0,
            stale_after,
            slots: (0..SEQ_SPACE).map(|_| None).collect(),
        }
    }

    /// Reserve the next seq for `attribute`.
    ///
    /// Fails with [`ProtocolError::SequencerExhausted`] when the candidate seq
    /// still belongs to an unresolved request; the counter does not move in
    /// that case, so the caller has to wait for the oldest request to clear.
    pub fn allocate(
        &mut self,
        attribute: Attribute,
        kind: RequestKind,
        responder: Option<Responder>,
    ) -> Result<Ticket> {
        self.sweep(Instant::now());

        let seq = self.next;
        let slot = &mut self.slots[seq as usize];
        if slot.is_some() {
            return Err(ProtocolError::SequencerExhausted { seq });
        }

        self.generation += 1;
        *slot = Some(PendingRequest {
            seq,
            attribute,
            kind,
            created_at: Instant::now(),
            generation: self.generation,
            responder,
        });
        self.next = seq.wrapping_add(1);

        Ok(Ticket {
            seq,
            generation: self.generation,
        })
    }

    /// Take the pending request for `seq`, or `None` for an orphan.
    pub fn resolve(&mut self, seq: u8) -> Option<PendingRequest> {
        self.slots[seq as usize].take()
    }

    /// Drop the request identified by `ticket` after a local timeout.
    ///
    /// Returns `false` if the slot was already resolved or now belongs to a
    /// newer request.
    pub fn cancel(&mut self, ticket: Ticket) -> bool {
        let slot = &mut self.slots[ticket.seq as usize];
        if slot
            .as_ref()
            .is_some_and(|p| p.generation == ticket.generation)
        {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Expire requests older than the stale age, failing their waiters with
    /// [`ProtocolError::Timeout`]. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for slot in self.slots.iter_mut() {
            let stale = matches!(slot, Some(p) if now.duration_since(p.created_at) >= self.stale_after);
            if !stale {
                continue;
            }
            if let Some(p) = slot.take() {
                expired += 1;
                if let Some(responder) = p.responder {
                    warn!("seq {} ({}) expired without a response", p.seq, p.attribute);
                    let _ = responder.send(Err(ProtocolError::Timeout {
                        attribute: p.attribute.name(),
                        seq: p.seq,
                        timeout_ms: self.stale_after.as_millis() as u64,
                    }));
                } else {
                    debug!("seq {} ({}) fire-and-forget expired", p.seq, p.attribute);
                }
            }
        }
        expired
    }

    /// Remove every pending request, e.g. when the link drops.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_pending(&self, seq: u8) -> bool {
        self.slots[seq as usize].is_some()
    }

    /// Whether any unresolved request, acknowledged or not, targets `attribute`.
    pub fn is_attribute_pending(&self, attribute: Attribute) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|p| p.attribute == attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> RequestSequencer {
        RequestSequencer::new(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn seqs_increment_and_wrap() {
        let mut s = sequencer();
        for expected in 0..=255u8 {
            let t = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
            assert_eq!(t.seq, expected);
            assert!(s.resolve(t.seq).is_some());
        }
        let t = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
        assert_eq!(t.seq, 0);
    }

    #[tokio::test]
    async fn the_257th_concurrent_request_is_refused() {
        let mut s = sequencer();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..SEQ_SPACE {
            let t = s
                .allocate(Attribute::IntegrationTimeMs, RequestKind::Write, None)
                .unwrap();
            assert!(seen.insert(t.seq), "seq {} handed out twice", t.seq);
        }
        assert_eq!(s.in_flight(), SEQ_SPACE);
        assert!(matches!(
            s.allocate(Attribute::IntegrationTimeMs, RequestKind::Write, None),
            Err(ProtocolError::SequencerExhausted { seq: 0 })
        ));

        // Freeing the oldest slot lets exactly one more through.
        assert!(s.resolve(0).is_some());
        assert_eq!(
            s.allocate(Attribute::IntegrationTimeMs, RequestKind::Write, None)
                .unwrap()
                .seq,
            0
        );
    }

    #[tokio::test]
    async fn an_unresolved_seq_is_never_reused() {
        let mut s = sequencer();
        let held = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
        for _ in 0..255 {
            let t = s.allocate(Attribute::StartLine, RequestKind::Read, None).unwrap();
            assert_ne!(t.seq, held.seq);
            s.resolve(t.seq);
        }
        // Counter is back at the held seq.
        assert!(matches!(
            s.allocate(Attribute::StartLine, RequestKind::Read, None),
            Err(ProtocolError::SequencerExhausted { seq }) if seq == held.seq
        ));
    }

    #[tokio::test]
    async fn resolving_an_unknown_seq_is_none() {
        let mut s = sequencer();
        assert!(s.resolve(42).is_none());
    }

    #[tokio::test]
    async fn cancel_checks_the_generation() {
        let mut s = sequencer();
        let first = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
        s.resolve(first.seq);
        for _ in 0..255 {
            let t = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
            s.resolve(t.seq);
        }
        let second = s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
        assert_eq!(second.seq, first.seq);
        assert!(!s.cancel(first));
        assert!(s.is_pending(second.seq));
        assert!(s.cancel(second));
        assert!(!s.is_pending(second.seq));
    }

    #[tokio::test]
    async fn drain_empties_every_slot() {
        let mut s = sequencer();
        for _ in 0..3 {
            s.allocate(Attribute::GainDb, RequestKind::Read, None).unwrap();
        }
        let drained = s.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(s.in_flight(), 0);
        assert_eq!(drained[2].seq, 2);
    }

    #[tokio::test]
    async fn pending_requests_are_found_by_attribute() {
        let mut s = sequencer();
        assert!(!s.is_attribute_pending(Attribute::LaserEnable));
        let t = s
            .allocate(Attribute::LaserEnable, RequestKind::Write, None)
            .unwrap();
        assert!(s.is_attribute_pending(Attribute::LaserEnable));
        assert!(!s.is_attribute_pending(Attribute::GainDb));
        s.resolve(t.seq);
        assert!(!s.is_attribute_pending(Attribute::LaserEnable));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_requests_time_out() {
        let mut s = RequestSequencer::new(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        let t = s
            .allocate(Attribute::GainDb, RequestKind::Read, Some(tx))
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(s.sweep(Instant::now()), 1);
        assert!(!s.is_pending(t.seq));
        assert!(matches!(
            rx.await.unwrap(),
            Err(ProtocolError::Timeout { attribute: "GAIN_DB", .. })
        ));
    }
}
