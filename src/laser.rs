//! Laser-state push channel.
//!
//! LASER_STATE notifications are unsolicited and carry no sequence number,
//! so there is nothing to correlate: each one simply replaces the newest
//! known state. The session only reports the flags; deciding when firing is
//! safe belongs to the caller.

use log::{debug, info};
use tokio::sync::watch;

use crate::parse::parse_laser_state;
use crate::types::LaserState;

pub struct LaserStateChannel {
    tx: watch::Sender<Option<LaserState>>,
}

impl LaserStateChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Decode a notification and publish it as the newest state.
    ///
    /// Returns the decoded state, or `None` if the payload was empty.
    pub fn update(&self, data: &[u8]) -> Option<LaserState> {
        let Some(state) = parse_laser_state(data) else {
            debug!("LASER_STATE: empty notification ignored");
            return None;
        };
        let previous = self.tx.send_replace(Some(state));
        if previous.map(|p| p.firing()) != Some(state.firing()) {
            info!(
                "Laser {} (enable={}, interlock {})",
                if state.firing() { "FIRING" } else { "off" },
                state.enable,
                if state.interlock_closed() { "closed" } else { "open" }
            );
        }
        Some(state)
    }

    /// The newest state, or `None` before the first notification.
    pub fn current(&self) -> Option<LaserState> {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every new notification.
    pub fn subscribe(&self) -> watch::Receiver<Option<LaserState>> {
        self.tx.subscribe()
    }
}

impl Default for LaserStateChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_notification_wins() {
        let ch = LaserStateChannel::new();
        assert_eq!(ch.current(), None);

        ch.update(&[0, 0, 1, 10, 0, 0, 0b11]);
        assert!(ch.current().unwrap().firing());

        ch.update(&[0, 0, 0, 10, 0, 0, 0b01]);
        let s = ch.current().unwrap();
        assert!(!s.firing());
        assert!(s.interlock_closed());
        assert!(!s.enable);
    }

    #[test]
    fn empty_notifications_keep_the_previous_state() {
        let ch = LaserStateChannel::new();
        ch.update(&[0, 0, 1]);
        assert_eq!(ch.update(&[]), None);
        assert!(ch.current().unwrap().enable);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let ch = LaserStateChannel::new();
        let mut rx = ch.subscribe();
        ch.update(&[1, 2, 1, 5, 0, 0, 0b10]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().unwrap().watchdog_sec, 5);
    }
}
