//! The transport seam between the protocol and a BLE stack.
//!
//! The protocol needs exactly three capabilities from the link: subscribe to a
//! characteristic, write bytes to one, and a single ordered stream of every
//! notification. [`crate::ble::BleTransport`] provides them over btleplug.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::protocol::Characteristic;

/// One notification, already mapped to its characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Characteristic,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, characteristic: Characteristic) -> Result<()>;

    async fn write(&self, characteristic: Characteristic, data: &[u8]) -> Result<()>;

    /// Every notification from every subscribed characteristic, in arrival
    /// order. Ends when the link drops.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport: writes go to a channel the test reads, and the
    //! test pushes notifications back.

    use std::sync::Mutex;

    use futures::channel::mpsc;
    use futures::StreamExt;

    use super::*;
    use crate::error::ProtocolError;

    pub(crate) type Writes = mpsc::UnboundedReceiver<(Characteristic, Vec<u8>)>;
    pub(crate) type Notify = mpsc::UnboundedSender<Notification>;

    pub(crate) struct MockTransport {
        writes: mpsc::UnboundedSender<(Characteristic, Vec<u8>)>,
        notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
        pub(crate) subscribed: Mutex<Vec<Characteristic>>,
    }

    pub(crate) fn pair() -> (MockTransport, Writes, Notify) {
        let (write_tx, write_rx) = mpsc::unbounded();
        let (notify_tx, notify_rx) = mpsc::unbounded();
        let transport = MockTransport {
            writes: write_tx,
            notifications: Mutex::new(Some(notify_rx)),
            subscribed: Mutex::new(Vec::new()),
        };
        (transport, write_rx, notify_tx)
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn subscribe(&self, characteristic: Characteristic) -> Result<()> {
            self.subscribed.lock().unwrap().push(characteristic);
            Ok(())
        }

        async fn write(&self, characteristic: Characteristic, data: &[u8]) -> Result<()> {
            self.writes
                .unbounded_send((characteristic, data.to_vec()))
                .map_err(|_| ProtocolError::Transport("mock device gone".into()))
        }

        async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
            self.notifications
                .lock()
                .unwrap()
                .take()
                .map(|rx| rx.boxed())
                .ok_or_else(|| ProtocolError::Transport("notifications already taken".into()))
        }
    }
}
