//! One connection to one spectrometer.
//!
//! A [`Session`] owns everything that used to be ambient connection state:
//! the transport, the seq arena, the response dispatcher, the cached EEPROM
//! image, the single acquisition slot and the laser/battery channels. A
//! background task (the *pump*) reads the merged notification stream and
//! routes each notification by characteristic:
//!
//! | Characteristic | Handler |
//! |---|---|
//! | GENERIC | [`ResponseDispatcher`] resolves the waiting request |
//! | ACQUIRE | [`AcquisitionReassembler`] of the in-flight acquisition |
//! | LASER_STATE | [`LaserStateChannel`] |
//! | BATTERY_STATE | battery watch channel |
//!
//! Requests complete through per-request oneshot channels; unsolicited
//! traffic is surfaced as [`SpectrometerEvent`]s on the receiver returned by
//! [`Session::start`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::acquisition::{AcquisitionReassembler, Progress};
use crate::attribute::{read_request, write_request, Attribute};
use crate::codec::{self, AttributeValue};
use crate::config::SessionConfig;
use crate::dispatcher::{Dispatch, ResponseDispatcher};
use crate::eeprom::{self, AttributeReader, EepromImage, EepromSummary};
use crate::error::{ProtocolError, Result};
use crate::laser::LaserStateChannel;
use crate::parse::parse_battery_state;
use crate::protocol::{frame_generic_request, Characteristic};
use crate::sequencer::{RequestKind, RequestSequencer};
use crate::transport::{Notification, Transport};
use crate::types::{AcquisitionMode, BatteryState, LaserState, Spectrum, SpectrometerEvent};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InFlightAcquisition {
    id: u64,
    reassembler: AcquisitionReassembler,
    done: Option<oneshot::Sender<Result<Spectrum>>>,
}

/// State touched by both the pump task and callers.
struct Shared {
    sequencer: Arc<Mutex<RequestSequencer>>,
    dispatcher: ResponseDispatcher,
    acquisition: Mutex<Option<InFlightAcquisition>>,
    laser: LaserStateChannel,
    battery: watch::Sender<Option<BatteryState>>,
    events: mpsc::Sender<SpectrometerEvent>,
    connected: AtomicBool,
}

impl Shared {
    fn emit(&self, event: SpectrometerEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("event dropped: {e}");
        }
    }

    fn handle(&self, n: Notification) {
        match n.characteristic {
            Characteristic::Generic => {
                if let Dispatch::Orphan { seq } = self.dispatcher.dispatch(&n.value) {
                    self.emit(SpectrometerEvent::OrphanResponse { seq });
                }
            }
            Characteristic::Acquire => self.on_acquire(&n.value),
            Characteristic::LaserState => {
                if let Some(state) = self.laser.update(&n.value) {
                    self.emit(SpectrometerEvent::LaserState(state));
                }
            }
            Characteristic::BatteryState => match parse_battery_state(&n.value) {
                Some(state) => {
                    self.battery.send_replace(Some(state));
                    self.emit(SpectrometerEvent::Battery(state));
                }
                None => warn!("BATTERY_STATE: short notification {:02x?}", n.value),
            },
        }
    }

    fn on_acquire(&self, data: &[u8]) {
        let mut slot = lock(&self.acquisition);
        let Some(acq) = slot.as_mut() else {
            debug!("Acquire: {} bytes with no acquisition in flight", data.len());
            return;
        };

        let before = acq.reassembler.phase();
        let outcome = acq.reassembler.feed(data);
        let after = acq.reassembler.phase();
        if after != before {
            self.emit(SpectrometerEvent::Phase(after));
        }

        let finished = match outcome {
            Ok(Progress::Pending { .. }) => None,
            Ok(Progress::Status(status)) => {
                self.emit(SpectrometerEvent::AcquisitionStatus(status));
                None
            }
            Ok(Progress::Complete(spectrum)) => Some(Ok(spectrum)),
            Err(e) => Some(Err(e)),
        };

        if let Some(result) = finished {
            if let Some(done) = slot.take().and_then(|mut a| a.done.take()) {
                let _ = done.send(result);
            }
        }
    }

    /// Fail everything that is waiting. Runs at most once.
    fn shutdown(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let pending = lock(&self.sequencer).drain();
        if !pending.is_empty() {
            warn!("link lost with {} request(s) in flight", pending.len());
        }
        for p in pending {
            if let Some(responder) = p.responder {
                let _ = responder.send(Err(ProtocolError::Disconnected));
            }
        }
        if let Some(done) = lock(&self.acquisition).take().and_then(|mut a| a.done.take()) {
            let _ = done.send(Err(ProtocolError::Disconnected));
        }
        self.emit(SpectrometerEvent::Disconnected);
    }
}

async fn pump(mut notifications: BoxStream<'static, Notification>, shared: Arc<Shared>) {
    let mut count: u64 = 0;
    while let Some(n) = notifications.next().await {
        count += 1;
        if count <= 5 || count % 500 == 0 {
            debug!(
                "notification #{count} on {}: {} bytes",
                n.characteristic,
                n.value.len()
            );
        }
        shared.handle(n);
    }
    info!("notification stream ended after {count} notification(s)");
    shared.shutdown();
}

/// Releases an attribute's in-flight claim when the transaction ends,
/// however it ends.
struct AttributeClaim<'a> {
    claimed: &'a Mutex<HashSet<Attribute>>,
    attribute: Attribute,
}

impl Drop for AttributeClaim<'_> {
    fn drop(&mut self) {
        lock(self.claimed).remove(&self.attribute);
    }
}

/// An open protocol session over a [`Transport`].
///
/// Dropping the session stops the notification pump; call
/// [`Session::disconnect`] first to also drop the BLE link.
pub struct Session {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    config: SessionConfig,
    claimed: Mutex<HashSet<Attribute>>,
    eeprom: OnceCell<EepromImage>,
    integration_time_ms: AtomicU64,
    scans_to_average: AtomicU64,
    acquisition_ids: AtomicU64,
    pump: JoinHandle<()>,
}

impl Session {
    /// Subscribe to all four characteristics and start routing notifications.
    pub async fn start(
        transport: Arc<dyn Transport>,
        mut config: SessionConfig,
    ) -> Result<(Session, mpsc::Receiver<SpectrometerEvent>)> {
        if config.stale_request_age <= config.attribute_timeout {
            let age = config.attribute_timeout * 2;
            warn!(
                "stale_request_age {:?} does not exceed attribute_timeout {:?}; using {age:?}",
                config.stale_request_age, config.attribute_timeout
            );
            config.stale_request_age = age;
        }
        for characteristic in Characteristic::ALL {
            transport.subscribe(characteristic).await?;
        }
        let notifications = transport.notifications().await?;

        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let sequencer = Arc::new(Mutex::new(RequestSequencer::new(config.stale_request_age)));
        let (battery, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            dispatcher: ResponseDispatcher::new(Arc::clone(&sequencer)),
            sequencer,
            acquisition: Mutex::new(None),
            laser: LaserStateChannel::new(),
            battery,
            events,
            connected: AtomicBool::new(true),
        });
        let pump = tokio::spawn(pump(notifications, Arc::clone(&shared)));
        info!("session started");

        let session = Session {
            transport,
            shared,
            integration_time_ms: AtomicU64::new(config.default_integration_time_ms),
            scans_to_average: AtomicU64::new(1),
            config,
            claimed: Mutex::new(HashSet::new()),
            eeprom: OnceCell::new(),
            acquisition_ids: AtomicU64::new(0),
            pump,
        };
        Ok((session, rx))
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ProtocolError::Disconnected)
        }
    }

    /// Reserve `attribute` for one transaction.
    ///
    /// Busy while another call holds the claim, and also while an earlier
    /// unacknowledged write still occupies a seq slot.
    fn claim(&self, attribute: Attribute) -> Result<AttributeClaim<'_>> {
        let mut claimed = lock(&self.claimed);
        let open_slot = {
            let mut sequencer = lock(&self.shared.sequencer);
            sequencer.sweep(Instant::now());
            sequencer.is_attribute_pending(attribute)
        };
        if open_slot || !claimed.insert(attribute) {
            return Err(ProtocolError::AttributeBusy(attribute.name()));
        }
        drop(claimed);
        Ok(AttributeClaim {
            claimed: &self.claimed,
            attribute,
        })
    }

    /// One Generic round trip: claim, allocate a seq, write, await.
    async fn transact(
        &self,
        attribute: Attribute,
        kind: RequestKind,
        body: Vec<u8>,
    ) -> Result<Option<AttributeValue>> {
        self.ensure_connected()?;
        let _claim = self.claim(attribute)?;

        let (tx, rx) = oneshot::channel();
        let ticket = lock(&self.shared.sequencer).allocate(attribute, kind, Some(tx))?;
        let frame = frame_generic_request(ticket.seq, &body);
        debug!("Generic: {attribute} {kind:?} seq={} {frame:02x?}", ticket.seq);

        if let Err(e) = self.transport.write(Characteristic::Generic, &frame).await {
            lock(&self.shared.sequencer).cancel(ticket);
            return Err(e);
        }

        match tokio::time::timeout(self.config.attribute_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProtocolError::Disconnected),
            Err(_) => {
                lock(&self.shared.sequencer).cancel(ticket);
                warn!("Generic: {attribute} seq={} timed out", ticket.seq);
                Err(ProtocolError::Timeout {
                    attribute: attribute.name(),
                    seq: ticket.seq,
                    timeout_ms: self.config.attribute_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn remember(&self, attribute: Attribute, value: &AttributeValue) {
        let Some(v) = value.as_u64() else { return };
        match attribute {
            Attribute::IntegrationTimeMs => self.integration_time_ms.store(v, Ordering::Relaxed),
            Attribute::ScansToAverage => self.scans_to_average.store(v, Ordering::Relaxed),
            _ => {}
        }
    }

    pub async fn read(&self, attribute: Attribute) -> Result<AttributeValue> {
        self.read_with_args(attribute, &[]).await
    }

    /// Read with extra argument bytes after the getter opcode.
    pub async fn read_with_args(&self, attribute: Attribute, args: &[u8]) -> Result<AttributeValue> {
        let body = read_request(attribute, args)?;
        let value = self
            .transact(attribute, RequestKind::Read, body)
            .await?
            .ok_or(ProtocolError::MalformedResponse {
                attribute: attribute.name(),
                expected: attribute.spec().wire_size() as usize,
                payload: Vec::new(),
            })?;
        self.remember(attribute, &value);
        Ok(value)
    }

    /// Write and wait for the device's acknowledgement.
    pub async fn write(&self, attribute: Attribute, value: impl Into<AttributeValue>) -> Result<()> {
        let value = value.into();
        let body = write_request(attribute, &value)?;
        self.transact(attribute, RequestKind::Write, body).await?;
        self.remember(attribute, &value);
        Ok(())
    }

    /// Write without waiting. The seq stays reserved until the device
    /// acknowledges it or the stale sweep reclaims it; a failed
    /// acknowledgement is only logged.
    pub async fn write_unacknowledged(
        &self,
        attribute: Attribute,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let value = value.into();
        let body = write_request(attribute, &value)?;
        let _claim = self.claim(attribute)?;

        let ticket = lock(&self.shared.sequencer).allocate(attribute, RequestKind::Write, None)?;
        let frame = frame_generic_request(ticket.seq, &body);
        if let Err(e) = self.transport.write(Characteristic::Generic, &frame).await {
            lock(&self.shared.sequencer).cancel(ticket);
            return Err(e);
        }
        self.remember(attribute, &value);
        Ok(())
    }

    /// Write, read back, and compare within the attribute's tolerance.
    ///
    /// Returns the value the device reported.
    pub async fn write_verified(
        &self,
        attribute: Attribute,
        value: impl Into<AttributeValue>,
    ) -> Result<AttributeValue> {
        let value = value.into();
        self.write(attribute, value.clone()).await?;
        let actual = self.read(attribute).await?;
        if !codec::approx_eq(&attribute.spec().format, &value, &actual) {
            return Err(ProtocolError::VerifyMismatch {
                attribute: attribute.name(),
                expected: value.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(actual)
    }

    /// The EEPROM image, read from the device on first use.
    ///
    /// A failed read is not cached; the next call starts over.
    pub async fn read_eeprom(&self) -> Result<&EepromImage> {
        self.eeprom.get_or_try_init(|| eeprom::read_image(self)).await
    }

    pub async fn eeprom_summary(&self) -> Result<EepromSummary> {
        Ok(self.read_eeprom().await?.summary())
    }

    fn acquisition_timeout(&self, mode: AcquisitionMode) -> Duration {
        let integration = self.integration_time_ms.load(Ordering::Relaxed);
        let scans = self.scans_to_average.load(Ordering::Relaxed).max(1);
        let passes = match mode {
            AcquisitionMode::Plain => 1,
            AcquisitionMode::AutoDark | AcquisitionMode::AutoRaman => 2,
        };
        let mut limit = self.config.acquisition_timeout_base
            + Duration::from_millis(integration.saturating_mul(scans).saturating_mul(passes));
        if mode == AcquisitionMode::AutoRaman {
            limit += self.config.acquisition_auto_margin;
        }
        limit
    }

    fn take_acquisition(&self, id: u64) -> Option<InFlightAcquisition> {
        let mut slot = lock(&self.shared.acquisition);
        match slot.as_ref() {
            Some(a) if a.id == id => slot.take(),
            _ => None,
        }
    }

    /// Trigger one acquisition and wait for the complete spectrum.
    ///
    /// Status and phase updates arrive as events meanwhile. Only one
    /// acquisition may run at a time.
    pub async fn acquire(&self, mode: AcquisitionMode) -> Result<Spectrum> {
        self.ensure_connected()?;
        let total = self.read_eeprom().await?.active_pixels_horizontal();
        if total == 0 {
            return Err(ProtocolError::NoPixelCount);
        }

        let id = self.acquisition_ids.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = lock(&self.shared.acquisition);
            if slot.is_some() {
                return Err(ProtocolError::AcquisitionInProgress);
            }
            *slot = Some(InFlightAcquisition {
                id,
                reassembler: AcquisitionReassembler::new(total),
                done: Some(tx),
            });
        }

        let limit = self.acquisition_timeout(mode);
        info!("Acquire: {mode:?}, {total} px, timeout {limit:?}");
        if let Err(e) = self
            .transport
            .write(Characteristic::Acquire, &[mode.as_byte()])
            .await
        {
            self.take_acquisition(id);
            return Err(e);
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Disconnected),
            Err(_) => {
                let pixels_read = self
                    .take_acquisition(id)
                    .map(|a| a.reassembler.pixels_read())
                    .unwrap_or(0);
                warn!("Acquire: timed out with {pixels_read}/{total} pixels");
                Err(ProtocolError::AcquisitionTimeout {
                    timeout_ms: limit.as_millis() as u64,
                    pixels_read,
                    total,
                })
            }
        }
    }

    /// Latest laser flags, or `None` before the first notification.
    pub fn laser_state(&self) -> Option<LaserState> {
        self.shared.laser.current()
    }

    pub fn subscribe_laser(&self) -> watch::Receiver<Option<LaserState>> {
        self.shared.laser.subscribe()
    }

    /// Latest pushed battery state.
    pub fn battery_state(&self) -> Option<BatteryState> {
        *self.shared.battery.borrow()
    }

    /// Poll the battery through the Generic channel instead of waiting for
    /// a push.
    pub async fn read_battery_state(&self) -> Result<BatteryState> {
        let value = self.read(Attribute::BatteryState).await?;
        let raw = value.as_u64().unwrap_or(0) as u16;
        let state = parse_battery_state(&raw.to_be_bytes()).ok_or(
            ProtocolError::MalformedResponse {
                attribute: Attribute::BatteryState.name(),
                expected: 2,
                payload: raw.to_be_bytes().to_vec(),
            },
        )?;
        self.shared.battery.send_replace(Some(state));
        Ok(state)
    }

    pub fn orphaned_responses(&self) -> u64 {
        self.shared.dispatcher.orphaned_responses()
    }

    pub fn in_flight_requests(&self) -> usize {
        lock(&self.shared.sequencer).in_flight()
    }

    /// Drop the link and fail everything still waiting with
    /// [`ProtocolError::Disconnected`].
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.transport.disconnect().await;
        self.pump.abort();
        self.shared.shutdown();
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl AttributeReader for Session {
    async fn read_attribute(&self, attribute: Attribute, args: &[u8]) -> Result<AttributeValue> {
        self.read_with_args(attribute, args).await
    }
}
