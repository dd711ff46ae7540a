//! btleplug implementation of [`Transport`], plus minimal device discovery.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic as GattCharacteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Characteristic, SERVICE_UUID};
use crate::transport::{Notification, Transport};

/// A connected spectrometer peripheral with its GATT table discovered.
pub struct BleTransport {
    peripheral: Peripheral,
    chars: BTreeSet<GattCharacteristic>,
    name: String,
}

impl BleTransport {
    /// Connect `peripheral` and discover its services.
    pub async fn connect(peripheral: Peripheral, name: String, config: &ClientConfig) -> Result<Self> {
        let limit = Duration::from_secs(config.connect_timeout_secs);

        // BlueZ's Device1.Connect can block forever when the device is out of
        // range, so bound it.
        tokio::time::timeout(limit, peripheral.connect())
            .await
            .map_err(|_| {
                ProtocolError::Transport(format!(
                    "connect() timed out after {} s",
                    config.connect_timeout_secs
                ))
            })??;

        // BlueZ reports the link before its GATT cache is populated; an early
        // discover_services() can come back empty.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(limit, peripheral.discover_services())
            .await
            .map_err(|_| {
                ProtocolError::Transport(format!(
                    "discover_services() timed out after {} s",
                    config.connect_timeout_secs
                ))
            })??;

        let chars = peripheral.characteristics();
        info!("Connected and services discovered: {name} ({} characteristics)", chars.len());
        Ok(Self {
            peripheral,
            chars,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn find_char(&self, characteristic: Characteristic) -> Result<&GattCharacteristic> {
        let uuid = characteristic.uuid();
        self.chars
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or(ProtocolError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn subscribe(&self, characteristic: Characteristic) -> Result<()> {
        let c = self.find_char(characteristic)?;
        self.peripheral.subscribe(c).await?;
        debug!("{}: subscribed to {characteristic}", self.name);
        Ok(())
    }

    async fn write(&self, characteristic: Characteristic, data: &[u8]) -> Result<()> {
        let c = self.find_char(characteristic)?;
        self.peripheral
            .write(c, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(|n| async move {
                match Characteristic::from_uuid(n.uuid) {
                    Some(characteristic) => Some(Notification {
                        characteristic,
                        value: n.value,
                    }),
                    None => {
                        debug!("notification from unrelated characteristic {}", n.uuid);
                        None
                    }
                }
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        info!("{}: disconnecting", self.name);
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Scan the first adapter for a peripheral advertising the spectrometer
/// service whose name starts with `config.name_prefix`.
///
/// Returns the peripheral and its advertised name. Picking among several
/// devices, pairing and reconnection are left to the application.
pub async fn find_spectrometer(config: &ClientConfig) -> Result<(Peripheral, String)> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ProtocolError::Transport("no Bluetooth adapter found".into()))?;

    // CBCentralManager starts in an "unknown" state; scanning before it is
    // powered on is a silent no-op.
    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => break,
                Ok(state) if tokio::time::Instant::now() >= deadline => {
                    warn!("macOS: adapter still {state:?} after 3 s, scanning anyway");
                    break;
                }
                Ok(state) => debug!("macOS: adapter state = {state:?}, waiting"),
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    info!(
        "Scanning for spectrometers (prefix {:?}, timeout {} s)",
        config.name_prefix, config.scan_timeout_secs
    );
    adapter
        .start_scan(ScanFilter {
            services: vec![SERVICE_UUID],
        })
        .await?;

    let prefix = config.name_prefix.as_str();
    let found = tokio::time::timeout(Duration::from_secs(config.scan_timeout_secs), async {
        loop {
            for p in adapter.peripherals().await.unwrap_or_default() {
                if let Ok(Some(props)) = p.properties().await {
                    if let Some(name) = props.local_name {
                        if name.starts_with(prefix) {
                            return (p, name);
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;

    if let Err(e) = adapter.stop_scan().await {
        warn!("stop_scan failed: {e}");
    }

    let (peripheral, name) = found.map_err(|_| {
        ProtocolError::Transport(format!(
            "no spectrometer found after {} s",
            config.scan_timeout_secs
        ))
    })?;
    info!("Found {name}");
    Ok((peripheral, name))
}
