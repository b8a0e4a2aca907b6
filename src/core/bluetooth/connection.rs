//! Bluetooth connection handling for the thermostat peripheral
//! This module implements the transport capability on top of bluest:
//! connecting with retry, service discovery and raw GATT traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::core::bluetooth::constants::{CONNECT_RETRY_DELAY_MS, MAX_CONNECT_RETRIES};
use crate::core::bluetooth::transport::{
    DiscoveredCharacteristics, GattLink, GattProfile, LinkError, NotificationStream, Transport,
};
use crate::core::bluetooth::types::BluetoothDevice;

impl From<bluest::Error> for LinkError {
    fn from(error: bluest::Error) -> Self {
        LinkError::Gatt(error.to_string())
    }
}

/// bluest-backed transport. Shares the device map populated by the scanner
/// so links can be opened from a discovered device id.
pub struct BluestTransport {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    max_retries: u32,
    retry_delay: u64,
}

impl BluestTransport {
    /// Acquires the default adapter and waits for it to become available.
    pub async fn new(devices: Arc<Mutex<HashMap<String, Device>>>) -> Result<Self, LinkError> {
        let adapter = Adapter::default()
            .await
            .ok_or(LinkError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices,
            max_retries: MAX_CONNECT_RETRIES,
            retry_delay: CONNECT_RETRY_DELAY_MS,
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn try_connect(&self, device: &Device) -> Result<(), LinkError> {
        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            self.adapter.connect_device(device).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BluestTransport {
    type Link = BluestLink;

    async fn open_link(&self, device: &BluetoothDevice) -> Result<BluestLink, LinkError> {
        let handle = {
            let devices = self.devices.lock().await;
            devices
                .get(&device.id)
                .cloned()
                .ok_or_else(|| LinkError::DeviceNotFound(device.id.clone()))?
        };

        let mut retry_count = 0;
        let mut last_error = None;

        while retry_count < self.max_retries {
            match self.try_connect(&handle).await {
                Ok(()) => {
                    info!("Successfully connected to device {}", device.id);
                    return Ok(BluestLink {
                        adapter: self.adapter.clone(),
                        device: handle,
                    });
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", retry_count + 1, e);
                    last_error = Some(e);

                    if retry_count < self.max_retries - 1 {
                        info!("Retrying connection in {} ms...", self.retry_delay);
                        tokio::time::sleep(Duration::from_millis(self.retry_delay)).await;
                    }
                }
            }
            retry_count += 1;
        }

        Err(last_error.unwrap_or_else(|| {
            LinkError::ConnectFailed(format!(
                "no attempt succeeded after {} retries for {}",
                self.max_retries, device.id
            ))
        }))
    }
}

/// An established bluest link to one peripheral.
#[derive(Clone)]
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
}

#[async_trait]
impl GattLink for BluestLink {
    type Characteristic = Characteristic;

    async fn discover_service(
        &self,
        profile: &GattProfile,
    ) -> Result<DiscoveredCharacteristics<Characteristic>, LinkError> {
        info!("Connection successful, discovering services...");
        let services = self.device.services().await?;
        let Some(service) = services.iter().find(|s| s.uuid() == profile.service) else {
            for service in &services {
                info!("Available service: {}", service.uuid());
            }
            warn!("Control service not found: {}", profile.service);
            return Ok(DiscoveredCharacteristics {
                command: None,
                status: None,
            });
        };

        info!("Found control service: {}", service.uuid());

        let mut command = None;
        let mut status = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid();
            if uuid == profile.command_channel {
                info!("Found command characteristic: {}", uuid);
                command = Some(characteristic.clone());
            } else if uuid == profile.status_channel {
                info!("Found status characteristic: {}", uuid);
                status = Some(characteristic.clone());
            }
        }

        Ok(DiscoveredCharacteristics { command, status })
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<u8, LinkError> {
        let data = characteristic.read().await?;
        data.first().copied().ok_or(LinkError::EmptyPayload)
    }

    async fn write(&self, characteristic: &Characteristic, value: u8) -> Result<u8, LinkError> {
        characteristic.write(&[value]).await?;
        // The peripheral confirms the write with the value it accepted.
        Ok(value)
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream, LinkError> {
        let characteristic = characteristic.clone();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        // The bluest notification stream borrows its characteristic, so a
        // pump task owns both and forwards bytes over a channel.
        tokio::spawn(async move {
            let mut stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(LinkError::from(e)));
                    return;
                }
            };

            while let Some(result) = stream.next().await {
                let item = match result {
                    Ok(value) => value.first().copied().ok_or(LinkError::EmptyPayload),
                    Err(e) => {
                        error!("Error in notification stream: {}", e);
                        Err(LinkError::from(e))
                    }
                };
                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    break;
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| LinkError::Gatt("notification task ended before subscribing".into()))??;

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }
}
