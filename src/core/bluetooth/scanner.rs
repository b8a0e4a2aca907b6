//! Device discovery for the thermostat peripheral
//! Headless scanning: finds the peripheral by advertised name and signal
//! strength and registers it in the shared device map so the transport can
//! open a link to it later.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::MIN_RSSI_THRESHOLD;
use crate::core::bluetooth::types::BluetoothDevice;

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    cancel_token: CancellationToken,
    min_rssi_threshold: i16,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter, devices: Arc<Mutex<HashMap<String, Device>>>) -> Self {
        Self {
            adapter,
            devices,
            cancel_token: CancellationToken::new(),
            min_rssi_threshold: MIN_RSSI_THRESHOLD,
        }
    }

    /// Stops an in-flight `find_device` call.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Scans until a peripheral whose advertised name contains `device_name`
    /// is seen with an acceptable signal strength, or `timeout` elapses.
    /// Devices the adapter already holds a connection to are preferred over
    /// a fresh scan.
    pub async fn find_device(
        &self,
        device_name: &str,
        timeout: Duration,
    ) -> Result<Option<BluetoothDevice>> {
        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            if Self::matches(&device, device_name) {
                return Ok(Some(self.register(device, None).await));
            }
        }
        info!("No connected thermostat peripheral detected");

        info!("Starting bluetooth scan");
        let mut scan_stream = self.adapter.scan(&[]).await?;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Scan cancelled");
                    return Ok(None);
                }
                _ = &mut deadline => {
                    info!("Scan timed out after {:?}", timeout);
                    return Ok(None);
                }
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let device = discovered_device.device;
                            let rssi = discovered_device.rssi;
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);
                            // Only accept devices with medium or stronger signal strength
                            if let Some(signal_strength) = rssi {
                                if signal_strength >= self.min_rssi_threshold
                                    && Self::matches(&device, device_name)
                                {
                                    return Ok(Some(self.register(device, rssi).await));
                                }
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    fn matches(device: &Device, device_name: &str) -> bool {
        device
            .name()
            .map(|name| name.contains(device_name))
            .unwrap_or(false)
    }

    async fn register(&self, device: Device, rssi: Option<i16>) -> BluetoothDevice {
        let id = device.id().to_string();
        let name = device.name().ok();
        info!("Thermostat peripheral found - ID: {}, Name: {:?}", id, name);
        self.devices.lock().await.insert(id.clone(), device);
        BluetoothDevice::new(id, name, rssi)
    }
}
