//! Transport capability consumed by the device controller.
//! The controller sequences GATT operations and interprets their results;
//! implementations of these traits own the radio. Splitting the two keeps
//! the engine independent of any particular BLE backend.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_COMMAND_CHAR, UUID_STATUS_CHAR, UUID_THERMOSTAT_SERVICE,
};
use crate::core::bluetooth::types::BluetoothDevice;

/// GATT identifiers of the control service and its two channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    pub service: Uuid,
    pub command_channel: Uuid,
    pub status_channel: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: UUID_THERMOSTAT_SERVICE,
            command_channel: UUID_COMMAND_CHAR,
            status_channel: UUID_STATUS_CHAR,
        }
    }
}

/// Failures reported by the transport layer.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,
    #[error("peripheral not found: {0}")]
    DeviceNotFound(String),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("gatt operation failed: {0}")]
    Gatt(String),
    #[error("characteristic returned an empty payload")]
    EmptyPayload,
}

/// Stream of raw status bytes pushed by the peripheral. The stream ends (or
/// yields an error) when the link drops.
pub type NotificationStream = BoxStream<'static, Result<u8, LinkError>>;

/// Characteristics located during service validation. Either handle may be
/// absent; the controller decides what that means for the session.
#[derive(Debug, Clone)]
pub struct DiscoveredCharacteristics<C> {
    pub command: Option<C>,
    pub status: Option<C>,
}

/// An established link to one peripheral. All operations are asynchronous
/// and the transport permits only one outstanding GATT operation at a time;
/// the controller enforces that ordering.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    type Characteristic: Clone + Send + Sync + 'static;

    /// Locates the control service and its characteristics.
    async fn discover_service(
        &self,
        profile: &GattProfile,
    ) -> Result<DiscoveredCharacteristics<Self::Characteristic>, LinkError>;

    /// Reads one byte from `characteristic`.
    async fn read(&self, characteristic: &Self::Characteristic) -> Result<u8, LinkError>;

    /// Writes one byte to `characteristic` and resolves with the value the
    /// peripheral confirmed.
    async fn write(&self, characteristic: &Self::Characteristic, value: u8)
        -> Result<u8, LinkError>;

    /// Enables notifications on `characteristic` and returns the stream of
    /// notified bytes.
    async fn subscribe(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<NotificationStream, LinkError>;

    /// Tears the link down.
    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Factory for links, one implementation per BLE backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: GattLink;

    /// Brings the radio link up. Resolves once the peripheral is connected.
    async fn open_link(&self, device: &BluetoothDevice) -> Result<Self::Link, LinkError>;
}
