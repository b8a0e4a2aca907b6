//! Bluetooth functionality for the thermostat bridge
//! This module handles all bluetooth operations: locating the peripheral,
//! connecting to it, sequencing the initialization requests and exchanging
//! command and status bytes.

mod commands;
mod connection;
mod constants;
mod manager;
mod notification;
mod scanner;
mod sequencer;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::{CommandCodes, ThermostatCommand};
pub use connection::{BluestLink, BluestTransport};
pub use constants::*; // Re-export all constants
pub use manager::ThermostatManager;
pub use notification::NotificationHandler;
pub use scanner::BluetoothScanner;
pub use sequencer::{InitRequest, RequestSequencer};
pub use transport::{
    DiscoveredCharacteristics, GattLink, GattProfile, LinkError, NotificationStream, Transport,
};
pub use types::{BluetoothDevice, ConnectedDeviceState, ConnectionState};
