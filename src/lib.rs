//! Thermostat bridge library
//! Host-side control engine for a BLE thermostat/cooler peripheral. The
//! peripheral exposes one control service with a write/read command channel
//! and a read/notify status channel; this crate drives the connection
//! lifecycle, encodes user intents into single-byte commands and folds
//! status notifications into an observable device state.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod utils;

pub use crate::config::DeviceConfig;
pub use crate::core::bluetooth::{
    BluestTransport, BluetoothDevice, BluetoothScanner, CommandCodes, ConnectionState, GattLink,
    GattProfile, LinkError, ThermostatCommand, ThermostatManager, Transport,
};
pub use crate::core::thermostat::{StateEvent, StatusFlags, ThermostatState};
pub use crate::error::ControllerError;

/// Initialize logging for binaries that embed the engine.
pub fn setup_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    log::info!("Logging initialized");
}
