//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, default command codes and connection policy values.

use uuid::Uuid;

/// Advertised name of the thermostat peripheral
pub const DEVICE_NAME: &str = "Thermostat";

/// The UUID of the thermostat control service
pub const UUID_THERMOSTAT_SERVICE: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

/// The UUID of the status characteristic (read/notify)
pub const UUID_STATUS_CHAR: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// The UUID of the command characteristic (read/write)
pub const UUID_COMMAND_CHAR: Uuid = Uuid::from_u128(0x0000ff03_0000_1000_8000_00805f9b34fb);

/// Default command code bytes. Firmware revisions may reassign these, so the
/// engine reads the effective values from the device configuration.
pub const CMD_START_PUMP: u8 = 0x01;
pub const CMD_STOP_PUMP: u8 = 0x02;
pub const CMD_START_FAST_CYCLE: u8 = 0x03;
pub const CMD_STOP_FAST_CYCLE: u8 = 0x04;
pub const CMD_START_SLOW_CYCLE: u8 = 0x05;
pub const CMD_STOP_SLOW_CYCLE: u8 = 0x06;
pub const CMD_POWER_OFF: u8 = 0x07;

/// Maximum number of connection retries
pub const MAX_CONNECT_RETRIES: u32 = 5;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Weakest signal strength accepted during scanning
pub const MIN_RSSI_THRESHOLD: i16 = -80;

/// Default scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 30;
