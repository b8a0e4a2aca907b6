//! Core functionality for the thermostat bridge
//! This module contains the device control protocol engine and the status
//! decoding it feeds into.

pub mod bluetooth;
pub mod thermostat;

// Re-export commonly used types
pub use bluetooth::ThermostatManager;
pub use thermostat::{StateEvent, StatusFlags, ThermostatState};
