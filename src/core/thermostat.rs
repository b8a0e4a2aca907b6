//! Thermostat status decoding and the host-side state projection.
//! This module handles parsing of the single-byte status bitmask pushed by
//! the peripheral and defines the aggregate state exposed to consumers.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{ConnectionState, ThermostatCommand};

const BIT_FAST_CYCLE: u8 = 0;
const BIT_SLOW_CYCLE: u8 = 1;
const BIT_PUMP: u8 = 2;
const BIT_TEMPERATURE: u8 = 3;
const BIT_TIMER: u8 = 4;
const BIT_POWER: u8 = 7;

/// Represents the flags carried by one status byte. Bits 5 and 6 are
/// reserved by the firmware and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub fast_cycle_active: bool,
    pub slow_cycle_active: bool,
    pub pump_active: bool,
    /// Reported by the firmware but not part of the projection.
    pub temperature_flag: bool,
    /// Reported by the firmware but not part of the projection.
    pub timer_flag: bool,
    pub power_active: bool,
}

impl StatusFlags {
    /// Decodes a raw status byte. Total over the whole byte range; every
    /// flag is extracted independently.
    pub fn decode(value: u8) -> Self {
        Self {
            fast_cycle_active: bit_set(value, BIT_FAST_CYCLE),
            slow_cycle_active: bit_set(value, BIT_SLOW_CYCLE),
            pump_active: bit_set(value, BIT_PUMP),
            temperature_flag: bit_set(value, BIT_TEMPERATURE),
            timer_flag: bit_set(value, BIT_TIMER),
            power_active: bit_set(value, BIT_POWER),
        }
    }
}

fn bit_set(value: u8, n: u8) -> bool {
    (value >> n) & 1 == 1
}

/// Represents the externally observable state of the thermostat.
/// Mutated only by the device controller in response to write confirmations
/// and status notifications, never by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThermostatState {
    pub connection: ConnectionState,
    pub is_ready: bool,
    pub pump_on: bool,
    pub fast_on: bool,
    pub slow_on: bool,
    pub power_on: bool,
}

impl ThermostatState {
    /// Creates the initial projection: idle, nothing running.
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Idle,
            is_ready: false,
            pump_on: false,
            fast_on: false,
            slow_on: false,
            power_on: false,
        }
    }

    /// Clears every device flag, as required when a session ends.
    pub(crate) fn reset_flags(&mut self) {
        self.pump_on = false;
        self.fast_on = false;
        self.slow_on = false;
        self.power_on = false;
    }
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single field change pushed to subscribers. Fields are published
/// individually as they change, never as a batched diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateEvent {
    Connection(ConnectionState),
    Ready(bool),
    Pump(bool),
    Fast(bool),
    Slow(bool),
    Power(bool),
    /// Published after every confirmed command write. Carries `None` when the
    /// echoed byte did not match any known command code.
    CommandAcknowledged(Option<ThermostatCommand>),
}
