//! Thermostat command encoding
//! This module contains the commands that can be sent to the peripheral and
//! the configuration-resolved table mapping them to wire bytes.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    CMD_POWER_OFF, CMD_START_FAST_CYCLE, CMD_START_PUMP, CMD_START_SLOW_CYCLE,
    CMD_STOP_FAST_CYCLE, CMD_STOP_PUMP, CMD_STOP_SLOW_CYCLE,
};

/// Commands understood by the thermostat peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermostatCommand {
    /// Start the water pump
    StartPump,
    /// Stop the water pump
    StopPump,
    /// Start the fast cycle mode
    StartFastCycle,
    /// Stop the fast cycle mode
    StopFastCycle,
    /// Start the slow cycle mode
    StartSlowCycle,
    /// Stop the slow cycle mode
    StopSlowCycle,
    /// Turn the whole device off
    PowerOff,
}

impl ThermostatCommand {
    /// Every command, used for inverse lookups.
    pub const ALL: [ThermostatCommand; 7] = [
        ThermostatCommand::StartPump,
        ThermostatCommand::StopPump,
        ThermostatCommand::StartFastCycle,
        ThermostatCommand::StopFastCycle,
        ThermostatCommand::StartSlowCycle,
        ThermostatCommand::StopSlowCycle,
        ThermostatCommand::PowerOff,
    ];
}

/// Byte value for each command. The assignments live in configuration so the
/// same engine can target firmware revisions with different code tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCodes {
    pub start_pump: u8,
    pub stop_pump: u8,
    pub start_fast_cycle: u8,
    pub stop_fast_cycle: u8,
    pub start_slow_cycle: u8,
    pub stop_slow_cycle: u8,
    pub power_off: u8,
}

impl Default for CommandCodes {
    fn default() -> Self {
        Self {
            start_pump: CMD_START_PUMP,
            stop_pump: CMD_STOP_PUMP,
            start_fast_cycle: CMD_START_FAST_CYCLE,
            stop_fast_cycle: CMD_STOP_FAST_CYCLE,
            start_slow_cycle: CMD_START_SLOW_CYCLE,
            stop_slow_cycle: CMD_STOP_SLOW_CYCLE,
            power_off: CMD_POWER_OFF,
        }
    }
}

impl CommandCodes {
    /// Byte written to the command channel for `command`.
    pub fn encode(&self, command: ThermostatCommand) -> u8 {
        match command {
            ThermostatCommand::StartPump => self.start_pump,
            ThermostatCommand::StopPump => self.stop_pump,
            ThermostatCommand::StartFastCycle => self.start_fast_cycle,
            ThermostatCommand::StopFastCycle => self.stop_fast_cycle,
            ThermostatCommand::StartSlowCycle => self.start_slow_cycle,
            ThermostatCommand::StopSlowCycle => self.stop_slow_cycle,
            ThermostatCommand::PowerOff => self.power_off,
        }
    }

    /// Inverse lookup for bytes echoed back by the peripheral. Unknown bytes
    /// yield `None`; the write itself still succeeded at the transport level,
    /// so this must never be treated as a failure.
    pub fn decode(&self, value: u8) -> Option<ThermostatCommand> {
        ThermostatCommand::ALL
            .iter()
            .copied()
            .find(|command| self.encode(*command) == value)
    }
}
