//! Device profile configuration: the GATT identifiers and the command code
//! table. Kept in a JSON file so the same binary can target firmware
//! revisions with different byte assignments.

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{CommandCodes, GattProfile, DEVICE_NAME};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "thermostat_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Advertised name used to pick the peripheral out of scan results.
    pub device_name: String,

    /// GATT identifiers of the control service and its two channels.
    pub gatt: GattProfile,

    /// Byte values of the seven thermostat commands.
    pub commands: CommandCodes,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            gatt: GattProfile::default(),
            commands: CommandCodes::default(),
        }
    }
}

impl DeviceConfig {
    /// Loads the config from a configuration file.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize device config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Device config saved to {:?}.", path);
        Ok(())
    }
}
