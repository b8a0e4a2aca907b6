//! Command-line entry point: scans for the thermostat peripheral, connects,
//! prints every state change and maps stdin lines to device commands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use thermostat_bridge::config::device_config::CONFIG_FILE_NAME;
use thermostat_bridge::core::bluetooth::DEFAULT_SCAN_DURATION_SECS;
use thermostat_bridge::{
    BluestTransport, BluetoothScanner, DeviceConfig, StateEvent, ThermostatCommand,
    ThermostatManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    thermostat_bridge::setup_logging();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = DeviceConfig::load_config(&config_path).await?;

    let devices = Arc::new(Mutex::new(HashMap::new()));
    let transport = BluestTransport::new(devices.clone()).await?;
    let scanner = BluetoothScanner::new(transport.adapter().clone(), devices);

    info!("Scanning for '{}'...", config.device_name);
    let device = scanner
        .find_device(
            &config.device_name,
            Duration::from_secs(DEFAULT_SCAN_DURATION_SECS),
        )
        .await?
        .ok_or_else(|| anyhow!("no thermostat peripheral found"))?;

    let manager = ThermostatManager::new(transport, config);

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(event),
                Err(RecvError::Lagged(missed)) => warn!("Dropped {} state events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager.connect(device).await?;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.trim() {
            "pump on" => Some(ThermostatCommand::StartPump),
            "pump off" => Some(ThermostatCommand::StopPump),
            "fast on" => Some(ThermostatCommand::StartFastCycle),
            "fast off" => Some(ThermostatCommand::StopFastCycle),
            "slow on" => Some(ThermostatCommand::StartSlowCycle),
            "slow off" => Some(ThermostatCommand::StopSlowCycle),
            "power off" => Some(ThermostatCommand::PowerOff),
            "quit" | "exit" => break,
            "" => None,
            other => {
                warn!("Unknown input: {:?}", other);
                print_help();
                None
            }
        };

        if let Some(command) = command {
            if let Err(e) = manager.send_command(command).await {
                warn!("Command failed: {}", e);
            }
        }
    }

    manager.disconnect().await?;
    Ok(())
}

fn print_event(event: StateEvent) {
    match event {
        StateEvent::Connection(state) => info!("Connection state: {}", state),
        StateEvent::Ready(ready) => info!("Device ready: {}", ready),
        StateEvent::Pump(on) => info!("Pump: {}", on_off(on)),
        StateEvent::Fast(on) => info!("Fast cycle: {}", on_off(on)),
        StateEvent::Slow(on) => info!("Slow cycle: {}", on_off(on)),
        StateEvent::Power(on) => info!("Power: {}", on_off(on)),
        StateEvent::CommandAcknowledged(command) => {
            info!("Command acknowledged: {:?}", command)
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn print_help() {
    println!(
        "commands: pump on | pump off | fast on | fast off | slow on | slow off | power off | quit"
    );
}
