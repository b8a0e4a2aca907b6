//! Thermostat device controller
//! This module provides the main interface for driving the peripheral: it
//! walks the connection lifecycle, executes the initialization sequence,
//! sends commands, and folds write confirmations and status notifications
//! into the published state projection.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::core::bluetooth::commands::ThermostatCommand;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::sequencer::{InitRequest, RequestSequencer};
use crate::core::bluetooth::transport::{
    DiscoveredCharacteristics, GattLink, LinkError, Transport,
};
use crate::core::bluetooth::types::{BluetoothDevice, ConnectedDeviceState, ConnectionState};
use crate::core::thermostat::{StateEvent, StatusFlags, ThermostatState};
use crate::error::ControllerError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Inner<L: GattLink> {
    connection: ConnectionState,
    state: ThermostatState,
    session: Option<ConnectedDeviceState<L>>,
    /// Cancelled on disconnect; in-flight operations of the session observe
    /// it and discard their results.
    token: CancellationToken,
    notifications: Option<NotificationHandler>,
    /// Bumped whenever a session starts or ends so stale completions from a
    /// previous session cannot touch the projection.
    generation: u64,
}

/// Drives one thermostat peripheral. All shared state lives behind a single
/// mutex; transport callbacks may arrive on any task.
pub struct ThermostatManager<T: Transport> {
    transport: Arc<T>,
    config: Arc<DeviceConfig>,
    inner: Arc<Mutex<Inner<T::Link>>>,
    events: broadcast::Sender<StateEvent>,
    /// Serializes GATT traffic: the transport allows one outstanding
    /// operation per link.
    op_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<T: Transport> Clone for ThermostatManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            inner: self.inner.clone(),
            events: self.events.clone(),
            op_lock: self.op_lock.clone(),
        }
    }
}

impl<T: Transport> ThermostatManager<T> {
    /// Creates a new manager over `transport` using the command codes and
    /// GATT identifiers from `config`.
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                connection: ConnectionState::Idle,
                state: ThermostatState::new(),
                session: None,
                token: CancellationToken::new(),
                notifications: None,
                generation: 0,
            })),
            events,
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Subscribes to individual state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current projection.
    pub fn state(&self) -> ThermostatState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().unwrap().connection
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::Connected
                | ConnectionState::DiscoveringServices
                | ConnectionState::ServicesDiscovered
                | ConnectionState::Ready
        )
    }

    /// Returns the device of the active session, if any.
    pub fn connected_device(&self) -> Option<BluetoothDevice> {
        self.inner
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map(|session| session.device.clone())
    }

    /// Connects to `device` and drives the session all the way to ready:
    /// link up, service discovery and validation, then the initialization
    /// sequence. Valid only while no other session is in progress.
    pub async fn connect(&self, device: BluetoothDevice) -> Result<(), ControllerError> {
        let (token, generation) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.connection {
                ConnectionState::Idle => {}
                // The terminal state loops back to idle on a fresh connect.
                ConnectionState::Disconnected => {
                    inner.connection = ConnectionState::Idle;
                    inner.state.connection = ConnectionState::Idle;
                }
                other => return Err(ControllerError::NotIdle(other)),
            }
            inner.generation += 1;
            inner.token = CancellationToken::new();
            let token = inner.token.clone();
            let generation = inner.generation;
            self.transition(&mut inner, ConnectionState::Connecting);
            (token, generation)
        };
        info!("Connecting to {}...", device.id);

        let link = tokio::select! {
            _ = token.cancelled() => return Err(ControllerError::Cancelled),
            result = self.transport.open_link(&device) => match result {
                Ok(link) => Arc::new(link),
                Err(e) => {
                    self.force_disconnect(generation);
                    return Err(ControllerError::Link(e));
                }
            }
        };

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation || token.is_cancelled() {
                return Err(ControllerError::Cancelled);
            }
            self.transition(&mut inner, ConnectionState::Connected);
            self.transition(&mut inner, ConnectionState::DiscoveringServices);
            inner.session = Some(ConnectedDeviceState {
                device: device.clone(),
                link: link.clone(),
                command_characteristic: None,
                status_characteristic: None,
            });
        }

        let discovered = tokio::select! {
            _ = token.cancelled() => return Err(ControllerError::Cancelled),
            result = link.discover_service(&self.config.gatt) => match result {
                Ok(discovered) => discovered,
                Err(e) => {
                    self.force_disconnect(generation);
                    return Err(ControllerError::Link(e));
                }
            }
        };

        if discovered.command.is_none() {
            warn!("Command characteristic not found, device is not supported");
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.generation == generation {
                    self.transition(&mut inner, ConnectionState::Disconnecting);
                }
            }
            let _ = link.disconnect().await;
            self.finish_disconnect(generation);
            return Err(ControllerError::UnsupportedDevice);
        }

        let has_status = discovered.status.is_some();
        if !has_status {
            warn!("Status characteristic not found, running without live status updates");
        }

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation || token.is_cancelled() {
                return Err(ControllerError::Cancelled);
            }
            if let Some(session) = inner.session.as_mut() {
                session.command_characteristic = discovered.command.clone();
                session.status_characteristic = discovered.status.clone();
            }
            self.transition(&mut inner, ConnectionState::ServicesDiscovered);
        }

        self.run_init_sequence(&link, &discovered, has_status, &token, generation)
            .await?;

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation || token.is_cancelled() {
                return Err(ControllerError::Cancelled);
            }
            self.transition(&mut inner, ConnectionState::Ready);
            inner.state.is_ready = true;
        }
        self.publish(StateEvent::Ready(true));
        info!("Device {} is ready", device.id);
        Ok(())
    }

    /// Requests teardown of the active session. Queued initialization
    /// requests are discarded; the state always resolves to disconnected.
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        let (link, generation) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.connection {
                ConnectionState::Idle | ConnectionState::Disconnected => {
                    debug!("No active connection to tear down");
                    return Ok(());
                }
                ConnectionState::Disconnecting => return Ok(()),
                _ => {}
            }
            inner.token.cancel();
            if let Some(handler) = inner.notifications.take() {
                handler.abort();
            }
            self.transition(&mut inner, ConnectionState::Disconnecting);
            (
                inner.session.as_ref().map(|session| session.link.clone()),
                inner.generation,
            )
        };

        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("Transport disconnect reported: {}", e);
            }
        }

        self.finish_disconnect(generation);
        Ok(())
    }

    /// Encodes `command` and writes it to the command channel. Requires the
    /// device to be ready; there is no silent drop when it is not.
    pub async fn send_command(&self, command: ThermostatCommand) -> Result<(), ControllerError> {
        let (link, characteristic, generation) = {
            let inner = self.inner.lock().unwrap();
            if inner.connection != ConnectionState::Ready {
                return Err(ControllerError::NotReady(inner.connection));
            }
            let Some(session) = inner.session.as_ref() else {
                return Err(ControllerError::NotReady(inner.connection));
            };
            let Some(characteristic) = session.command_characteristic.clone() else {
                return Err(ControllerError::NotReady(inner.connection));
            };
            (session.link.clone(), characteristic, inner.generation)
        };

        let value = self.config.commands.encode(command);
        info!("Sending command {:?} as {:#04x}", command, value);

        let _op = self.op_lock.lock().await;
        match link.write(&characteristic, value).await {
            Ok(echo) => {
                self.handle_command_written(echo);
                Ok(())
            }
            Err(e) => {
                self.force_disconnect(generation);
                Err(ControllerError::Link(e))
            }
        }
    }

    /// Transport callback: a write to the command channel was confirmed with
    /// `value`. A recognized echo applies the mode-exclusivity rules; the
    /// acknowledgment is published either way.
    pub fn handle_command_written(&self, value: u8) {
        let command = self.config.commands.decode(value);
        {
            let mut inner = self.inner.lock().unwrap();
            match command {
                Some(command) => self.apply_command_echo(&mut inner, command),
                None => debug!("Confirmed write of unrecognized command byte {:#04x}", value),
            }
        }
        self.publish(StateEvent::CommandAcknowledged(command));
    }

    /// Transport callback: the status channel delivered `value`. Each
    /// notification is a full snapshot, so every projected flag is
    /// overwritten. Bytes arriving outside an active session are dropped.
    pub fn handle_status_notification(&self, value: u8) {
        let flags = StatusFlags::decode(value);
        let mut inner = self.inner.lock().unwrap();
        if !matches!(
            inner.connection,
            ConnectionState::ServicesDiscovered | ConnectionState::Ready
        ) {
            debug!(
                "Dropping status byte {:#04x} received in state {}",
                value, inner.connection
            );
            return;
        }
        debug!("Status snapshot: {:?}", flags);
        self.set_fast(&mut inner, flags.fast_cycle_active);
        self.set_slow(&mut inner, flags.slow_cycle_active);
        self.set_pump(&mut inner, flags.pump_active);
        self.set_power(&mut inner, flags.power_active);
    }

    /// Transport callback: the radio link dropped without a disconnect
    /// request. Forces the session down; nothing is retried.
    pub fn handle_link_lost(&self) {
        let generation = {
            let inner = self.inner.lock().unwrap();
            if matches!(
                inner.connection,
                ConnectionState::Idle
                    | ConnectionState::Disconnecting
                    | ConnectionState::Disconnected
            ) {
                return;
            }
            inner.generation
        };
        warn!("Link to the peripheral was lost");
        self.force_disconnect(generation);
    }

    async fn run_init_sequence(
        &self,
        link: &Arc<T::Link>,
        discovered: &DiscoveredCharacteristics<<T::Link as GattLink>::Characteristic>,
        has_status: bool,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<(), ControllerError> {
        let mut sequencer = RequestSequencer::build(has_status);
        while let Some(request) = sequencer.next() {
            let _op = self.op_lock.lock().await;
            let result = tokio::select! {
                _ = token.cancelled() => {
                    let dropped = sequencer.cancel();
                    debug!("Initialization cancelled, {} queued request(s) discarded", dropped);
                    return Err(ControllerError::Cancelled);
                }
                result = self.execute_init_request(link, discovered, request) => result,
            };
            if let Err(e) = result {
                let dropped = sequencer.cancel();
                warn!(
                    "Initialization request {:?} failed, {} queued request(s) discarded: {}",
                    request, dropped, e
                );
                self.force_disconnect(generation);
                return Err(ControllerError::Link(e));
            }
        }
        Ok(())
    }

    async fn execute_init_request(
        &self,
        link: &Arc<T::Link>,
        discovered: &DiscoveredCharacteristics<<T::Link as GattLink>::Characteristic>,
        request: InitRequest,
    ) -> Result<(), LinkError> {
        match request {
            InitRequest::ReadCommandChannel => {
                if let Some(characteristic) = &discovered.command {
                    let value = link.read(characteristic).await?;
                    debug!(
                        "Command channel reads {:#04x} ({:?})",
                        value,
                        self.config.commands.decode(value)
                    );
                }
            }
            InitRequest::ReadStatusChannel => {
                if let Some(characteristic) = &discovered.status {
                    let value = link.read(characteristic).await?;
                    debug!("Initial status snapshot: {:#04x}", value);
                    self.handle_status_notification(value);
                }
            }
            InitRequest::EnableStatusNotifications => {
                if let Some(characteristic) = &discovered.status {
                    let stream = link.subscribe(characteristic).await?;
                    let token = self.inner.lock().unwrap().token.clone();
                    let handler = NotificationHandler::spawn(self.clone(), stream, token);
                    self.inner.lock().unwrap().notifications = Some(handler);
                }
            }
        }
        Ok(())
    }

    fn apply_command_echo(&self, inner: &mut Inner<T::Link>, command: ThermostatCommand) {
        match command {
            // The peripheral guarantees mode exclusivity synchronously; the
            // steady-state flag itself is confirmed by the status channel.
            ThermostatCommand::StartFastCycle => {
                self.set_slow(inner, false);
                self.set_power(inner, true);
            }
            ThermostatCommand::StartSlowCycle => {
                self.set_fast(inner, false);
                self.set_power(inner, true);
            }
            ThermostatCommand::StartPump => {
                self.set_power(inner, true);
            }
            ThermostatCommand::PowerOff => {
                self.set_fast(inner, false);
                self.set_slow(inner, false);
                self.set_pump(inner, false);
                self.set_power(inner, false);
            }
            ThermostatCommand::StopPump
            | ThermostatCommand::StopFastCycle
            | ThermostatCommand::StopSlowCycle => {}
        }
    }

    /// Moves the state machine along one edge and publishes the change.
    fn transition(&self, inner: &mut Inner<T::Link>, next: ConnectionState) {
        debug_assert!(
            inner.connection.may_advance_to(next),
            "invalid transition {} -> {}",
            inner.connection,
            next
        );
        debug!("Connection state: {} -> {}", inner.connection, next);
        inner.connection = next;
        inner.state.connection = next;
        self.publish(StateEvent::Connection(next));
    }

    /// Orderly completion of a teardown started by `disconnect` or the
    /// unsupported-device path.
    fn finish_disconnect(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            return;
        }
        inner.generation += 1;
        inner.session = None;
        if let Some(handler) = inner.notifications.take() {
            handler.abort();
        }
        self.transition(&mut inner, ConnectionState::Disconnected);
        inner.state.reset_flags();
        inner.state.is_ready = false;
        self.publish(StateEvent::Ready(false));
    }

    /// Immediate teardown after a transport failure or link loss. The
    /// session is invalidated so late completions are discarded.
    fn force_disconnect(&self, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            return;
        }
        inner.generation += 1;
        inner.token.cancel();
        if let Some(handler) = inner.notifications.take() {
            handler.abort();
        }
        if inner.connection != ConnectionState::Disconnecting {
            self.transition(&mut inner, ConnectionState::Disconnecting);
        }
        self.transition(&mut inner, ConnectionState::Disconnected);
        inner.session = None;
        inner.state.reset_flags();
        inner.state.is_ready = false;
        self.publish(StateEvent::Ready(false));
    }

    fn set_pump(&self, inner: &mut Inner<T::Link>, on: bool) {
        if inner.state.pump_on != on {
            inner.state.pump_on = on;
            self.publish(StateEvent::Pump(on));
        }
    }

    fn set_fast(&self, inner: &mut Inner<T::Link>, on: bool) {
        if inner.state.fast_on != on {
            inner.state.fast_on = on;
            self.publish(StateEvent::Fast(on));
        }
    }

    fn set_slow(&self, inner: &mut Inner<T::Link>, on: bool) {
        if inner.state.slow_on != on {
            inner.state.slow_on = on;
            self.publish(StateEvent::Slow(on));
        }
    }

    fn set_power(&self, inner: &mut Inner<T::Link>, on: bool) {
        if inner.state.power_on != on {
            inner.state.power_on = on;
            self.publish(StateEvent::Power(on));
        }
    }

    fn publish(&self, event: StateEvent) {
        // Receivers may come and go; a send without subscribers is fine.
        let _ = self.events.send(event);
    }
}
