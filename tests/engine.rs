//! End-to-end behaviour of the thermostat controller, driven through a
//! scripted fake transport instead of a radio.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::broadcast;

use thermostat_bridge::core::bluetooth::{
    BluetoothDevice, ConnectionState, DiscoveredCharacteristics, GattLink, GattProfile, LinkError,
    NotificationStream, ThermostatCommand, ThermostatManager, Transport,
};
use thermostat_bridge::core::thermostat::StateEvent;
use thermostat_bridge::{ControllerError, DeviceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeChar {
    Command,
    Status,
}

struct FakeState {
    has_service: bool,
    has_command_char: bool,
    has_status_char: bool,
    command_value: u8,
    status_value: u8,
    fail_status_read: bool,
    echo_override: Option<u8>,
    written: Vec<u8>,
    disconnected: bool,
}

/// Transport whose links answer from a shared script and expose the
/// notification sender so tests can push status bytes or drop the link.
#[derive(Clone)]
struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    notify_tx: Arc<Mutex<Option<mpsc::UnboundedSender<u8>>>>,
}

impl FakeTransport {
    fn supported() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                has_service: true,
                has_command_char: true,
                has_status_char: true,
                command_value: 0x00,
                status_value: 0x00,
                fail_status_read: false,
                echo_override: None,
                written: Vec::new(),
                disconnected: false,
            })),
            notify_tx: Arc::new(Mutex::new(None)),
        }
    }

    fn without_command_char() -> Self {
        let transport = Self::supported();
        transport.state.lock().unwrap().has_command_char = false;
        transport
    }

    fn set_status_value(&self, value: u8) {
        self.state.lock().unwrap().status_value = value;
    }

    fn set_echo_override(&self, value: u8) {
        self.state.lock().unwrap().echo_override = Some(value);
    }

    fn fail_status_read(&self) {
        self.state.lock().unwrap().fail_status_read = true;
    }

    fn notify(&self, value: u8) {
        let guard = self.notify_tx.lock().unwrap();
        let tx = guard.as_ref().expect("no active subscription");
        tx.unbounded_send(value).expect("notification stream closed");
    }

    /// Drops the notification sender; the stream ends, which the engine
    /// treats as link loss.
    fn drop_link(&self) {
        *self.notify_tx.lock().unwrap() = None;
    }

    fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    fn disconnected(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }
}

struct FakeLink {
    state: Arc<Mutex<FakeState>>,
    notify_tx: Arc<Mutex<Option<mpsc::UnboundedSender<u8>>>>,
}

#[async_trait]
impl Transport for FakeTransport {
    type Link = FakeLink;

    async fn open_link(&self, _device: &BluetoothDevice) -> Result<FakeLink, LinkError> {
        Ok(FakeLink {
            state: self.state.clone(),
            notify_tx: self.notify_tx.clone(),
        })
    }
}

#[async_trait]
impl GattLink for FakeLink {
    type Characteristic = FakeChar;

    async fn discover_service(
        &self,
        _profile: &GattProfile,
    ) -> Result<DiscoveredCharacteristics<FakeChar>, LinkError> {
        let state = self.state.lock().unwrap();
        if !state.has_service {
            return Ok(DiscoveredCharacteristics {
                command: None,
                status: None,
            });
        }
        Ok(DiscoveredCharacteristics {
            command: state.has_command_char.then_some(FakeChar::Command),
            status: state.has_status_char.then_some(FakeChar::Status),
        })
    }

    async fn read(&self, characteristic: &FakeChar) -> Result<u8, LinkError> {
        let state = self.state.lock().unwrap();
        match characteristic {
            FakeChar::Command => Ok(state.command_value),
            FakeChar::Status => {
                if state.fail_status_read {
                    Err(LinkError::Gatt("scripted status read failure".into()))
                } else {
                    Ok(state.status_value)
                }
            }
        }
    }

    async fn write(&self, _characteristic: &FakeChar, value: u8) -> Result<u8, LinkError> {
        let mut state = self.state.lock().unwrap();
        state.written.push(value);
        Ok(state.echo_override.unwrap_or(value))
    }

    async fn subscribe(&self, _characteristic: &FakeChar) -> Result<NotificationStream, LinkError> {
        let (tx, rx) = mpsc::unbounded();
        *self.notify_tx.lock().unwrap() = Some(tx);
        Ok(rx.map(Ok).boxed())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.state.lock().unwrap().disconnected = true;
        *self.notify_tx.lock().unwrap() = None;
        Ok(())
    }
}

fn test_device() -> BluetoothDevice {
    BluetoothDevice::new("dev-1".to_string(), Some("Thermostat".to_string()), Some(-40))
}

fn manager_over(transport: &FakeTransport) -> ThermostatManager<FakeTransport> {
    ThermostatManager::new(transport.clone(), DeviceConfig::default())
}

fn drain(events: &mut broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn connection_states(events: &[StateEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            StateEvent::Connection(state) => Some(*state),
            _ => None,
        })
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn connect_walks_the_full_lifecycle_in_order() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    let mut events = manager.subscribe();

    manager.connect(test_device()).await.unwrap();

    let events = drain(&mut events);
    assert_eq!(
        connection_states(&events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::DiscoveringServices,
            ConnectionState::ServicesDiscovered,
            ConnectionState::Ready,
        ]
    );
    // the ready flag flips only at the very end
    let ready_index = events
        .iter()
        .position(|e| *e == StateEvent::Ready(true))
        .expect("ready event");
    let ready_state_index = events
        .iter()
        .position(|e| *e == StateEvent::Connection(ConnectionState::Ready))
        .unwrap();
    assert!(ready_index > ready_state_index);
    assert!(manager.state().is_ready);
    assert!(manager.is_connected());
    assert_eq!(
        manager.connected_device().map(|device| device.id),
        Some("dev-1".to_string())
    );
}

#[tokio::test]
async fn initial_status_read_seeds_the_projection() {
    let transport = FakeTransport::supported();
    transport.set_status_value(0b1000_0100); // power + pump
    let manager = manager_over(&transport);

    manager.connect(test_device()).await.unwrap();

    let state = manager.state();
    assert!(state.pump_on);
    assert!(state.power_on);
    assert!(!state.fast_on && !state.slow_on);
}

#[tokio::test]
async fn start_fast_echo_clears_slow_and_sets_power() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();
    let mut events = manager.subscribe();

    manager
        .send_command(ThermostatCommand::StartFastCycle)
        .await
        .unwrap();

    let codes = DeviceConfig::default().commands;
    assert_eq!(transport.written(), vec![codes.start_fast_cycle]);

    let state = manager.state();
    // the fast flag itself waits for the status channel
    assert!(!state.fast_on);
    assert!(!state.slow_on);
    assert!(state.power_on);

    let events = drain(&mut events);
    assert!(events.contains(&StateEvent::CommandAcknowledged(Some(
        ThermostatCommand::StartFastCycle
    ))));
}

#[tokio::test]
async fn notifications_are_full_snapshots() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    transport.notify(0b0000_0001); // fast only
    wait_until(|| manager.state().fast_on).await;

    transport.notify(0b0000_0010); // slow only
    wait_until(|| manager.state().slow_on).await;

    let state = manager.state();
    assert!(!state.fast_on);
    assert!(state.slow_on);
    assert!(!state.pump_on);
    assert!(!state.power_on);
}

#[tokio::test]
async fn repeated_notifications_are_idempotent() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    transport.notify(0b1000_0101);
    wait_until(|| manager.state().power_on).await;
    let first = manager.state();

    let mut events = manager.subscribe();
    transport.notify(0b1000_0101);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.state(), first);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn power_off_confirmation_resets_every_flag() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    transport.notify(0b1000_0101); // power + pump + fast
    wait_until(|| manager.state().power_on).await;

    manager
        .send_command(ThermostatCommand::PowerOff)
        .await
        .unwrap();

    let state = manager.state();
    assert!(!state.fast_on && !state.slow_on && !state.pump_on && !state.power_on);
}

#[tokio::test]
async fn echo_rules_for_the_remaining_commands() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();
    let codes = DeviceConfig::default().commands;

    // slow start clears fast and powers on
    transport.notify(0b0000_0001);
    wait_until(|| manager.state().fast_on).await;
    manager.handle_command_written(codes.start_slow_cycle);
    let state = manager.state();
    assert!(!state.fast_on && state.power_on);

    // pump start only powers on; stop commands leave the cross fields alone
    manager.handle_command_written(codes.start_pump);
    assert!(manager.state().power_on);
    let before = manager.state();
    manager.handle_command_written(codes.stop_pump);
    manager.handle_command_written(codes.stop_fast_cycle);
    manager.handle_command_written(codes.stop_slow_cycle);
    assert_eq!(manager.state(), before);
}

#[tokio::test]
async fn unrecognized_echo_is_still_acknowledged() {
    let transport = FakeTransport::supported();
    transport.set_echo_override(0xEE);
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();
    let mut events = manager.subscribe();

    manager
        .send_command(ThermostatCommand::StartPump)
        .await
        .unwrap();

    let events = drain(&mut events);
    assert!(events.contains(&StateEvent::CommandAcknowledged(None)));
    // no consistency rule ran for the unknown byte
    assert!(!manager.state().power_on);
}

#[tokio::test]
async fn missing_command_characteristic_is_reported_as_unsupported() {
    let transport = FakeTransport::without_command_char();
    let manager = manager_over(&transport);
    let mut events = manager.subscribe();

    let error = manager.connect(test_device()).await.unwrap_err();
    assert!(matches!(error, ControllerError::UnsupportedDevice));

    let events = drain(&mut events);
    assert!(!events.contains(&StateEvent::Connection(ConnectionState::Ready)));
    assert!(!events.contains(&StateEvent::Ready(true)));
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert!(transport.disconnected());
}

#[tokio::test]
async fn init_read_failure_forces_a_clean_disconnect() {
    let transport = FakeTransport::supported();
    transport.fail_status_read();
    let manager = manager_over(&transport);

    let error = manager.connect(test_device()).await.unwrap_err();
    assert!(matches!(error, ControllerError::Link(_)));

    let state = manager.state();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert!(!state.is_ready);
    assert!(!state.pump_on && !state.fast_on && !state.slow_on && !state.power_on);
}

#[tokio::test]
async fn link_loss_resets_the_projection_and_drops_late_results() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    transport.notify(0b1000_0101);
    wait_until(|| manager.state().power_on).await;

    transport.drop_link();
    wait_until(|| manager.connection_state() == ConnectionState::Disconnected).await;

    let state = manager.state();
    assert!(!state.is_ready);
    assert!(!state.pump_on && !state.power_on);

    // a status byte arriving after teardown must not be applied
    manager.handle_status_notification(0b0000_0001);
    assert!(!manager.state().fast_on);
}

#[tokio::test]
async fn send_command_before_ready_fails_fast() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);

    let error = manager
        .send_command(ThermostatCommand::StartPump)
        .await
        .unwrap_err();
    assert!(matches!(error, ControllerError::NotReady(_)));
    assert!(transport.written().is_empty());
}

#[tokio::test]
async fn connect_while_a_session_is_active_is_rejected() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    let error = manager.connect(test_device()).await.unwrap_err();
    assert!(matches!(
        error,
        ControllerError::NotIdle(ConnectionState::Ready)
    ));
}

#[tokio::test]
async fn disconnect_resets_the_projection_and_allows_a_fresh_connect() {
    let transport = FakeTransport::supported();
    let manager = manager_over(&transport);
    manager.connect(test_device()).await.unwrap();

    transport.notify(0b1000_0100);
    wait_until(|| manager.state().pump_on).await;

    let mut events = manager.subscribe();
    manager.disconnect().await.unwrap();

    let state = manager.state();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert!(!state.is_ready);
    assert!(!state.pump_on);
    assert!(transport.disconnected());

    let events = drain(&mut events);
    assert!(events.contains(&StateEvent::Connection(ConnectionState::Disconnecting)));
    assert!(events.contains(&StateEvent::Connection(ConnectionState::Disconnected)));
    assert!(events.contains(&StateEvent::Ready(false)));

    // the terminal state loops back to idle on the next connect
    manager.connect(test_device()).await.unwrap();
    assert_eq!(manager.connection_state(), ConnectionState::Ready);
}
