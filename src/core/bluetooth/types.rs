//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::bluetooth::transport::GattLink;

/// Represents a discovered Bluetooth peripheral
#[derive(Debug, Clone, Serialize)]
pub struct BluetoothDevice {
    /// Platform-specific unique identifier for the device. This doubles as
    /// the address on platforms that do not expose the MAC (e.g. macOS).
    pub id: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the device at discovery time
    pub rssi: Option<i16>,
}

impl BluetoothDevice {
    /// Creates a new BluetoothDevice instance
    pub fn new(id: String, name: Option<String>, rssi: Option<i16>) -> Self {
        Self { id, name, rssi }
    }
}

/// Connection lifecycle of a single peripheral session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    DiscoveringServices,
    ServicesDiscovered,
    Ready,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// The terminal state. It loops back to `Idle` on a fresh connect call.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// Whether the machine may move from `self` to `next`. The happy path
    /// visits every state in order; teardown is reachable from everywhere
    /// except the terminal state.
    pub fn may_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Idle, Connecting) | (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, DiscoveringServices) => true,
            (DiscoveringServices, ServicesDiscovered) => true,
            (ServicesDiscovered, Ready) => true,
            (Disconnecting, Disconnected) => true,
            (state, Disconnecting) => !matches!(state, Disconnecting | Disconnected),
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::DiscoveringServices => "discovering services",
            ConnectionState::ServicesDiscovered => "services discovered",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// Represents the state of a successfully connected peripheral session.
/// This struct holds the active handles needed for interaction. The
/// characteristic handles stay `None` until service validation locates them
/// and are dropped with the whole struct on disconnect.
pub struct ConnectedDeviceState<L: GattLink> {
    /// The peripheral this session belongs to.
    pub device: BluetoothDevice,
    /// The established link, used for all GATT traffic and for teardown.
    pub link: Arc<L>,
    /// The characteristic handle for writing commands to the device.
    pub command_characteristic: Option<L::Characteristic>,
    /// The characteristic handle for reading status and receiving notifications.
    pub status_characteristic: Option<L::Characteristic>,
}

#[cfg(test)]
mod tests {
    use super::ConnectionState;

    #[test]
    fn happy_path_advances_in_order() {
        use ConnectionState::*;
        let order = [
            Idle,
            Connecting,
            Connected,
            DiscoveringServices,
            ServicesDiscovered,
            Ready,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].may_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn states_cannot_be_skipped() {
        use ConnectionState::*;
        assert!(!Connecting.may_advance_to(DiscoveringServices));
        assert!(!DiscoveringServices.may_advance_to(Ready));
        assert!(!ServicesDiscovered.may_advance_to(Connected));
        assert!(!Idle.may_advance_to(Ready));
    }

    #[test]
    fn teardown_is_reachable_from_any_live_state() {
        use ConnectionState::*;
        for state in [Idle, Connecting, Connected, DiscoveringServices, ServicesDiscovered, Ready] {
            assert!(state.may_advance_to(Disconnecting), "{state}");
        }
        assert!(!Disconnected.may_advance_to(Disconnecting));
        assert!(Disconnecting.may_advance_to(Disconnected));
    }

    #[test]
    fn terminal_state_loops_back_to_a_fresh_connect() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Disconnected.may_advance_to(ConnectionState::Connecting));
    }
}
