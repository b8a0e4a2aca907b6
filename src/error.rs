//! Error taxonomy for the thermostat controller.

use thiserror::Error;

use crate::core::bluetooth::{ConnectionState, LinkError};

/// Failures surfaced by the device controller. Transport failures always
/// leave the controller in a clean disconnected state before they are
/// returned; misuse errors are reported without touching the session.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The peripheral does not expose the command characteristic.
    #[error("device is not supported: command characteristic not found")]
    UnsupportedDevice,

    /// `connect` was called while a session was already in progress.
    #[error("cannot connect while connection state is {0}")]
    NotIdle(ConnectionState),

    /// `send_command` was called before the device became ready.
    #[error("device is not ready for commands (connection state is {0})")]
    NotReady(ConnectionState),

    /// The operation was abandoned because the session was torn down.
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// The transport reported a failure; the connection has been closed.
    #[error(transparent)]
    Link(#[from] LinkError),
}
