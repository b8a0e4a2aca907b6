//! Notification handling for the thermostat status channel
//! This module pumps status notifications from the transport into the
//! device controller and reports link loss when the stream dies.

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::manager::ThermostatManager;
use crate::core::bluetooth::transport::{NotificationStream, Transport};

/// Processing task for one connected session's status notifications.
pub struct NotificationHandler {
    task: JoinHandle<()>,
}

impl NotificationHandler {
    /// Spawns the processing task. The task runs until the session token is
    /// cancelled or the stream ends; an unexpected end is treated as link
    /// loss and reported to the controller.
    pub fn spawn<T: Transport>(
        manager: ThermostatManager<T>,
        stream: NotificationStream,
        session: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(async move {
            Self::process_notifications(manager, stream, session).await;
        });
        Self { task }
    }

    async fn process_notifications<T: Transport>(
        manager: ThermostatManager<T>,
        mut stream: NotificationStream,
        session: CancellationToken,
    ) {
        info!("Listening for status notifications...");
        loop {
            tokio::select! {
                _ = session.cancelled() => {
                    debug!("Notification task cancelled");
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Received status byte: {:#04x}", value);
                        manager.handle_status_notification(value);
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => {
                        info!("Notification stream ended");
                        break;
                    }
                }
            }
        }

        if !session.is_cancelled() {
            manager.handle_link_lost();
        }
    }

    /// Stops the processing task without waiting for it.
    pub fn abort(&self) {
        self.task.abort();
    }
}
