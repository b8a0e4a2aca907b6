//! Initialization request queue executed after service discovery.
//! The queue is strict FIFO: the transport permits one outstanding GATT
//! operation, so each request is issued only after the previous completed.

use std::collections::VecDeque;

/// One GATT operation of the post-discovery initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitRequest {
    /// Diagnostic read of the command channel; the value is logged only.
    ReadCommandChannel,
    /// Read of the status channel, applied as the initial snapshot.
    ReadStatusChannel,
    /// Subscribe to status notifications.
    EnableStatusNotifications,
}

/// Ordered queue of initialization requests for one session. Built once the
/// required service has been validated; completion of the last request is
/// what makes the device ready.
#[derive(Debug)]
pub struct RequestSequencer {
    queue: VecDeque<InitRequest>,
}

impl RequestSequencer {
    /// Builds the queue for a validated device. The command channel is
    /// always read; the status operations are queued only when the status
    /// characteristic was found.
    pub fn build(has_status_channel: bool) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(InitRequest::ReadCommandChannel);
        if has_status_channel {
            queue.push_back(InitRequest::ReadStatusChannel);
            queue.push_back(InitRequest::EnableStatusNotifications);
        }
        Self { queue }
    }

    /// Next request to issue, once the previous one completed.
    pub fn next(&mut self) -> Option<InitRequest> {
        self.queue.pop_front()
    }

    /// Discards all remaining requests and returns how many were dropped.
    /// Used when the session is torn down mid-initialization.
    pub fn cancel(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
