//! Process-wide session events, owned by the caller and handed to each
//! driver.

use tokio::sync::broadcast;

use passlink_protocol::{PullOutcome, SessionState};

const CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        device_uuid: String,
        state: SessionState,
    },
    VaultSynced {
        device_uuid: String,
        vault_id: String,
        item_count: usize,
    },
    PullRequestCompleted {
        request_id: String,
        outcome: PullOutcome,
    },
    Closed {
        device_uuid: String,
        /// Wire error code, when the session ended in error.
        error_code: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("session event dropped, no subscribers");
        }
    }
}
