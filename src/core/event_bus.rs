use serde::Serialize;
use tokio::sync::broadcast;

/// Notification emitted by a [`DebugGateManager`](crate::debug::DebugGateManager)
/// for operator tooling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum GateEvent {
    /// A check matched an active gate and the caller is now suspended.
    #[serde(rename = "gate:triggered", rename_all = "camelCase")]
    Triggered {
        gate_id: String,
        trace_id: String,
        stage: String,
    },

    /// The gate let its waiters go, by explicit release or timeout.
    #[serde(rename = "gate:released", rename_all = "camelCase")]
    Released { gate_id: String },
}

impl GateEvent {
    pub fn gate_id(&self) -> &str {
        match self {
            GateEvent::Triggered { gate_id, .. } | GateEvent::Released { gate_id } => gate_id,
        }
    }
}

pub type EventReceiver = broadcast::Receiver<GateEvent>;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Per-manager broadcast channel. Each manager owns its own bus so that
/// independent runtimes in one process never observe each other's events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<GateEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: GateEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
