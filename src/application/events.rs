//! Broadcast Events
//!
//! Typed progress/completion events fanned out to every connected WebSocket
//! client as JSON. Both success and failure completions are broadcast, so a
//! client never waits forever on a run that died.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::services::monitor::ExitTrigger;
use crate::persistence::models::ScanResultRecord;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    DataUpdateStarted {
        total: usize,
    },
    DataUpdateProgress {
        done: usize,
        total: usize,
        current_symbol: String,
    },
    DataUpdateComplete {
        status: String,
        total: usize,
        skipped: usize,
        errors: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    OrdersExecuted {
        order_type: String,
        timestamp: String,
        orders: Vec<serde_json::Value>,
    },
    ScanResults {
        timestamp: String,
        results: Vec<ScanResultRecord>,
    },
    ExitTriggers {
        timestamp: String,
        exits: Vec<ExitTrigger>,
    },
}

/// Fan-out handle for bot events. Cheap to clone; senders never block.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send an event to all current subscribers. A send with no listeners
    /// is not an error; the event is simply dropped.
    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
