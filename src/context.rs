//! Bot Context
//!
//! The single explicitly-constructed shared state object. Built once in
//! `main` and passed by `Arc` to every component; there are no ambient
//! singletons anywhere in the system.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::application::events::Broadcaster;
use crate::application::execution::ExecutionSummary;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::persistence::DbPool;

pub struct BotContext {
    pub db: DbPool,
    pub broker: Arc<dyn BrokerClient>,
    pub events: Broadcaster,
    /// Qualification scan loop liveness flag. Long sleeps are chunked
    /// against this so a stop takes effect promptly.
    pub scan_running: AtomicBool,
    /// Summary of the most recent execution run, exposed over the API.
    pub last_execution: RwLock<Option<ExecutionSummary>>,
}

impl BotContext {
    pub fn new(db: DbPool, broker: Arc<dyn BrokerClient>) -> Arc<Self> {
        Arc::new(Self {
            db,
            broker,
            events: Broadcaster::new(),
            scan_running: AtomicBool::new(false),
            last_execution: RwLock::new(None),
        })
    }
}
