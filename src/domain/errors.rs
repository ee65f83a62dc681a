use thiserror::Error;

use crate::domain::repositories::broker_client::BrokerError;
use crate::persistence::DatabaseError;

/// Errors raised while computing trigger schedules.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    /// Trigger time string did not parse as 24-hour HH:MM. The scheduler
    /// loops treat this as retryable (sleep and re-read config), never fatal.
    #[error("invalid trigger time '{0}': expected HH:MM (e.g. '09:30')")]
    InvalidTriggerTime(String),
}

/// Errors that abort an entire data-update run.
///
/// Per-symbol fetch/save failures are NOT represented here; they are counted
/// in the run outcome and never abort the batch.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("broker not connected: {0}")]
    NotConnected(#[source] BrokerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors that abort an entire order-execution run.
///
/// Per-candidate failures (one rejected order, one unresolvable price) are
/// skipped and logged, never raised. Anything surfacing here is recorded in
/// the execution summary and then re-raised to the caller.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
