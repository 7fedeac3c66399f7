use std::time::Duration;

use crate::models::BusinessType;

/// Failure reported by a [`Broker`](crate::broker::Broker).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker rejected the message: {0}")]
    Rejected(String),

    #[error("broker transport failure: {0}")]
    Transport(String),

    #[error("publish did not complete within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("lock for business type {business_type} not acquired within {waited:?}")]
    LockTimeout {
        business_type: BusinessType,
        waited: Duration,
    },

    #[error("no lock row provisioned for business type {0}")]
    LockNotProvisioned(BusinessType),

    #[error("publishing message {message_id} failed after {attempts} attempt(s): {source}")]
    Publish {
        message_id: i64,
        attempts: i32,
        #[source]
        source: BrokerError,
    },

    #[error("no topic configured for business type {0}")]
    UnknownBusinessType(BusinessType),
}

impl OutboxError {
    /// Errors that mean "try again next tick" rather than something broken.
    pub fn is_contention(&self) -> bool {
        matches!(self, OutboxError::LockTimeout { .. })
    }
}
