//! The transaction seam the dispatcher is written against.
//!
//! A [`OutboxTransaction`] holds whatever the backend needs to keep a
//! business type's lock for its whole lifetime. Dropping it without
//! committing rolls back and releases the lock.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::OutboxError;
use crate::models::{BusinessType, OutboxMessage};
use crate::{lock, outbox};

#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    type Tx: OutboxTransaction;

    async fn begin(&self) -> Result<Self::Tx, OutboxError>;
}

#[async_trait]
pub trait OutboxTransaction: Send {
    async fn enqueue(
        &mut self,
        business_type: BusinessType,
        payloads: &[Vec<u8>],
    ) -> Result<(), OutboxError>;

    /// Blocks until this transaction holds the lock for `business_type`.
    async fn acquire_for_update(&mut self, business_type: BusinessType) -> Result<(), OutboxError>;

    async fn peek_oldest(
        &mut self,
        business_type: BusinessType,
    ) -> Result<Option<OutboxMessage>, OutboxError>;

    async fn delete_by_id(&mut self, id: i64) -> Result<(), OutboxError>;

    /// Returns the attempt count after the increment.
    async fn record_failed_attempt(&mut self, id: i64, error: &str) -> Result<i32, OutboxError>;

    async fn move_to_dead_letter(&mut self, id: i64, error: &str) -> Result<(), OutboxError>;

    async fn commit(self) -> Result<(), OutboxError>;

    async fn rollback(self) -> Result<(), OutboxError>;
}

/// Postgres-backed store: every transaction is a pooled `sqlx` transaction.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Tx = PgOutboxTransaction;

    async fn begin(&self) -> Result<Self::Tx, OutboxError> {
        Ok(PgOutboxTransaction {
            tx: self.pool.begin().await?,
            lock_timeout: self.lock_timeout,
        })
    }
}

pub struct PgOutboxTransaction {
    tx: Transaction<'static, Postgres>,
    lock_timeout: Duration,
}

#[async_trait]
impl OutboxTransaction for PgOutboxTransaction {
    async fn enqueue(
        &mut self,
        business_type: BusinessType,
        payloads: &[Vec<u8>],
    ) -> Result<(), OutboxError> {
        outbox::enqueue(&mut self.tx, business_type, payloads).await
    }

    async fn acquire_for_update(&mut self, business_type: BusinessType) -> Result<(), OutboxError> {
        lock::acquire_for_update(&mut self.tx, business_type, self.lock_timeout).await
    }

    async fn peek_oldest(
        &mut self,
        business_type: BusinessType,
    ) -> Result<Option<OutboxMessage>, OutboxError> {
        outbox::peek_oldest(&mut self.tx, business_type).await
    }

    async fn delete_by_id(&mut self, id: i64) -> Result<(), OutboxError> {
        outbox::delete_by_id(&mut self.tx, id).await
    }

    async fn record_failed_attempt(&mut self, id: i64, error: &str) -> Result<i32, OutboxError> {
        outbox::record_failed_attempt(&mut self.tx, id, error).await
    }

    async fn move_to_dead_letter(&mut self, id: i64, error: &str) -> Result<(), OutboxError> {
        outbox::move_to_dead_letter(&mut self.tx, id, error).await
    }

    async fn commit(self) -> Result<(), OutboxError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), OutboxError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
