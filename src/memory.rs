//! In-process outbox store for tests and local development.
//!
//! Mirrors the Postgres behaviour the dispatcher relies on: writes made in a
//! transaction are invisible to others until commit and vanish on rollback,
//! and each business type has a lock that a transaction holds until it ends.
//! Lock rows have to be provisioned up front, as in the database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::error::OutboxError;
use crate::models::{now_micros, BusinessType, DeadLetter, OutboxMessage};
use crate::store::{OutboxStore, OutboxTransaction};

#[derive(Debug, Default)]
struct State {
    messages: BTreeMap<i64, StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    next_message_id: i64,
    next_dead_letter_id: i64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: OutboxMessage,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    locks: Mutex<HashMap<BusinessType, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Debug, Clone)]
pub struct InMemoryOutboxStore {
    inner: Arc<Inner>,
    lock_timeout: Duration,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(30))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            lock_timeout,
        }
    }

    /// Creates the lock for each business type, the equivalent of inserting
    /// its `core.outbox_lock` row.
    pub fn provision(&self, business_types: impl IntoIterator<Item = BusinessType>) -> &Self {
        let mut locks = lock_unpoisoned(&self.inner.locks);
        for business_type in business_types {
            locks.entry(business_type).or_default();
        }
        self
    }

    /// Committed messages for `business_type` in queue order.
    pub fn pending(&self, business_type: BusinessType) -> Vec<OutboxMessage> {
        let state = lock_unpoisoned(&self.inner.state);
        let mut pending: Vec<OutboxMessage> = state
            .messages
            .values()
            .filter(|stored| stored.message.business_type == business_type)
            .map(|stored| stored.message.clone())
            .collect();
        pending.sort_by_key(OutboxMessage::order_key);
        pending
    }

    pub fn pending_payloads(&self, business_type: BusinessType) -> Vec<Vec<u8>> {
        self.pending(business_type).into_iter().map(|m| m.payload).collect()
    }

    pub fn last_error(&self, id: i64) -> Option<String> {
        let state = lock_unpoisoned(&self.inner.state);
        state.messages.get(&id).and_then(|stored| stored.last_error.clone())
    }

    pub fn dead_letters(&self, business_type: BusinessType) -> Vec<DeadLetter> {
        let state = lock_unpoisoned(&self.inner.state);
        state
            .dead_letters
            .iter()
            .filter(|dead| dead.business_type == business_type)
            .cloned()
            .collect()
    }

    fn lock_for(&self, business_type: BusinessType) -> Option<Arc<tokio::sync::Mutex<()>>> {
        lock_unpoisoned(&self.inner.locks).get(&business_type).cloned()
    }

    fn allocate_message_id(&self) -> i64 {
        let mut state = lock_unpoisoned(&self.inner.state);
        state.next_message_id += 1;
        state.next_message_id
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, OutboxError> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            guards: Vec::new(),
            staged: Vec::new(),
        })
    }
}

#[derive(Debug)]
enum Staged {
    Insert(OutboxMessage),
    Delete(i64),
    FailedAttempt { id: i64, error: String },
    DeadLetter { id: i64, error: String },
}

/// Writes are buffered and applied atomically on commit.
pub struct InMemoryTransaction {
    store: InMemoryOutboxStore,
    guards: Vec<(BusinessType, OwnedMutexGuard<()>)>,
    staged: Vec<Staged>,
}

impl InMemoryTransaction {
    /// The queue as seen from inside this transaction.
    fn visible(&self) -> BTreeMap<i64, StoredMessage> {
        let mut visible = lock_unpoisoned(&self.store.inner.state).messages.clone();
        for op in &self.staged {
            apply_to_messages(&mut visible, op);
        }
        visible
    }

    fn holds_lock(&self, business_type: BusinessType) -> bool {
        self.guards.iter().any(|(held, _)| *held == business_type)
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn enqueue(
        &mut self,
        business_type: BusinessType,
        payloads: &[Vec<u8>],
    ) -> Result<(), OutboxError> {
        let created_at = now_micros();
        for payload in payloads {
            let id = self.store.allocate_message_id();
            self.staged.push(Staged::Insert(OutboxMessage {
                id,
                business_type,
                payload: payload.clone(),
                created_at,
                attempts: 0,
            }));
        }
        Ok(())
    }

    async fn acquire_for_update(&mut self, business_type: BusinessType) -> Result<(), OutboxError> {
        if self.holds_lock(business_type) {
            return Ok(());
        }

        let lock = self
            .store
            .lock_for(business_type)
            .ok_or(OutboxError::LockNotProvisioned(business_type))?;

        let waited = self.store.lock_timeout;
        let guard = tokio::time::timeout(waited, lock.lock_owned())
            .await
            .map_err(|_| OutboxError::LockTimeout { business_type, waited })?;

        self.guards.push((business_type, guard));
        Ok(())
    }

    async fn peek_oldest(
        &mut self,
        business_type: BusinessType,
    ) -> Result<Option<OutboxMessage>, OutboxError> {
        Ok(self
            .visible()
            .into_values()
            .map(|stored| stored.message)
            .filter(|message| message.business_type == business_type)
            .min_by_key(OutboxMessage::order_key))
    }

    async fn delete_by_id(&mut self, id: i64) -> Result<(), OutboxError> {
        self.staged.push(Staged::Delete(id));
        Ok(())
    }

    async fn record_failed_attempt(&mut self, id: i64, error: &str) -> Result<i32, OutboxError> {
        self.staged.push(Staged::FailedAttempt {
            id,
            error: error.to_string(),
        });
        Ok(self
            .visible()
            .get(&id)
            .map(|stored| stored.message.attempts)
            .unwrap_or(0))
    }

    async fn move_to_dead_letter(&mut self, id: i64, error: &str) -> Result<(), OutboxError> {
        self.staged.push(Staged::DeadLetter {
            id,
            error: error.to_string(),
        });
        Ok(())
    }

    async fn commit(self) -> Result<(), OutboxError> {
        let mut state = lock_unpoisoned(&self.store.inner.state);
        for op in &self.staged {
            if let Staged::DeadLetter { id, error } = op {
                if let Some(stored) = state.messages.get(id).cloned() {
                    state.next_dead_letter_id += 1;
                    let dead_letter = DeadLetter {
                        id: state.next_dead_letter_id,
                        message_id: stored.message.id,
                        business_type: stored.message.business_type,
                        payload: stored.message.payload,
                        created_at: stored.message.created_at,
                        attempts: stored.message.attempts,
                        last_error: Some(error.clone()),
                        dead_lettered_at: Utc::now(),
                    };
                    state.dead_letters.push(dead_letter);
                }
            }
            apply_to_messages(&mut state.messages, op);
        }
        // Guards drop with `self`, after the writes are visible.
        drop(state);
        Ok(())
    }

    async fn rollback(self) -> Result<(), OutboxError> {
        Ok(())
    }
}

fn apply_to_messages(messages: &mut BTreeMap<i64, StoredMessage>, op: &Staged) {
    match op {
        Staged::Insert(message) => {
            messages.insert(
                message.id,
                StoredMessage {
                    message: message.clone(),
                    last_error: None,
                },
            );
        }
        Staged::Delete(id) | Staged::DeadLetter { id, .. } => {
            messages.remove(id);
        }
        Staged::FailedAttempt { id, error } => {
            if let Some(stored) = messages.get_mut(id) {
                stored.message.attempts += 1;
                stored.last_error = Some(error.clone());
            }
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
