//! Transactional outbox with a serialized, per-business-type dispatcher.
//!
//! Business code stages messages with [`outbox::enqueue`] inside the same
//! transaction as the data change they announce. A [`Dispatcher`] later
//! drains each business type's queue oldest-first, holding that type's lock
//! row for the whole lock-peek-publish-delete cycle so that only one process
//! at a time ever delivers a given business type.

pub mod backoff;
pub mod broker;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lock;
pub mod memory;
pub mod messaging;
pub mod models;
pub mod outbox;
pub mod routes;
pub mod shutdown;
pub mod store;

pub use broker::Broker;
pub use dispatcher::{CycleOutcome, Dispatcher, DispatcherSettings, TickSummary};
pub use error::{BrokerError, OutboxError};
pub use models::{BusinessType, DeadLetter, OutboxMessage, TopicMap};
pub use store::{OutboxStore, OutboxTransaction, PgOutboxStore};
