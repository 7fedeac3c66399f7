use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;

/// Logical queue partition. Also the scope of the dispatcher lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct BusinessType(pub i32);

impl fmt::Display for BusinessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for BusinessType {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// A pending row of `core.outbox_message`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OutboxMessage {
    pub id: i64,
    pub business_type: BusinessType,
    pub payload: Vec<u8>,
    /// Microseconds since the Unix epoch, assigned at enqueue.
    pub created_at: i64,
    /// Failed publish attempts so far.
    pub attempts: i32,
}

impl OutboxMessage {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_micros(self.created_at).single()
    }

    /// Queue order within a business type.
    pub fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.id)
    }
}

/// A message that exhausted its publish attempts and was moved out of the queue.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DeadLetter {
    pub id: i64,
    pub message_id: i64,
    pub business_type: BusinessType,
    pub payload: Vec<u8>,
    pub created_at: i64,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Current time as microseconds since the epoch, the unit of `created_at`.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicMapError {
    #[error("topic entry `{0}` is not of the form <business_type>=<topic>")]
    MalformedEntry(String),

    #[error("business type `{0}` is not an integer")]
    InvalidBusinessType(String),

    #[error("business type {0} is mapped more than once")]
    Duplicate(BusinessType),

    #[error("no business types configured")]
    Empty,
}

/// Static mapping from business type to broker topic.
///
/// Parsed from `"7=orders-topic,8=SNS::arn:aws:sns:eu-west-1:000000000000:users"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMap {
    topics: BTreeMap<BusinessType, String>,
}

impl TopicMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, business_type: BusinessType, topic: impl Into<String>) -> Self {
        self.topics.insert(business_type, topic.into());
        self
    }

    pub fn topic_for(&self, business_type: BusinessType) -> Option<&str> {
        self.topics.get(&business_type).map(String::as_str)
    }

    pub fn business_types(&self) -> impl Iterator<Item = BusinessType> + '_ {
        self.topics.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl FromStr for TopicMap {
    type Err = TopicMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut topics = BTreeMap::new();

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (business_type, topic) = entry
                .split_once('=')
                .ok_or_else(|| TopicMapError::MalformedEntry(entry.to_string()))?;

            let (business_type, topic) = (business_type.trim(), topic.trim());
            if topic.is_empty() {
                return Err(TopicMapError::MalformedEntry(entry.to_string()));
            }

            let business_type = business_type
                .parse::<i32>()
                .map(BusinessType)
                .map_err(|_| TopicMapError::InvalidBusinessType(business_type.to_string()))?;

            if topics.insert(business_type, topic.to_string()).is_some() {
                return Err(TopicMapError::Duplicate(business_type));
            }
        }

        if topics.is_empty() {
            return Err(TopicMapError::Empty);
        }

        Ok(Self { topics })
    }
}
