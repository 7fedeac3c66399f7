use async_trait::async_trait;

use crate::error::BrokerError;

/// Outbound side of the outbox: anything that can accept a payload for a topic.
///
/// `Ok(())` must mean the broker has taken responsibility for the message;
/// the dispatcher deletes the outbox row on the strength of it.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

#[async_trait]
impl<T: Broker> Broker for std::sync::Arc<T> {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.as_ref().publish(topic, payload).await
    }
}
