use std::sync::Arc;

use uuid::Uuid;

use crate::broker::{Broker, OutboundMessage};
use crate::envelope::{DomainEvent, Envelope};
use crate::error::MessagingError;

/// Sends typed events to the shared topic exchange.
///
/// Cheap to clone; every clone shares the process-wide broker handle.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Wrap `event` in a fresh envelope and publish it.
    ///
    /// Returns the envelope's message id.
    pub async fn publish<E: DomainEvent>(&self, event: E) -> Result<Uuid, MessagingError> {
        let envelope = Envelope::new(event);
        self.publish_envelope(&envelope).await?;
        Ok(envelope.message_id())
    }

    /// Publish an already built envelope with routing key = its topic.
    ///
    /// Fails with [`MessagingError::TransportUnavailable`] without waiting
    /// when the broker connection is down.
    pub async fn publish_envelope<E: DomainEvent>(
        &self,
        envelope: &Envelope<E>,
    ) -> Result<(), MessagingError> {
        let body = envelope.encode()?;
        let message = OutboundMessage {
            routing_key: envelope.topic().to_string(),
            message_id: envelope.message_id(),
            event_type: envelope.event_type().to_string(),
            timestamp: envelope.timestamp(),
            body,
        };

        self.broker.publish(message).await.inspect_err(|e| {
            tracing::warn!(
                topic = %envelope.topic(),
                message_id = %envelope.message_id(),
                error = %e,
                "Failed to publish event",
            );
        })?;

        tracing::debug!(
            topic = %envelope.topic(),
            message_id = %envelope.message_id(),
            "Event published",
        );
        Ok(())
    }
}
