//! The seam between the publish/consume abstractions and a concrete broker.

use std::fmt;

use async_trait::async_trait;
use fleet_core::types::Timestamp;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::MessagingError;
use crate::topic::TopicPattern;

/// A serialized message ready to be routed by the exchange.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Routing key; always the envelope topic.
    pub routing_key: String,
    pub message_id: Uuid,
    pub event_type: String,
    pub timestamp: Timestamp,
    pub body: Vec<u8>,
}

/// A durable queue and the patterns binding it to the exchange.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub queue: String,
    pub patterns: Vec<TopicPattern>,
}

impl QueueBinding {
    /// Validate a queue name and parse its routing patterns.
    pub fn new<I, S>(queue: impl Into<String>, patterns: I) -> Result<Self, MessagingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let queue = queue.into();
        if queue.trim().is_empty() {
            return Err(MessagingError::Config("queue name is empty".into()));
        }
        let patterns = patterns
            .into_iter()
            .map(|p| TopicPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(MessagingError::Config(format!(
                "queue {queue} has no routing patterns"
            )));
        }
        Ok(Self { queue, patterns })
    }

    /// Whether any of the bound patterns selects `routing_key`.
    pub fn accepts(&self, routing_key: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(routing_key))
    }
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), MessagingError>;
    async fn nack(&self, requeue: bool) -> Result<(), MessagingError>;
}

/// One message handed to a consumer, held until acked or nacked.
///
/// A delivery dropped without being settled is left to the broker for
/// redelivery.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Set when the broker has handed this message out before.
    pub redelivered: bool,
    pub message_id: Option<String>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        routing_key: String,
        body: Vec<u8>,
        redelivered: bool,
        message_id: Option<String>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key,
            body,
            redelivered,
            message_id,
            acker,
        }
    }

    /// Remove the message from its queue.
    pub async fn ack(self) -> Result<(), MessagingError> {
        self.acker.ack().await
    }

    /// Reject the message, optionally putting it back on its queue.
    pub async fn nack(self, requeue: bool) -> Result<(), MessagingError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.message_id)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Deliveries pushed by the broker for one consumer.
///
/// The stream ends (or yields an error) when the underlying channel is
/// lost; the consumer runtime then re-subscribes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, MessagingError>>;

/// A broker speaking topic-exchange semantics.
///
/// One handle per process owns the connection; publishers and consumers
/// share it through `Arc<dyn Broker>`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Send a message to the shared exchange with persistent delivery.
    ///
    /// Fails fast with [`MessagingError::TransportUnavailable`] while
    /// disconnected.
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError>;

    /// Declare the exchange and the durable queue, and bind every pattern.
    ///
    /// Idempotent.
    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), MessagingError>;

    /// Start consuming a declared queue, holding at most `prefetch`
    /// unacknowledged deliveries at once.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, MessagingError>;

    /// Whether the broker currently has a usable connection.
    fn is_connected(&self) -> bool;

    /// Close the connection. Unsettled deliveries are left for redelivery.
    async fn close(&self) -> Result<(), MessagingError>;
}
