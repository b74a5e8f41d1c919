//! Fleet event transport.
//!
//! A publish/subscribe layer over one durable topic exchange shared by every
//! producer and consumer in the system:
//!
//! - [`Envelope`] / [`DomainEvent`]: the wire contract (topic, type tag,
//!   UTC timestamp, payload).
//! - [`Publisher`]: serializes a typed event and hands it to the broker
//!   with routing key = topic and persistent delivery.
//! - [`ConsumerRuntime`]: declares and binds a durable queue, applies the
//!   prefetch bound, dispatches deliveries to a [`MessageHandler`] and
//!   acks or requeues on the outcome.
//! - [`Broker`]: the seam between the two and a concrete broker, with an
//!   AMQP implementation ([`AmqpBroker`]) and an in-process topic exchange
//!   ([`InMemoryBroker`]).

pub mod amqp;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod reconnect;
pub mod topic;

use std::sync::Arc;

pub use amqp::AmqpBroker;
pub use broker::{Broker, Delivery, OutboundMessage, QueueBinding};
pub use config::{BrokerConfig, BrokerMode};
pub use consumer::{ConsumerConfig, ConsumerRuntime, ConsumerStats, HandlerError, MessageHandler};
pub use envelope::{DomainEvent, Envelope};
pub use error::MessagingError;
pub use memory::InMemoryBroker;
pub use publisher::Publisher;
pub use topic::TopicPattern;

/// Open the broker selected by [`BrokerConfig::mode`].
///
/// This is the one place a process constructs its broker connection; the
/// returned handle is shared by its publishers and consumers and must be
/// closed with [`Broker::close`] on shutdown.
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn Broker>, MessagingError> {
    match config.mode {
        BrokerMode::Amqp => {
            let broker: Arc<dyn Broker> = AmqpBroker::connect(config.clone()).await?;
            Ok(broker)
        }
        BrokerMode::Memory => {
            tracing::warn!("Using the in-process broker; events do not leave this process");
            let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(&config.exchange));
            Ok(broker)
        }
    }
}
