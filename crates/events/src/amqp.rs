//! AMQP 0-9-1 broker backed by `lapin`.
//!
//! One [`AmqpBroker`] owns the process's connection. A supervisor task
//! polls the connection and re-establishes it with exponential backoff
//! when it drops; while it is down, publishes fail fast with
//! [`MessagingError::TransportUnavailable`] and consumer streams end so the
//! consumer runtime re-subscribes once the link is back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{Acknowledger, Broker, Delivery, DeliveryStream, OutboundMessage, QueueBinding};
use crate::config::BrokerConfig;
use crate::error::MessagingError;
use crate::reconnect::retry_with_backoff;

/// How often the supervisor checks the connection.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// AMQP delivery mode 2: the broker writes the message to disk.
const PERSISTENT: u8 = 2;

const CONTENT_TYPE_JSON: &str = "application/json";

/// A live connection plus the channel used for publishing.
struct Link {
    connection: Connection,
    publish_channel: Channel,
}

impl Link {
    async fn open(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let uri = config.amqp_uri();
        let connection = tokio::time::timeout(
            config.connection_timeout,
            Connection::connect(&uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            MessagingError::TransportUnavailable(format!(
                "timed out connecting to {}",
                config.redacted_uri()
            ))
        })?
        .map_err(map_lapin)?;

        let publish_channel = connection.create_channel().await.map_err(map_lapin)?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(map_lapin)?;
        declare_exchange(&publish_channel, config).await?;

        Ok(Self {
            connection,
            publish_channel,
        })
    }

    fn is_healthy(&self) -> bool {
        self.connection.status().connected()
    }
}

/// Topic-exchange broker over a single supervised AMQP connection.
pub struct AmqpBroker {
    config: BrokerConfig,
    link: RwLock<Option<Link>>,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

impl AmqpBroker {
    /// Open the connection, declare the exchange and start the supervisor.
    ///
    /// The first connection is not retried: a broker that is unreachable at
    /// startup is a configuration problem.
    pub async fn connect(config: BrokerConfig) -> Result<Arc<Self>, MessagingError> {
        let link = Link::open(&config).await?;
        tracing::info!(
            uri = %config.redacted_uri(),
            exchange = %config.exchange,
            "Connected to AMQP broker",
        );

        let broker = Arc::new(Self {
            config,
            link: RwLock::new(Some(link)),
            connected: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&broker).supervise());
        Ok(broker)
    }

    /// Watch the connection and reconnect with backoff when it drops.
    async fn supervise(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let healthy = self
                .link
                .read()
                .await
                .as_ref()
                .is_some_and(Link::is_healthy);
            if healthy {
                continue;
            }

            self.connected.store(false, Ordering::SeqCst);
            *self.link.write().await = None;
            tracing::warn!(uri = %self.config.redacted_uri(), "AMQP connection lost, reconnecting");

            let link = retry_with_backoff(
                "amqp connect",
                &self.config.reconnect,
                &self.shutdown,
                || Link::open(&self.config),
            )
            .await;

            match link {
                Some(link) => {
                    *self.link.write().await = Some(link);
                    self.connected.store(true, Ordering::SeqCst);
                    tracing::info!(uri = %self.config.redacted_uri(), "AMQP connection re-established");
                }
                None => break,
            }
        }

        tracing::debug!("AMQP supervisor stopped");
    }

    fn unavailable() -> MessagingError {
        MessagingError::TransportUnavailable("not connected to the AMQP broker".into())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let channel = {
            let guard = self.link.read().await;
            let link = guard.as_ref().ok_or_else(Self::unavailable)?;
            link.publish_channel.clone()
        };

        let properties = message_properties(&message);
        let confirmation = channel
            .basic_publish(
                &self.config.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(map_lapin)?
            .await
            .map_err(map_lapin)?;

        if confirmation.is_nack() {
            return Err(MessagingError::Protocol(format!(
                "broker rejected message {}",
                message.message_id
            )));
        }
        Ok(())
    }

    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), MessagingError> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or_else(Self::unavailable)?;
        let channel = link.connection.create_channel().await.map_err(map_lapin)?;

        declare_exchange(&channel, &self.config).await?;
        channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions {
                    durable: self.config.durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin)?;

        for pattern in &binding.patterns {
            channel
                .queue_bind(
                    &binding.queue,
                    &self.config.exchange,
                    pattern.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(map_lapin)?;
        }

        if let Err(e) = channel.close(200, "declared").await {
            tracing::debug!(error = %e, "Failed to close declaration channel");
        }

        tracing::debug!(
            exchange = %self.config.exchange,
            queue = %binding.queue,
            patterns = binding.patterns.len(),
            "Queue declared and bound",
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, MessagingError> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or_else(Self::unavailable)?;
        let channel = link.connection.create_channel().await.map_err(map_lapin)?;

        channel
            .basic_qos(prefetch.max(1), BasicQosOptions::default())
            .await
            .map_err(map_lapin)?;

        let consumer_tag = format!("{queue}.{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin)?;

        let stream = consumer.map(move |item| {
            item.map(|delivery| into_delivery(delivery, &channel))
                .map_err(map_lapin)
        });
        Ok(stream.boxed())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.shutdown.cancel();
        self.connected.store(false, Ordering::SeqCst);

        let link = self.link.write().await.take();
        if let Some(link) = link {
            link.connection
                .close(200, "shutdown")
                .await
                .map_err(map_lapin)?;
            tracing::info!("AMQP connection closed");
        }
        Ok(())
    }
}

/// Settles one delivery on the channel it arrived on.
///
/// Holds a channel handle so the channel outlives the consumer stream
/// until every in-flight delivery has been settled.
struct AmqpAcker {
    acker: lapin::acker::Acker,
    _channel: Channel,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(map_lapin)
    }

    async fn nack(&self, requeue: bool) -> Result<(), MessagingError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(map_lapin)
    }
}

fn into_delivery(delivery: lapin::message::Delivery, channel: &Channel) -> Delivery {
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    Delivery::new(
        delivery.routing_key.as_str().to_string(),
        delivery.data,
        delivery.redelivered,
        message_id,
        Box::new(AmqpAcker {
            acker: delivery.acker,
            _channel: channel.clone(),
        }),
    )
}

async fn declare_exchange(channel: &Channel, config: &BrokerConfig) -> Result<(), MessagingError> {
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: config.durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(map_lapin)
}

/// Persistent JSON message with the envelope metadata repeated in headers.
fn message_properties(message: &OutboundMessage) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from("topic"),
        AMQPValue::LongString(LongString::from(message.routing_key.as_str())),
    );
    headers.insert(
        ShortString::from("type"),
        AMQPValue::LongString(LongString::from(message.event_type.as_str())),
    );
    headers.insert(
        ShortString::from("timestamp"),
        AMQPValue::LongString(LongString::from(message.timestamp.to_rfc3339())),
    );

    BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(ShortString::from(CONTENT_TYPE_JSON))
        .with_message_id(ShortString::from(message.message_id.to_string()))
        .with_type(ShortString::from(message.event_type.as_str()))
        .with_timestamp(message.timestamp.timestamp().max(0) as u64)
        .with_headers(headers)
}

fn map_lapin(e: lapin::Error) -> MessagingError {
    match e {
        lapin::Error::ProtocolError(amqp) => MessagingError::Protocol(amqp.to_string()),
        other => MessagingError::TransportUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage {
            routing_key: "device.status.changed".into(),
            message_id: Uuid::new_v4(),
            event_type: "DeviceStatusChanged".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            body: b"{}".to_vec(),
        }
    }

    fn header(properties: &BasicProperties, key: &str) -> Option<AMQPValue> {
        properties
            .headers()
            .as_ref()
            .and_then(|h| h.inner().get(&ShortString::from(key)).cloned())
    }

    #[test]
    fn properties_are_persistent_json() {
        let message = message();
        let properties = message_properties(&message);

        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT));
        assert_eq!(
            properties.content_type().as_ref().map(|c| c.as_str()),
            Some(CONTENT_TYPE_JSON)
        );
        assert_eq!(
            properties.message_id().as_ref().map(|m| m.as_str().to_string()),
            Some(message.message_id.to_string())
        );
        assert_eq!(
            properties.kind().as_ref().map(|k| k.as_str()),
            Some("DeviceStatusChanged")
        );
        assert_eq!(*properties.timestamp(), Some(1_772_366_400));
    }

    #[test]
    fn headers_repeat_envelope_metadata() {
        let properties = message_properties(&message());

        assert_eq!(
            header(&properties, "topic"),
            Some(AMQPValue::LongString("device.status.changed".into()))
        );
        assert_eq!(
            header(&properties, "type"),
            Some(AMQPValue::LongString("DeviceStatusChanged".into()))
        );
        assert_eq!(
            header(&properties, "timestamp"),
            Some(AMQPValue::LongString("2026-03-01T12:00:00+00:00".into()))
        );
    }

    #[tokio::test]
    async fn unreachable_broker_fails_to_connect() {
        let config = BrokerConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connection_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let result = AmqpBroker::connect(config).await;
        assert!(matches!(result, Err(MessagingError::TransportUnavailable(_))));
    }
}
