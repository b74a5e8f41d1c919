//! Generic consumption loop for one durable queue.
//!
//! [`ConsumerRuntime`] declares and binds its queue, subscribes with a
//! prefetch bound, and runs each delivery through a [`MessageHandler`] on
//! its own task. The handler outcome decides how the delivery is settled:
//!
//! | Outcome                     | Settlement          |
//! |-----------------------------|---------------------|
//! | `Ok(())`                    | ack                 |
//! | `Err(Malformed)`            | ack (dropped)       |
//! | `Err(Retryable)`            | nack, requeue       |
//! | task aborted or panicked    | left for redelivery |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery, DeliveryStream, QueueBinding};
use crate::error::MessagingError;
use crate::reconnect::{retry_with_backoff, ReconnectConfig};

/// Why a handler could not process a delivery.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message can never be processed; redelivery would not help.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A transient failure; the message should be delivered again.
    #[error("Retryable failure: {0}")]
    Retryable(String),
}

/// Processes the raw body of one delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// `routing_key` is the concrete key the message was published with.
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), HandlerError>;
}

/// Settings for one logical subscriber.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stable queue name, unique per logical subscriber.
    pub queue: String,
    /// Binding patterns (`*` one word, `#` zero or more).
    pub routing_keys: Vec<String>,
    /// Maximum deliveries held unacknowledged at once.
    pub prefetch_count: u16,
    /// How long in-flight handlers may run after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Backoff used when (re)subscribing fails.
    pub reconnect: ReconnectConfig,
}

impl ConsumerConfig {
    pub fn new<I, S>(queue: impl Into<String>, routing_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: queue.into(),
            routing_keys: routing_keys.into_iter().map(Into::into).collect(),
            prefetch_count: 10,
            shutdown_grace: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Running totals of how deliveries were settled.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
    settle_failures: AtomicU64,
}

impl ConsumerStats {
    /// Deliveries handled successfully and acknowledged.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Malformed deliveries acknowledged without processing.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliveries nacked back onto the queue.
    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    /// Acks or nacks the broker refused (e.g. after a channel loss).
    pub fn settle_failures(&self) -> u64 {
        self.settle_failures.load(Ordering::Relaxed)
    }
}

/// Serves one queue until cancelled.
pub struct ConsumerRuntime {
    broker: Arc<dyn Broker>,
    binding: QueueBinding,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ConsumerStats>,
}

impl ConsumerRuntime {
    /// Validate the queue name and binding patterns.
    pub fn new(
        broker: Arc<dyn Broker>,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, MessagingError> {
        let binding = QueueBinding::new(config.queue.clone(), &config.routing_keys)?;
        Ok(Self {
            broker,
            binding,
            config,
            handler,
            stats: Arc::new(ConsumerStats::default()),
        })
    }

    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    /// Shared handle to the settlement counters; stays valid after `run`.
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until `cancel` fires, then drain.
    ///
    /// A lost subscription is re-established with backoff. On shutdown no
    /// new deliveries are taken; in-flight handlers get
    /// [`ConsumerConfig::shutdown_grace`] to finish, after which they are
    /// aborted and their deliveries left unsettled for redelivery.
    pub async fn run(self, cancel: CancellationToken) {
        let queue = self.binding.queue.clone();
        let in_flight = Arc::new(Semaphore::new(usize::from(self.config.prefetch_count.max(1))));
        let mut tasks: JoinSet<()> = JoinSet::new();

        tracing::info!(
            queue = %queue,
            patterns = ?self.config.routing_keys,
            prefetch = self.config.prefetch_count,
            "Consumer starting",
        );

        'subscription: loop {
            let Some(mut stream) = self.subscribe(&cancel).await else {
                break;
            };
            tracing::info!(queue = %queue, "Subscribed");

            loop {
                // Hold a slot before taking the next delivery.
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break 'subscription,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        log_join(&queue, joined);
                        continue;
                    }
                    permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'subscription,
                    },
                };

                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'subscription,
                    next = next_delivery(&mut stream, &mut tasks, &queue) => next,
                };

                match next {
                    Some(Ok(delivery)) => {
                        tasks.spawn(dispatch(
                            Arc::clone(&self.handler),
                            Arc::clone(&self.stats),
                            queue.clone(),
                            delivery,
                            permit,
                        ));
                    }
                    Some(Err(e)) => {
                        tracing::warn!(queue = %queue, error = %e, "Delivery stream failed, re-subscribing");
                        break;
                    }
                    None => {
                        tracing::warn!(queue = %queue, "Delivery stream ended, re-subscribing");
                        break;
                    }
                }
            }

            drop(stream);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect.initial_delay) => {}
            }
        }

        self.drain(&queue, tasks).await;
    }

    async fn subscribe(&self, cancel: &CancellationToken) -> Option<DeliveryStream> {
        let what = format!("subscribe {}", self.binding.queue);
        retry_with_backoff(&what, &self.config.reconnect, cancel, || async {
            self.broker.declare_queue(&self.binding).await?;
            self.broker
                .consume(&self.binding.queue, self.config.prefetch_count)
                .await
        })
        .await
    }

    async fn drain(&self, queue: &str, mut tasks: JoinSet<()>) {
        let pending = tasks.len();
        tracing::info!(queue = %queue, in_flight = pending, "Consumer draining");

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(queue, joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                queue = %queue,
                abandoned = tasks.len(),
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Shutdown grace elapsed, leaving in-flight deliveries for redelivery",
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        tracing::info!(
            queue = %queue,
            acked = self.stats.acked(),
            dropped = self.stats.dropped(),
            requeued = self.stats.requeued(),
            "Consumer stopped",
        );
    }
}

/// Pull the next delivery while reaping finished handler tasks.
async fn next_delivery(
    stream: &mut DeliveryStream,
    tasks: &mut JoinSet<()>,
    queue: &str,
) -> Option<Result<Delivery, MessagingError>> {
    loop {
        tokio::select! {
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(queue, joined),
            next = stream.next() => return next,
        }
    }
}

fn log_join(queue: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(queue = %queue, error = %e, "Message handler panicked");
        }
    }
}

async fn dispatch(
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ConsumerStats>,
    queue: String,
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
) {
    tracing::debug!(
        queue = %queue,
        routing_key = %delivery.routing_key,
        message_id = ?delivery.message_id,
        redelivered = delivery.redelivered,
        "Delivery received",
    );

    let outcome = handler.handle(&delivery.routing_key, &delivery.body).await;
    let routing_key = delivery.routing_key.clone();

    let (settled, counter) = match outcome {
        Ok(()) => (delivery.ack().await, &stats.acked),
        Err(HandlerError::Malformed(reason)) => {
            tracing::warn!(
                queue = %queue,
                routing_key = %routing_key,
                error = %reason,
                "Dropping malformed message",
            );
            (delivery.ack().await, &stats.dropped)
        }
        Err(HandlerError::Retryable(reason)) => {
            tracing::error!(
                queue = %queue,
                routing_key = %routing_key,
                error = %reason,
                "Handler failed, requeueing message",
            );
            (delivery.nack(true).await, &stats.requeued)
        }
    };

    match settled {
        Ok(()) => {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.settle_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                queue = %queue,
                routing_key = %routing_key,
                error = %e,
                "Failed to settle delivery; the broker will redeliver it",
            );
        }
    }
}
