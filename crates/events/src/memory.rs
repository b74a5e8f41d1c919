//! In-process topic exchange.
//!
//! [`InMemoryBroker`] gives a single process the same contract as the AMQP
//! broker: idempotent declarations, durable queues that buffer while no
//! consumer is attached, `*`/`#` bindings, per-consumer prefetch, ack, nack
//! with requeue, and requeue of deliveries dropped unsettled. Consumers on
//! the same queue compete for its messages.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::broker::{Acknowledger, Broker, Delivery, DeliveryStream, OutboundMessage, QueueBinding};
use crate::error::MessagingError;
use crate::topic::TopicPattern;

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    body: Vec<u8>,
    message_id: String,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    unacked: AtomicUsize,
}

impl QueueState {
    fn push_back(&self, message: StoredMessage) {
        lock(&self.ready).push_back(message);
        self.notify.notify_waiters();
    }

    fn push_front(&self, message: StoredMessage) {
        lock(&self.ready).push_front(message);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<StoredMessage> {
        lock(&self.ready).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.ready).len()
    }
}

struct Binding {
    pattern: TopicPattern,
    queue: String,
}

struct Inner {
    exchange: String,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    bindings: Mutex<Vec<Binding>>,
    connected: AtomicBool,
    published: AtomicU64,
    unroutable: AtomicU64,
    closed: CancellationToken,
}

/// A topic exchange living inside the current process.
///
/// Cloning yields another handle to the same exchange.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange: exchange.into(),
                queues: Mutex::new(HashMap::new()),
                bindings: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                published: AtomicU64::new(0),
                unroutable: AtomicU64::new(0),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Simulate losing (or regaining) the broker connection.
    ///
    /// While disconnected, publishes and declarations fail with
    /// [`MessagingError::TransportUnavailable`]; open consumers keep running.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Messages waiting in `queue` (not counting unacknowledged ones).
    pub fn ready_count(&self, queue: &str) -> usize {
        self.queue(queue).map_or(0, |q| q.len())
    }

    /// Deliveries from `queue` currently held by consumers.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .map_or(0, |q| q.unacked.load(Ordering::SeqCst))
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Messages that matched no binding and were discarded.
    pub fn unroutable_count(&self) -> u64 {
        self.inner.unroutable.load(Ordering::Relaxed)
    }

    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        lock(&self.inner.queues).get(name).cloned()
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.inner.closed.is_cancelled() {
            return Err(MessagingError::TransportUnavailable(
                "in-process broker is closed".into(),
            ));
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::TransportUnavailable(
                "in-process broker is disconnected".into(),
            ));
        }
        Ok(())
    }

    /// Queues whose bindings select `routing_key`, each listed once.
    fn route(&self, routing_key: &str) -> Vec<Arc<QueueState>> {
        let names: Vec<String> = {
            let bindings = lock(&self.inner.bindings);
            let mut names: Vec<String> = bindings
                .iter()
                .filter(|b| b.pattern.matches(routing_key))
                .map(|b| b.queue.clone())
                .collect();
            names.sort();
            names.dedup();
            names
        };

        let queues = lock(&self.inner.queues);
        names.iter().filter_map(|n| queues.get(n).cloned()).collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let targets = self.route(&message.routing_key);
        if targets.is_empty() {
            self.inner.unroutable.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                exchange = %self.inner.exchange,
                routing_key = %message.routing_key,
                "Message matched no binding, discarded",
            );
            return Ok(());
        }

        let stored = StoredMessage {
            routing_key: message.routing_key,
            body: message.body,
            message_id: message.message_id.to_string(),
            redelivered: false,
        };
        for queue in targets {
            queue.push_back(stored.clone());
        }
        Ok(())
    }

    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), MessagingError> {
        self.ensure_connected()?;

        lock(&self.inner.queues)
            .entry(binding.queue.clone())
            .or_insert_with(|| Arc::new(QueueState::default()));

        let mut bindings = lock(&self.inner.bindings);
        for pattern in &binding.patterns {
            let exists = bindings
                .iter()
                .any(|b| b.queue == binding.queue && b.pattern == *pattern);
            if !exists {
                bindings.push(Binding {
                    pattern: pattern.clone(),
                    queue: binding.queue.clone(),
                });
            }
        }

        tracing::debug!(
            exchange = %self.inner.exchange,
            queue = %binding.queue,
            patterns = binding.patterns.len(),
            "Queue declared and bound",
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, MessagingError> {
        self.ensure_connected()?;
        let state = self.queue(queue).ok_or_else(|| {
            MessagingError::Protocol(format!("queue {queue} has not been declared"))
        })?;

        let prefetch = Arc::new(Semaphore::new(usize::from(prefetch.max(1))));
        let closed = self.inner.closed.clone();

        let stream = futures::stream::unfold(
            (state, prefetch, closed),
            |(state, prefetch, closed)| async move {
                let permit = tokio::select! {
                    _ = closed.cancelled() => return None,
                    permit = Arc::clone(&prefetch).acquire_owned() => permit.ok()?,
                };

                let message = loop {
                    // Register interest before checking so a concurrent push is not missed.
                    let notified = state.notify.notified();
                    if let Some(message) = state.pop() {
                        break message;
                    }
                    tokio::select! {
                        _ = closed.cancelled() => return None,
                        _ = notified => {}
                    }
                };

                state.unacked.fetch_add(1, Ordering::SeqCst);
                let delivery = Delivery::new(
                    message.routing_key.clone(),
                    message.body.clone(),
                    message.redelivered,
                    Some(message.message_id.clone()),
                    Box::new(MemoryAcker {
                        queue: Arc::clone(&state),
                        message: Mutex::new(Some(message)),
                        _permit: permit,
                    }),
                );
                Some((Ok(delivery), (state, prefetch, closed)))
            },
        );

        Ok(stream.boxed())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && !self.inner.closed.is_cancelled()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.inner.closed.cancel();
        Ok(())
    }
}

/// Holds a delivered message until it is settled.
///
/// The prefetch permit is released when the acker is dropped.
struct MemoryAcker {
    queue: Arc<QueueState>,
    message: Mutex<Option<StoredMessage>>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryAcker {
    fn settle(&self) -> Option<StoredMessage> {
        let taken = lock(&self.message).take();
        if taken.is_some() {
            self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
        }
        taken
    }

    fn requeue(&self, mut message: StoredMessage) {
        message.redelivered = true;
        self.queue.push_front(message);
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.settle();
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), MessagingError> {
        if let Some(message) = self.settle() {
            if requeue {
                self.requeue(message);
            }
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.settle() {
            tracing::debug!(
                routing_key = %message.routing_key,
                "Unsettled delivery dropped, requeueing",
            );
            self.requeue(message);
        }
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
