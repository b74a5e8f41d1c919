//! The message envelope every publisher and consumer agrees on.

use chrono::Utc;
use fleet_core::alert::AlertTriggeredEvent;
use fleet_core::device::{DeviceHeartbeatEvent, DeviceStatusEvent};
use fleet_core::topics;
use fleet_core::types::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessagingError;

/// A typed event payload bound to one routing topic.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync {
    /// Dot-delimited routing key, e.g. `device.status.changed`.
    const TOPIC: &'static str;
    /// Logical event kind tag.
    const TYPE: &'static str;
}

impl DomainEvent for DeviceStatusEvent {
    const TOPIC: &'static str = topics::DEVICE_STATUS_CHANGED;
    const TYPE: &'static str = topics::TYPE_DEVICE_STATUS_CHANGED;
}

impl DomainEvent for DeviceHeartbeatEvent {
    const TOPIC: &'static str = topics::DEVICE_HEARTBEAT;
    const TYPE: &'static str = topics::TYPE_DEVICE_HEARTBEAT;
}

impl DomainEvent for AlertTriggeredEvent {
    const TOPIC: &'static str = topics::ALERT_TRIGGERED;
    const TYPE: &'static str = topics::TYPE_ALERT_TRIGGERED;
}

/// Transport unit: routing topic, type tag, UTC timestamp and payload.
///
/// The topic is fixed from the payload type at construction and cannot be
/// changed afterwards. `message_id` stays the same across redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    message_id: Uuid,
    topic: String,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: Timestamp,
    payload: T,
}

impl<T: DomainEvent> Envelope<T> {
    /// Wrap a payload, stamping a fresh message id and the current time.
    pub fn new(payload: T) -> Self {
        Self::at(payload, Utc::now())
    }

    pub fn at(payload: T, timestamp: Timestamp) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic: T::TOPIC.to_string(),
            event_type: T::TYPE.to_string(),
            timestamp,
            payload,
        }
    }

    /// Decode an envelope and check it carries the expected type tag.
    pub fn decode(body: &[u8]) -> Result<Self, MessagingError> {
        let envelope: Self = serde_json::from_slice(body)?;
        if envelope.event_type != T::TYPE {
            return Err(MessagingError::Serialization(serde::de::Error::custom(format!(
                "expected event type {}, got {}",
                T::TYPE,
                envelope.event_type
            ))));
        }
        Ok(envelope)
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn encode(&self) -> Result<Vec<u8>, MessagingError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T> Envelope<T> {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}
