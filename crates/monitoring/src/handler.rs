//! Bridges the consumer runtime to the rule engine.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::device::{DeviceHeartbeatEvent, DeviceStatusEvent};
use fleet_core::topics;
use fleet_events::{Envelope, HandlerError, MessageHandler};

use crate::engine::RuleEngine;

/// Decodes device events by routing key and hands them to the engine.
///
/// Undecodable bodies and unknown routing keys are reported as
/// [`HandlerError::Malformed`]; every engine failure is retryable.
pub struct DeviceEventHandler {
    engine: Arc<RuleEngine>,
}

impl DeviceEventHandler {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for DeviceEventHandler {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), HandlerError> {
        let result = match routing_key {
            topics::DEVICE_STATUS_CHANGED => {
                let envelope = Envelope::<DeviceStatusEvent>::decode(body)
                    .map_err(|e| HandlerError::Malformed(e.to_string()))?;
                self.engine.handle_status_event(envelope.payload()).await
            }
            topics::DEVICE_HEARTBEAT => {
                let envelope = Envelope::<DeviceHeartbeatEvent>::decode(body)
                    .map_err(|e| HandlerError::Malformed(e.to_string()))?;
                self.engine.handle_heartbeat(envelope.payload()).await
            }
            other => {
                return Err(HandlerError::Malformed(format!(
                    "no handler for routing key {other}"
                )))
            }
        };

        result
            .map(|_| ())
            .map_err(|e| HandlerError::Retryable(e.to_string()))
    }
}
