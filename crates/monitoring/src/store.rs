//! The persistence seam the rule engine depends on.
//!
//! [`RuleStore`] reads rule definitions; [`TriggerUnit`] is one open
//! transaction in which the engine records everything a single inbound
//! event causes. A unit that is dropped without [`TriggerUnit::commit`]
//! leaves no trace.

use async_trait::async_trait;
use fleet_core::alert::{Alert, NewAlert};
use fleet_core::rule::MonitoringRule;
use fleet_core::types::{DbId, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },
}

/// Read access to rule definitions plus a transactional write boundary.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Every rule with `enabled = true`.
    async fn list_enabled(&self) -> Result<Vec<MonitoringRule>, StoreError>;

    /// Open a unit of work for the side effects of one inbound event.
    async fn begin(&self) -> Result<Box<dyn TriggerUnit>, StoreError>;
}

/// Writes staged for one inbound event; all or nothing.
#[async_trait]
pub trait TriggerUnit: Send {
    /// Insert an `Active` alert and return it with its assigned id.
    async fn add_alert(&mut self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// Increment the rule's trigger count and stamp `last_triggered_at`.
    async fn record_trigger(&mut self, rule_id: DbId, at: Timestamp) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
