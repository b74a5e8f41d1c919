//! Device monitoring service.
//!
//! Consumes device events from the shared topic exchange, evaluates them
//! against the enabled [`MonitoringRule`](fleet_core::rule::MonitoringRule)s
//! and raises alerts through a transactional [`store::RuleStore`].

pub mod config;
pub mod engine;
pub mod handler;
pub mod memory_store;
pub mod pg_store;
pub mod store;

pub use config::MonitoringConfig;
pub use engine::{EngineError, RuleEngine};
pub use handler::DeviceEventHandler;
pub use memory_store::InMemoryRuleStore;
pub use pg_store::PgRuleStore;
pub use store::{RuleStore, StoreError, TriggerUnit};
