//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept any `PgExecutor` (a `&PgPool` or `&mut *transaction`) as the
//! first argument.

pub mod alert_repo;
pub mod monitoring_rule_repo;

pub use alert_repo::AlertRepo;
pub use monitoring_rule_repo::MonitoringRuleRepo;
