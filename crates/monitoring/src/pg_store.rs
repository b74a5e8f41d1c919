//! [`RuleStore`] over PostgreSQL.

use async_trait::async_trait;
use fleet_core::alert::{Alert, NewAlert};
use fleet_core::rule::MonitoringRule;
use fleet_core::types::{DbId, Timestamp};
use fleet_db::repositories::{AlertRepo, MonitoringRuleRepo};
use fleet_db::DbPool;
use sqlx::{Postgres, Transaction};

use crate::store::{RuleStore, StoreError, TriggerUnit};

#[derive(Clone)]
pub struct PgRuleStore {
    pool: DbPool,
}

impl PgRuleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn list_enabled(&self) -> Result<Vec<MonitoringRule>, StoreError> {
        Ok(MonitoringRuleRepo::list_enabled(&self.pool).await?)
    }

    async fn begin(&self) -> Result<Box<dyn TriggerUnit>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTriggerUnit { tx }))
    }
}

/// A unit of work backed by one database transaction.
///
/// Dropping it without committing rolls the transaction back.
struct PgTriggerUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TriggerUnit for PgTriggerUnit {
    async fn add_alert(&mut self, alert: NewAlert) -> Result<Alert, StoreError> {
        Ok(AlertRepo::insert(&mut *self.tx, &alert).await?)
    }

    async fn record_trigger(&mut self, rule_id: DbId, at: Timestamp) -> Result<(), StoreError> {
        let updated = MonitoringRuleRepo::record_trigger(&mut *self.tx, rule_id, at).await?;
        if !updated {
            return Err(StoreError::NotFound {
                entity: "MonitoringRule",
                id: rule_id,
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.rollback().await?)
    }
}
