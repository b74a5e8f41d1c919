//! Repository for the `monitoring_rules` table.

use fleet_core::rule::MonitoringRule;
use fleet_core::types::{DbId, Timestamp};
use sqlx::PgExecutor;

use crate::decode_error;
use crate::models::monitoring_rule::{CreateMonitoringRule, MonitoringRuleRow};

/// Column list for `monitoring_rules` queries.
const COLUMNS: &str = "\
    id, name, description, is_enabled, condition_type_id, condition_value, \
    action_type_id, alert_severity_id, device_id_filter, device_type_filter, \
    last_triggered_at, trigger_count, created_at, updated_at";

/// Provides query operations for monitoring rules.
pub struct MonitoringRuleRepo;

impl MonitoringRuleRepo {
    /// List all enabled rules ordered by ID.
    pub async fn list_enabled<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Vec<MonitoringRule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM monitoring_rules WHERE is_enabled = true ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, MonitoringRuleRow>(&query)
            .fetch_all(executor)
            .await?;
        rows.into_iter()
            .map(|row| MonitoringRule::try_from(row).map_err(decode_error))
            .collect()
    }

    /// Find a rule by its ID.
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<MonitoringRule>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM monitoring_rules WHERE id = $1");
        sqlx::query_as::<_, MonitoringRuleRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?
            .map(|row| MonitoringRule::try_from(row).map_err(decode_error))
            .transpose()
    }

    /// Insert a new rule, returning the stored entity.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &CreateMonitoringRule,
    ) -> Result<MonitoringRule, sqlx::Error> {
        let query = format!(
            "INSERT INTO monitoring_rules \
                (name, description, is_enabled, condition_type_id, condition_value, \
                 action_type_id, alert_severity_id, device_id_filter, device_type_filter) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, MonitoringRuleRow>(&query)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.enabled)
            .bind(input.condition_type.id())
            .bind(&input.condition_value)
            .bind(input.action_type.id())
            .bind(input.alert_severity.id())
            .bind(&input.device_id_filter)
            .bind(&input.device_type_filter)
            .fetch_one(executor)
            .await?;
        MonitoringRule::try_from(row).map_err(decode_error)
    }

    /// Persist every editable field of a rule. Returns `true` if a row was updated.
    ///
    /// Trigger bookkeeping is not written here; see [`Self::record_trigger`].
    pub async fn save<'e, E: PgExecutor<'e>>(
        executor: E,
        rule: &MonitoringRule,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE monitoring_rules SET \
                name = $2, description = $3, is_enabled = $4, condition_type_id = $5, \
                condition_value = $6, action_type_id = $7, alert_severity_id = $8, \
                device_id_filter = $9, device_type_filter = $10, updated_at = $11 \
             WHERE id = $1",
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.enabled)
        .bind(rule.condition_type.id())
        .bind(&rule.condition_value)
        .bind(rule.action_type.id())
        .bind(rule.alert_severity.id())
        .bind(&rule.device_id_filter)
        .bind(&rule.device_type_filter)
        .bind(rule.updated_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable a rule. Returns `true` if a row was updated.
    pub async fn set_enabled<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE monitoring_rules SET is_enabled = $2, updated_at = NOW() \
             WHERE id = $1 AND is_enabled <> $2",
        )
        .bind(id)
        .bind(enabled)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Increment the trigger counter and stamp `last_triggered_at`.
    ///
    /// The increment happens in SQL, so concurrent triggers never lose a
    /// count to a stale read. Returns `false` if the rule no longer exists.
    pub async fn record_trigger<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE monitoring_rules \
             SET trigger_count = trigger_count + 1, last_triggered_at = $2, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
