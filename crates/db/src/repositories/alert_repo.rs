//! Repository for the `alerts` table.

use fleet_core::alert::{Alert, NewAlert};
use fleet_core::lookup::AlertStatus;
use fleet_core::types::DbId;
use sqlx::PgExecutor;

use crate::decode_error;
use crate::models::alert::AlertRow;

/// Column list for `alerts` queries.
const COLUMNS: &str = "\
    id, title, message, severity_id, status_id, \
    source_device_id, source_device_name, source_rule_id, source_rule_name, \
    acknowledged_at, acknowledged_by, resolved_at, created_at, updated_at";

/// Provides query operations for alerts.
pub struct AlertRepo;

impl AlertRepo {
    /// Insert a new `Active` alert, returning the stored entity.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        alert: &NewAlert,
    ) -> Result<Alert, sqlx::Error> {
        let query = format!(
            "INSERT INTO alerts \
                (title, message, severity_id, status_id, source_device_id, \
                 source_device_name, source_rule_id, source_rule_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, AlertRow>(&query)
            .bind(&alert.title)
            .bind(&alert.message)
            .bind(alert.severity.id())
            .bind(AlertStatus::Active.id())
            .bind(&alert.source_device_id)
            .bind(&alert.source_device_name)
            .bind(alert.source_rule_id)
            .bind(&alert.source_rule_name)
            .fetch_one(executor)
            .await?;
        Alert::try_from(row).map_err(decode_error)
    }

    /// Find an alert by its ID.
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<Alert>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM alerts WHERE id = $1");
        sqlx::query_as::<_, AlertRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?
            .map(|row| Alert::try_from(row).map_err(decode_error))
            .transpose()
    }

    /// List alerts raised by a rule, newest first.
    pub async fn list_by_rule<'e, E: PgExecutor<'e>>(
        executor: E,
        rule_id: DbId,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM alerts WHERE source_rule_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, AlertRow>(&query)
            .bind(rule_id)
            .fetch_all(executor)
            .await?;
        rows.into_iter()
            .map(|row| Alert::try_from(row).map_err(decode_error))
            .collect()
    }

    /// Count alerts raised by a rule.
    pub async fn count_by_rule<'e, E: PgExecutor<'e>>(
        executor: E,
        rule_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE source_rule_id = $1")
            .bind(rule_id)
            .fetch_one(executor)
            .await
    }

    /// Acknowledge an `Active` alert.
    ///
    /// Returns `false` if the alert does not exist or is no longer active, so
    /// re-acknowledging is a no-op.
    pub async fn acknowledge<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        acknowledged_by: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alerts \
             SET status_id = $2, acknowledged_at = NOW(), acknowledged_by = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(AlertStatus::Acknowledged.id())
        .bind(acknowledged_by)
        .bind(AlertStatus::Active.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resolve an alert. Returns `false` if it does not exist or is already resolved.
    pub async fn resolve<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE alerts SET status_id = $2, resolved_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id <> $2",
        )
        .bind(id)
        .bind(AlertStatus::Resolved.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
