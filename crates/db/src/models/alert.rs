//! Alert row model.

use fleet_core::alert::Alert;
use fleet_core::error::CoreError;
use fleet_core::lookup::{AlertSeverity, AlertStatus, LookupId};
use fleet_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `alerts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AlertRow {
    pub id: DbId,
    pub title: String,
    pub message: String,
    pub severity_id: LookupId,
    pub status_id: LookupId,
    pub source_device_id: Option<String>,
    pub source_device_name: Option<String>,
    pub source_rule_id: Option<DbId>,
    pub source_rule_name: Option<String>,
    pub acknowledged_at: Option<Timestamp>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<AlertRow> for Alert {
    type Error = CoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            title: row.title,
            message: row.message,
            severity: AlertSeverity::try_from(row.severity_id)?,
            status: AlertStatus::try_from(row.status_id)?,
            source_device_id: row.source_device_id,
            source_device_name: row.source_device_name,
            source_rule_id: row.source_rule_id,
            source_rule_name: row.source_rule_name,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
