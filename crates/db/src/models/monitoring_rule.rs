//! Monitoring rule row model.

use fleet_core::error::CoreError;
use fleet_core::lookup::{ActionType, AlertSeverity, ConditionType, LookupId};
use fleet_core::rule::MonitoringRule;
use fleet_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `monitoring_rules` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MonitoringRuleRow {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub is_enabled: bool,
    pub condition_type_id: LookupId,
    pub condition_value: String,
    pub action_type_id: LookupId,
    pub alert_severity_id: LookupId,
    pub device_id_filter: Option<String>,
    pub device_type_filter: Option<String>,
    pub last_triggered_at: Option<Timestamp>,
    pub trigger_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<MonitoringRuleRow> for MonitoringRule {
    type Error = CoreError;

    fn try_from(row: MonitoringRuleRow) -> Result<Self, Self::Error> {
        Ok(MonitoringRule {
            id: row.id,
            name: row.name,
            description: row.description,
            enabled: row.is_enabled,
            condition_type: ConditionType::try_from(row.condition_type_id)?,
            condition_value: row.condition_value,
            action_type: ActionType::try_from(row.action_type_id)?,
            alert_severity: AlertSeverity::try_from(row.alert_severity_id)?,
            device_id_filter: row.device_id_filter,
            device_type_filter: row.device_type_filter,
            last_triggered_at: row.last_triggered_at,
            trigger_count: row.trigger_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Fields for inserting a new rule.
#[derive(Debug, Clone)]
pub struct CreateMonitoringRule {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub condition_type: ConditionType,
    pub condition_value: String,
    pub action_type: ActionType,
    pub alert_severity: AlertSeverity,
    pub device_id_filter: Option<String>,
    pub device_type_filter: Option<String>,
}
