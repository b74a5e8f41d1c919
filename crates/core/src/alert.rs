//! Alert records raised by the rule engine and the derived event announcing them.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceHeartbeatEvent, DeviceStatusEvent};
use crate::lookup::{ActionType, AlertSeverity, AlertStatus};
use crate::rule::MonitoringRule;
use crate::types::{DbId, Timestamp};

/// A persisted alert with its acknowledge/resolve lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: DbId,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
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

impl Alert {
    /// Move an `Active` alert to `Acknowledged`.
    ///
    /// Returns `false` (and changes nothing) when the alert was already
    /// acknowledged or resolved.
    pub fn acknowledge(&mut self, by: impl Into<String>, at: Timestamp) -> bool {
        if self.status != AlertStatus::Active {
            return false;
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(at);
        self.acknowledged_by = Some(by.into());
        self.touch(at);
        true
    }

    /// Move an alert to `Resolved`. Returns `false` if it already was.
    pub fn resolve(&mut self, at: Timestamp) -> bool {
        if self.status == AlertStatus::Resolved {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(at);
        self.touch(at);
        true
    }

    pub fn touch(&mut self, at: Timestamp) {
        self.updated_at = at;
    }
}

/// The fields the engine supplies when raising an alert.
///
/// The store assigns `id`, sets status `Active` and stamps the timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub source_device_id: Option<String>,
    pub source_device_name: Option<String>,
    pub source_rule_id: Option<DbId>,
    pub source_rule_name: Option<String>,
}

impl NewAlert {
    /// Compose an alert for a rule that matched a status transition.
    pub fn for_status_event(rule: &MonitoringRule, event: &DeviceStatusEvent) -> Self {
        let mut message = format!(
            "Device '{}' ({}, {}) changed status from {} to {}.",
            event.device_name, event.device_id, event.device_type, event.old_status, event.new_status,
        );
        if !event.reason.is_empty() {
            message.push_str(&format!(" Reason: {}.", event.reason));
        }
        if !event.location.is_empty() {
            message.push_str(&format!(" Location: {}.", event.location));
        }

        Self {
            title: format!("{}: {}", rule.name, event.device_name),
            message,
            severity: rule.alert_severity,
            source_device_id: Some(event.device_id.clone()),
            source_device_name: Some(event.device_name.clone()),
            source_rule_id: Some(rule.id),
            source_rule_name: Some(rule.name.clone()),
        }
    }

    /// Compose an alert for a rule that matched a heartbeat.
    ///
    /// Heartbeats carry no device name.
    pub fn for_heartbeat(rule: &MonitoringRule, event: &DeviceHeartbeatEvent) -> Self {
        let tag = event.event_type_tag().unwrap_or("heartbeat");
        let mut message = format!(
            "Device {} ({}) reported '{}' while {}.",
            event.device_id, event.device_type, tag, event.status,
        );
        if !event.location.is_empty() {
            message.push_str(&format!(" Location: {}.", event.location));
        }

        Self {
            title: format!("{}: {}", rule.name, event.device_id),
            message,
            severity: rule.alert_severity,
            source_device_id: Some(event.device_id.clone()),
            source_device_name: None,
            source_rule_id: Some(rule.id),
            source_rule_name: Some(rule.name.clone()),
        }
    }
}

/// Payload of `monitoring.alert.triggered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTriggeredEvent {
    pub alert_id: DbId,
    pub rule_id: DbId,
    pub rule_name: String,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub severity: AlertSeverity,
    pub message: String,
    pub action_type: ActionType,
    pub triggered_at: Timestamp,
}

impl AlertTriggeredEvent {
    pub fn new(alert: &Alert, rule: &MonitoringRule) -> Self {
        Self {
            alert_id: alert.id,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            device_id: alert.source_device_id.clone(),
            device_name: alert.source_device_name.clone(),
            severity: alert.severity,
            message: alert.message.clone(),
            action_type: rule.action_type,
            triggered_at: alert.created_at,
        }
    }
}
