//! Monitoring rules and the condition evaluator (pure logic).
//!
//! A [`MonitoringRule`] is stored as a flat row (`condition_type` plus a
//! free-form `condition_value`). Evaluation goes through [`Condition`], a
//! closed sum type built from those two columns, so every condition kind is
//! handled by an exhaustive match.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceHeartbeatEvent, DeviceStatus, DeviceStatusEvent, DeviceType};
use crate::error::CoreError;
use crate::lookup::{ActionType, AlertSeverity, ConditionType};
use crate::types::{DbId, Timestamp};

/// Wildcard `condition_value` accepted by `EventTypeMatches`.
pub const EVENT_TYPE_WILDCARD: &str = "*";

/// A stored condition + action pair evaluated against inbound device events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub condition_type: ConditionType,
    pub condition_value: String,
    pub action_type: ActionType,
    pub alert_severity: AlertSeverity,
    pub device_id_filter: Option<String>,
    pub device_type_filter: Option<String>,
    pub last_triggered_at: Option<Timestamp>,
    pub trigger_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MonitoringRule {
    /// Whether this rule is scoped to the given device.
    ///
    /// A rule with both filters unset applies to every device. The device
    /// id filter is an exact match; the type filter ignores ASCII case.
    pub fn applies_to(&self, device_id: &str, device_type: &DeviceType) -> bool {
        let id_ok = self
            .device_id_filter
            .as_deref()
            .map_or(true, |f| f == device_id);
        let type_ok = self
            .device_type_filter
            .as_deref()
            .map_or(true, |f| f.eq_ignore_ascii_case(device_type.as_str()));
        id_ok && type_ok
    }

    /// Build the typed condition from the stored columns.
    pub fn condition(&self) -> Result<Condition, CoreError> {
        Condition::from_parts(self.condition_type, &self.condition_value)
    }

    /// Bump the trigger bookkeeping after an alert was raised.
    pub fn record_trigger(&mut self, at: Timestamp) {
        self.trigger_count += 1;
        self.last_triggered_at = Some(at);
        self.touch(at);
    }

    pub fn set_enabled(&mut self, enabled: bool, at: Timestamp) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.touch(at);
        }
    }

    /// Stamp `updated_at`. Called by the persistence layer on every write.
    pub fn touch(&mut self, at: Timestamp) {
        self.updated_at = at;
    }
}

/// A rule condition with its value already interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The new status equals the given name (ASCII case-insensitive).
    StatusEquals(String),
    /// The device went `Offline`. The stored duration is tracked by an
    /// external scheduler; the engine only reacts to the transition.
    OfflineForDuration(String),
    /// A heartbeat carries this event tag, or any heartbeat for `"*"`.
    EventTypeMatches(String),
    /// Reserved. Never matches.
    CustomExpression(String),
}

impl Condition {
    /// Interpret a stored `(condition_type, condition_value)` pair.
    ///
    /// Conditions that compare against the value reject an empty one.
    pub fn from_parts(kind: ConditionType, value: &str) -> Result<Self, CoreError> {
        let value = value.trim();
        match kind {
            ConditionType::StatusEquals if value.is_empty() => Err(CoreError::Validation(
                "StatusEquals requires a status name".into(),
            )),
            ConditionType::StatusEquals => Ok(Condition::StatusEquals(value.to_string())),
            ConditionType::OfflineForDuration => {
                Ok(Condition::OfflineForDuration(value.to_string()))
            }
            ConditionType::EventTypeMatches if value.is_empty() => Err(CoreError::Validation(
                "EventTypeMatches requires an event type or \"*\"".into(),
            )),
            ConditionType::EventTypeMatches => Ok(Condition::EventTypeMatches(value.to_string())),
            ConditionType::CustomExpression => Ok(Condition::CustomExpression(value.to_string())),
        }
    }

    pub fn kind(&self) -> ConditionType {
        match self {
            Condition::StatusEquals(_) => ConditionType::StatusEquals,
            Condition::OfflineForDuration(_) => ConditionType::OfflineForDuration,
            Condition::EventTypeMatches(_) => ConditionType::EventTypeMatches,
            Condition::CustomExpression(_) => ConditionType::CustomExpression,
        }
    }

    /// Evaluate against a status transition.
    pub fn matches_status(&self, event: &DeviceStatusEvent) -> bool {
        match self {
            Condition::StatusEquals(name) => event.new_status.matches_name(name),
            Condition::OfflineForDuration(_) => event.new_status == DeviceStatus::Offline,
            Condition::EventTypeMatches(_) | Condition::CustomExpression(_) => false,
        }
    }

    /// Evaluate against a heartbeat.
    pub fn matches_heartbeat(&self, event: &DeviceHeartbeatEvent) -> bool {
        match self {
            Condition::EventTypeMatches(expected) if expected == EVENT_TYPE_WILDCARD => true,
            Condition::EventTypeMatches(expected) => {
                event.event_type_tag() == Some(expected.as_str())
            }
            Condition::StatusEquals(_)
            | Condition::OfflineForDuration(_)
            | Condition::CustomExpression(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn rule(kind: ConditionType, value: &str) -> MonitoringRule {
        let now = Utc::now();
        MonitoringRule {
            id: 1,
            name: "test rule".into(),
            description: None,
            enabled: true,
            condition_type: kind,
            condition_value: value.into(),
            action_type: ActionType::CreateAlert,
            alert_severity: AlertSeverity::Warning,
            device_id_filter: None,
            device_type_filter: None,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn status_event(new_status: DeviceStatus) -> DeviceStatusEvent {
        DeviceStatusEvent {
            device_id: "GATE-1".into(),
            device_name: "North gate".into(),
            device_type: DeviceType::Gate,
            old_status: DeviceStatus::Active,
            new_status,
            reason: String::new(),
            location: String::new(),
            metadata: HashMap::new(),
        }
    }

    fn heartbeat(tag: Option<&str>) -> DeviceHeartbeatEvent {
        let mut health_data = HashMap::new();
        if let Some(tag) = tag {
            health_data.insert("eventType".to_string(), tag.to_string());
        }
        DeviceHeartbeatEvent {
            device_id: "GATE-1".into(),
            device_type: DeviceType::Gate,
            status: DeviceStatus::Active,
            location: String::new(),
            health_data,
        }
    }

    #[test]
    fn status_equals_is_case_insensitive() {
        let cond = Condition::StatusEquals("offline".into());
        assert!(cond.matches_status(&status_event(DeviceStatus::Offline)));
        assert!(!cond.matches_status(&status_event(DeviceStatus::Active)));
    }

    #[test]
    fn offline_for_duration_reacts_to_offline_transition_only() {
        let cond = Condition::from_parts(ConditionType::OfflineForDuration, "00:05:00").unwrap();
        assert!(cond.matches_status(&status_event(DeviceStatus::Offline)));
        assert!(!cond.matches_status(&status_event(DeviceStatus::Error)));
    }

    #[test]
    fn event_type_and_custom_never_match_status_events() {
        let event = status_event(DeviceStatus::Offline);
        assert!(!Condition::EventTypeMatches("*".into()).matches_status(&event));
        assert!(!Condition::CustomExpression("status == 'Offline'".into()).matches_status(&event));
    }

    #[test]
    fn event_type_matches_heartbeat_tag() {
        let cond = Condition::EventTypeMatches("DoorForced".into());
        assert!(cond.matches_heartbeat(&heartbeat(Some("DoorForced"))));
        assert!(!cond.matches_heartbeat(&heartbeat(Some("DoorClosed"))));
        assert!(!cond.matches_heartbeat(&heartbeat(None)));
    }

    #[test]
    fn wildcard_matches_any_heartbeat() {
        let cond = Condition::EventTypeMatches("*".into());
        assert!(cond.matches_heartbeat(&heartbeat(None)));
        assert!(cond.matches_heartbeat(&heartbeat(Some("anything"))));
    }

    #[test]
    fn status_conditions_never_match_heartbeats() {
        let hb = heartbeat(Some("Offline"));
        assert!(!Condition::StatusEquals("Active".into()).matches_heartbeat(&hb));
        assert!(!Condition::OfflineForDuration(String::new()).matches_heartbeat(&hb));
    }

    #[test]
    fn empty_comparison_value_is_rejected() {
        assert_matches!(
            Condition::from_parts(ConditionType::StatusEquals, "  "),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            Condition::from_parts(ConditionType::EventTypeMatches, ""),
            Err(CoreError::Validation(_))
        );
        assert!(Condition::from_parts(ConditionType::CustomExpression, "").is_ok());
    }

    #[test]
    fn condition_round_trips_kind() {
        for kind in ConditionType::ALL {
            let cond = Condition::from_parts(*kind, "x").unwrap();
            assert_eq!(cond.kind(), *kind);
        }
    }

    #[test]
    fn unfiltered_rule_applies_to_every_device() {
        let r = rule(ConditionType::StatusEquals, "Offline");
        assert!(r.applies_to("GATE-1", &DeviceType::Gate));
        assert!(r.applies_to("LIFT-7", &DeviceType::Lift));
    }

    #[test]
    fn device_id_filter_excludes_other_devices() {
        let mut r = rule(ConditionType::StatusEquals, "Offline");
        r.device_id_filter = Some("GATE-1".into());
        assert!(r.applies_to("GATE-1", &DeviceType::Gate));
        assert!(!r.applies_to("GATE-2", &DeviceType::Gate));
    }

    #[test]
    fn both_filters_must_hold() {
        let mut r = rule(ConditionType::StatusEquals, "Offline");
        r.device_id_filter = Some("GATE-1".into());
        r.device_type_filter = Some("lift".into());
        assert!(!r.applies_to("GATE-1", &DeviceType::Gate));
        r.device_type_filter = Some("GATE".into());
        assert!(r.applies_to("GATE-1", &DeviceType::Gate));
    }

    #[test]
    fn record_trigger_bumps_count_and_stamps() {
        let mut r = rule(ConditionType::StatusEquals, "Offline");
        let at = Utc::now();
        r.record_trigger(at);
        r.record_trigger(at);
        assert_eq!(r.trigger_count, 2);
        assert_eq!(r.last_triggered_at, Some(at));
        assert_eq!(r.updated_at, at);
    }

    #[test]
    fn set_enabled_only_touches_on_change() {
        let mut r = rule(ConditionType::StatusEquals, "Offline");
        let before = r.updated_at;
        r.set_enabled(true, Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(r.updated_at, before);
        let later = Utc::now() + chrono::Duration::seconds(10);
        r.set_enabled(false, later);
        assert!(!r.enabled);
        assert_eq!(r.updated_at, later);
    }
}
