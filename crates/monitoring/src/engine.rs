//! Rule evaluation.
//!
//! For each inbound device event the engine selects the enabled rules that
//! apply to the device, evaluates their conditions, and for every match
//! records an alert, bumps the rule's trigger bookkeeping and publishes
//! `monitoring.alert.triggered`. All side effects of one event share a
//! single [`TriggerUnit`]: they commit together or not at all.

use std::sync::Arc;

use chrono::Utc;
use fleet_core::alert::{Alert, AlertTriggeredEvent, NewAlert};
use fleet_core::device::{DeviceHeartbeatEvent, DeviceStatusEvent};
use fleet_core::error::CoreError;
use fleet_core::lookup::ConditionType;
use fleet_core::rule::{Condition, MonitoringRule};
use fleet_core::types::DbId;
use fleet_events::{MessagingError, Publisher};

use crate::store::{RuleStore, StoreError, TriggerUnit};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Rule {rule_id} could not be evaluated: {source}")]
    RuleEvaluation {
        rule_id: DbId,
        #[source]
        source: CoreError,
    },

    #[error("Failed to publish alert event: {0}")]
    Publish(#[from] MessagingError),
}

/// A rule that matched, with the alert it should raise.
struct Match {
    rule: MonitoringRule,
    alert: NewAlert,
}

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    publisher: Publisher,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Evaluate a status transition against every enabled rule.
    ///
    /// Returns the alerts raised, empty when nothing matched.
    pub async fn handle_status_event(
        &self,
        event: &DeviceStatusEvent,
    ) -> Result<Vec<Alert>, EngineError> {
        let rules = self.store.list_enabled().await?;
        let mut matches = Vec::new();

        for rule in rules {
            if !rule.enabled || !rule.applies_to(&event.device_id, &event.device_type) {
                continue;
            }
            let condition = evaluable(&rule)?;
            if let Condition::CustomExpression(_) = condition {
                tracing::debug!(rule_id = rule.id, "Skipping custom expression rule");
                continue;
            }
            if condition.matches_status(event) {
                let alert = NewAlert::for_status_event(&rule, event);
                matches.push(Match { rule, alert });
            }
        }

        tracing::debug!(
            device_id = %event.device_id,
            new_status = %event.new_status,
            matched = matches.len(),
            "Status event evaluated",
        );
        self.fire(matches).await
    }

    /// Evaluate a heartbeat against the enabled event-type rules.
    ///
    /// Heartbeats carry no status transition, so only
    /// [`ConditionType::EventTypeMatches`] rules are candidates.
    pub async fn handle_heartbeat(
        &self,
        event: &DeviceHeartbeatEvent,
    ) -> Result<Vec<Alert>, EngineError> {
        let rules = self.store.list_enabled().await?;
        let mut matches = Vec::new();

        for rule in rules {
            if !rule.enabled
                || rule.condition_type != ConditionType::EventTypeMatches
                || !rule.applies_to(&event.device_id, &event.device_type)
            {
                continue;
            }
            if evaluable(&rule)?.matches_heartbeat(event) {
                let alert = NewAlert::for_heartbeat(&rule, event);
                matches.push(Match { rule, alert });
            }
        }

        tracing::debug!(
            device_id = %event.device_id,
            event_type = event.event_type_tag().unwrap_or("-"),
            matched = matches.len(),
            "Heartbeat evaluated",
        );
        self.fire(matches).await
    }

    /// Apply every match inside one unit of work.
    async fn fire(&self, matches: Vec<Match>) -> Result<Vec<Alert>, EngineError> {
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let mut unit = self.store.begin().await?;
        let alerts = match self.apply(unit.as_mut(), &matches).await {
            Ok(alerts) => alerts,
            Err(e) => {
                if let Err(rollback) = unit.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };
        unit.commit().await?;

        for alert in &alerts {
            tracing::info!(
                alert_id = alert.id,
                rule_id = ?alert.source_rule_id,
                device_id = ?alert.source_device_id,
                severity = %alert.severity,
                "Alert raised",
            );
        }
        Ok(alerts)
    }

    async fn apply(
        &self,
        unit: &mut dyn TriggerUnit,
        matches: &[Match],
    ) -> Result<Vec<Alert>, EngineError> {
        let mut alerts = Vec::with_capacity(matches.len());
        for Match { rule, alert } in matches {
            let alert = unit.add_alert(alert.clone()).await?;
            unit.record_trigger(rule.id, Utc::now()).await?;
            alerts.push(alert);
        }

        // Publish only once every write of the unit has succeeded.
        for (alert, Match { rule, .. }) in alerts.iter().zip(matches) {
            self.publisher
                .publish(AlertTriggeredEvent::new(alert, rule))
                .await?;
        }
        Ok(alerts)
    }
}

/// An invalid stored rule fails every event it is a candidate for until it
/// is fixed or disabled.
fn evaluable(rule: &MonitoringRule) -> Result<Condition, EngineError> {
    rule.condition().map_err(|source| {
        tracing::warn!(
            rule_id = rule.id,
            rule_name = %rule.name,
            error = %source,
            "Rule definition is invalid; fix or disable it to resume alerting",
        );
        EngineError::RuleEvaluation {
            rule_id: rule.id,
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use fleet_core::device::{DeviceStatus, DeviceType, HEALTH_EVENT_TYPE_KEY};
    use fleet_core::lookup::{ActionType, AlertSeverity};
    use fleet_events::{Broker, InMemoryBroker, QueueBinding};

    use super::*;
    use crate::memory_store::{FailPoint, InMemoryRuleStore};

    const ALERT_QUEUE: &str = "alerts";

    fn rule(id: DbId, kind: ConditionType, value: &str) -> MonitoringRule {
        let now = Utc::now();
        MonitoringRule {
            id,
            name: format!("rule {id}"),
            description: None,
            enabled: true,
            condition_type: kind,
            condition_value: value.into(),
            action_type: ActionType::CreateAlert,
            alert_severity: AlertSeverity::Critical,
            device_id_filter: None,
            device_type_filter: None,
            last_triggered_at: None,
            trigger_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn status(device_id: &str, new_status: DeviceStatus) -> DeviceStatusEvent {
        DeviceStatusEvent {
            device_id: device_id.into(),
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
            health_data.insert(HEALTH_EVENT_TYPE_KEY.to_string(), tag.to_string());
        }
        DeviceHeartbeatEvent {
            device_id: "LIFT-1".into(),
            device_type: DeviceType::Lift,
            status: DeviceStatus::Active,
            location: String::new(),
            health_data,
        }
    }

    async fn engine(store: &InMemoryRuleStore) -> (RuleEngine, InMemoryBroker) {
        let broker = InMemoryBroker::new("fleet.events");
        let binding = QueueBinding::new(ALERT_QUEUE, ["monitoring.#"]).unwrap();
        broker.declare_queue(&binding).await.unwrap();
        let engine = RuleEngine::new(
            Arc::new(store.clone()),
            Publisher::new(Arc::new(broker.clone())),
        );
        (engine, broker)
    }

    #[tokio::test]
    async fn status_equals_raises_alert_and_bumps_counter() {
        let store = InMemoryRuleStore::with_rules([rule(1, ConditionType::StatusEquals, "offline")]);
        let (engine, broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(store.alerts(), alerts);
        assert_eq!(store.rule(1).unwrap().trigger_count, 1);
        assert_eq!(broker.ready_count(ALERT_QUEUE), 1);
    }

    #[tokio::test]
    async fn non_matching_status_has_no_side_effects() {
        let store = InMemoryRuleStore::with_rules([rule(1, ConditionType::StatusEquals, "Offline")]);
        let (engine, broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Active))
            .await
            .unwrap();

        assert!(alerts.is_empty());
        assert_eq!(store.rule(1).unwrap().trigger_count, 0);
        assert_eq!(store.commits(), 0);
        assert_eq!(broker.published_count(), 0);
    }

    #[tokio::test]
    async fn offline_for_duration_reacts_to_the_transition() {
        let store =
            InMemoryRuleStore::with_rules([rule(1, ConditionType::OfflineForDuration, "PT5M")]);
        let (engine, _broker) = engine(&store).await;

        let offline = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();
        let error = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Error))
            .await
            .unwrap();

        assert_eq!(offline.len(), 1);
        assert!(error.is_empty());
    }

    #[tokio::test]
    async fn event_type_and_custom_rules_ignore_status_events() {
        let store = InMemoryRuleStore::with_rules([
            rule(1, ConditionType::EventTypeMatches, "*"),
            rule(2, ConditionType::CustomExpression, "status == 'Offline'"),
        ]);
        let (engine, _broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn each_matching_rule_fires_once() {
        let store = InMemoryRuleStore::with_rules([
            rule(1, ConditionType::StatusEquals, "Offline"),
            rule(2, ConditionType::OfflineForDuration, ""),
            rule(3, ConditionType::StatusEquals, "Maintenance"),
        ]);
        let (engine, broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();

        let mut rule_ids: Vec<_> = alerts.iter().filter_map(|a| a.source_rule_id).collect();
        rule_ids.sort();
        assert_eq!(rule_ids, vec![1, 2]);
        assert_eq!(store.rule(1).unwrap().trigger_count, 1);
        assert_eq!(store.rule(2).unwrap().trigger_count, 1);
        assert_eq!(store.rule(3).unwrap().trigger_count, 0);
        assert_eq!(store.commits(), 1);
        assert_eq!(broker.ready_count(ALERT_QUEUE), 2);
    }

    #[tokio::test]
    async fn device_filters_scope_rules() {
        let mut by_id = rule(1, ConditionType::StatusEquals, "Offline");
        by_id.device_id_filter = Some("GATE-9".into());
        let mut by_type = rule(2, ConditionType::StatusEquals, "Offline");
        by_type.device_type_filter = Some("lift".into());
        let store = InMemoryRuleStore::with_rules([by_id, by_type]);
        let (engine, _broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();
        assert!(alerts.is_empty());

        let alerts = engine
            .handle_status_event(&status("GATE-9", DeviceStatus::Offline))
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source_rule_id, Some(1));
    }

    #[tokio::test]
    async fn disabled_rules_are_never_candidates() {
        let mut disabled = rule(1, ConditionType::StatusEquals, "Offline");
        disabled.enabled = false;
        let store = InMemoryRuleStore::with_rules([disabled]);
        let (engine, _broker) = engine(&store).await;

        let alerts = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await
            .unwrap();
        assert!(alerts.is_empty());
        assert_eq!(store.rule(1).unwrap().trigger_count, 0);
    }

    #[tokio::test]
    async fn heartbeat_matches_tag_or_wildcard_only() {
        let store = InMemoryRuleStore::with_rules([
            rule(1, ConditionType::EventTypeMatches, "DoorForced"),
            rule(2, ConditionType::EventTypeMatches, "*"),
            rule(3, ConditionType::StatusEquals, "Active"),
        ]);
        let (engine, _broker) = engine(&store).await;

        let tagged = engine.handle_heartbeat(&heartbeat(Some("DoorForced"))).await.unwrap();
        let untagged = engine.handle_heartbeat(&heartbeat(None)).await.unwrap();
        let other = engine.handle_heartbeat(&heartbeat(Some("doorforced"))).await.unwrap();

        assert_eq!(tagged.len(), 2);
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].source_rule_id, Some(2));
        assert_eq!(other.len(), 1);
        assert_eq!(store.rule(3).unwrap().trigger_count, 0);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_everything() {
        let store = InMemoryRuleStore::with_rules([
            rule(1, ConditionType::StatusEquals, "Offline"),
            rule(2, ConditionType::OfflineForDuration, ""),
        ]);
        store.fail_once(FailPoint::RecordTrigger);
        let (engine, _broker) = engine(&store).await;

        let result = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await;

        assert_matches!(result, Err(EngineError::Persistence(_)));
        assert!(store.alerts().is_empty());
        assert_eq!(store.rule(1).unwrap().trigger_count, 0);
        assert_eq!(store.rule(2).unwrap().trigger_count, 0);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn later_write_failure_publishes_nothing() {
        let store = InMemoryRuleStore::with_rules([
            rule(1, ConditionType::StatusEquals, "Offline"),
            rule(2, ConditionType::StatusEquals, "Offline"),
        ]);
        store.fail_after(FailPoint::AddAlert, 1);
        let (engine, broker) = engine(&store).await;

        let result = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await;

        assert_matches!(result, Err(EngineError::Persistence(_)));
        assert!(store.alerts().is_empty());
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(broker.ready_count(ALERT_QUEUE), 0);
        assert_eq!(broker.published_count(), 0);
    }

    #[tokio::test]
    async fn publish_failure_rolls_back() {
        let store = InMemoryRuleStore::with_rules([rule(1, ConditionType::StatusEquals, "Offline")]);
        let (engine, broker) = engine(&store).await;
        broker.set_connected(false);

        let result = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await;

        assert_matches!(
            result,
            Err(EngineError::Publish(MessagingError::TransportUnavailable(_)))
        );
        assert!(store.alerts().is_empty());
        assert_eq!(store.rule(1).unwrap().trigger_count, 0);
    }

    #[tokio::test]
    async fn invalid_rule_definition_is_an_evaluation_error() {
        let store = InMemoryRuleStore::with_rules([rule(4, ConditionType::StatusEquals, "  ")]);
        let (engine, _broker) = engine(&store).await;

        let result = engine
            .handle_status_event(&status("GATE-1", DeviceStatus::Offline))
            .await;
        assert_matches!(result, Err(EngineError::RuleEvaluation { rule_id: 4, .. }));
        assert_eq!(store.commits(), 0);
    }
}
