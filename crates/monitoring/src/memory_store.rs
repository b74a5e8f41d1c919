//! [`RuleStore`] held in process memory.
//!
//! Writes are staged in the unit of work and applied on commit, so a
//! rolled-back or dropped unit leaves the store untouched. Failures can be
//! injected at each step to exercise the engine's abort path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use fleet_core::alert::{Alert, NewAlert};
use fleet_core::lookup::AlertStatus;
use fleet_core::rule::MonitoringRule;
use fleet_core::types::{DbId, Timestamp};

use crate::store::{RuleStore, StoreError, TriggerUnit};

/// A step at which the next unit of work fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    AddAlert,
    RecordTrigger,
    Commit,
}

#[derive(Default)]
struct State {
    rules: BTreeMap<DbId, MonitoringRule>,
    alerts: Vec<Alert>,
    next_alert_id: DbId,
    /// Step to fail and how many passes through it to let succeed first.
    fail_at: Option<(FailPoint, u32)>,
    commits: u64,
    rollbacks: u64,
}

impl State {
    fn check(&mut self, point: FailPoint) -> Result<(), StoreError> {
        match &mut self.fail_at {
            Some((armed, skip)) if *armed == point => {
                if *skip > 0 {
                    *skip -= 1;
                    return Ok(());
                }
                self.fail_at = None;
                Err(StoreError::Persistence(format!("injected failure at {point:?}")))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRuleStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = MonitoringRule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.upsert_rule(rule);
        }
        store
    }

    /// Insert or replace a rule by id.
    pub fn upsert_rule(&self, rule: MonitoringRule) {
        self.lock().rules.insert(rule.id, rule);
    }

    pub fn rule(&self, id: DbId) -> Option<MonitoringRule> {
        self.lock().rules.get(&id).cloned()
    }

    /// Committed alerts in insertion order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    /// Make the next unit of work fail at `point`.
    pub fn fail_once(&self, point: FailPoint) {
        self.fail_after(point, 0);
    }

    /// Let `skip` passes through `point` succeed, then fail the next one.
    pub fn fail_after(&self, point: FailPoint, skip: u32) {
        self.lock().fail_at = Some((point, skip));
    }

    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> u64 {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_enabled(&self) -> Result<Vec<MonitoringRule>, StoreError> {
        Ok(self
            .lock()
            .rules
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn TriggerUnit>, StoreError> {
        self.lock().check(FailPoint::Begin)?;
        Ok(Box::new(MemoryTriggerUnit {
            store: self.clone(),
            alerts: Vec::new(),
            triggers: Vec::new(),
        }))
    }
}

struct MemoryTriggerUnit {
    store: InMemoryRuleStore,
    alerts: Vec<Alert>,
    triggers: Vec<(DbId, Timestamp)>,
}

#[async_trait]
impl TriggerUnit for MemoryTriggerUnit {
    async fn add_alert(&mut self, alert: NewAlert) -> Result<Alert, StoreError> {
        let id = {
            let mut state = self.store.lock();
            state.check(FailPoint::AddAlert)?;
            state.next_alert_id += 1;
            state.next_alert_id
        };

        let now = Utc::now();
        let alert = Alert {
            id,
            title: alert.title,
            message: alert.message,
            severity: alert.severity,
            status: AlertStatus::Active,
            source_device_id: alert.source_device_id,
            source_device_name: alert.source_device_name,
            source_rule_id: alert.source_rule_id,
            source_rule_name: alert.source_rule_name,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        self.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn record_trigger(&mut self, rule_id: DbId, at: Timestamp) -> Result<(), StoreError> {
        let mut state = self.store.lock();
        state.check(FailPoint::RecordTrigger)?;
        if !state.rules.contains_key(&rule_id) {
            return Err(StoreError::NotFound {
                entity: "MonitoringRule",
                id: rule_id,
            });
        }
        self.triggers.push((rule_id, at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.store.lock();
        state.check(FailPoint::Commit)?;

        for (rule_id, at) in this.triggers {
            if let Some(rule) = state.rules.get_mut(&rule_id) {
                rule.record_trigger(at);
            }
        }
        state.alerts.extend(this.alerts);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.store.lock().rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use fleet_core::lookup::{ActionType, AlertSeverity, ConditionType};

    use super::*;

    fn rule(id: DbId, enabled: bool) -> MonitoringRule {
        let now = Utc::now();
        MonitoringRule {
            id,
            name: format!("rule {id}"),
            description: None,
            enabled,
            condition_type: ConditionType::StatusEquals,
            condition_value: "Offline".into(),
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

    fn new_alert(rule_id: DbId) -> NewAlert {
        NewAlert {
            title: "t".into(),
            message: "m".into(),
            severity: AlertSeverity::Warning,
            source_device_id: Some("GATE-1".into()),
            source_device_name: None,
            source_rule_id: Some(rule_id),
            source_rule_name: None,
        }
    }

    #[tokio::test]
    async fn lists_only_enabled_rules() {
        let store = InMemoryRuleStore::with_rules([rule(1, true), rule(2, false)]);
        let ids: Vec<DbId> = store.list_enabled().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn commit_applies_staged_writes() {
        let store = InMemoryRuleStore::with_rules([rule(1, true)]);
        let mut unit = store.begin().await.unwrap();
        let alert = unit.add_alert(new_alert(1)).await.unwrap();
        unit.record_trigger(1, Utc::now()).await.unwrap();
        assert!(store.alerts().is_empty());

        unit.commit().await.unwrap();
        assert_eq!(store.alerts(), vec![alert]);
        assert_eq!(store.rule(1).unwrap().trigger_count, 1);
        assert!(store.rule(1).unwrap().last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_staged_writes() {
        let store = InMemoryRuleStore::with_rules([rule(1, true)]);

        let mut unit = store.begin().await.unwrap();
        unit.add_alert(new_alert(1)).await.unwrap();
        unit.record_trigger(1, Utc::now()).await.unwrap();
        unit.rollback().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.add_alert(new_alert(1)).await.unwrap();
        drop(unit);

        assert!(store.alerts().is_empty());
        assert_eq!(store.rule(1).unwrap().trigger_count, 0);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryRuleStore::with_rules([rule(1, true)]);
        store.fail_once(FailPoint::AddAlert);

        let mut unit = store.begin().await.unwrap();
        assert_matches!(
            unit.add_alert(new_alert(1)).await,
            Err(StoreError::Persistence(_))
        );
        assert!(unit.add_alert(new_alert(1)).await.is_ok());
    }

    #[tokio::test]
    async fn delayed_failure_skips_earlier_passes() {
        let store = InMemoryRuleStore::with_rules([rule(1, true)]);
        store.fail_after(FailPoint::RecordTrigger, 2);

        let mut unit = store.begin().await.unwrap();
        assert!(unit.record_trigger(1, Utc::now()).await.is_ok());
        assert!(unit.record_trigger(1, Utc::now()).await.is_ok());
        assert_matches!(
            unit.record_trigger(1, Utc::now()).await,
            Err(StoreError::Persistence(_))
        );
        assert!(unit.record_trigger(1, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn trigger_for_unknown_rule_is_not_found() {
        let store = InMemoryRuleStore::new();
        let mut unit = store.begin().await.unwrap();
        assert_matches!(
            unit.record_trigger(9, Utc::now()).await,
            Err(StoreError::NotFound { id: 9, .. })
        );
    }
}
