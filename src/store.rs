//! store.rs: persistence boundary for assessments, alerts and escalation records.
//!
//! Alerts are keyed by id with a secondary index on `(user_id, alert_type)`
//! for the single open alert; assessments by `(user_id, computed_at)`.
//! A [`CommitBatch`] is validated in full before anything is written, so an
//! analysis run lands completely or not at all.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alert::{Alert, AlertType, EscalationRecord};
use crate::error::{EngineError, EngineResult};
use crate::scoring::RiskAssessment;
use crate::snapshot::UserId;

/// One alert mutation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertWrite {
    /// New alert; rejected if its `(user, type)` already has an open alert.
    Insert(Alert),
    /// Replace an existing alert if its stored version still matches.
    Update { alert: Alert, expected_version: u64 },
}

/// Everything one run (or command) writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBatch {
    pub assessment: Option<RiskAssessment>,
    pub alerts: Vec<AlertWrite>,
}

pub trait RiskStore: Send + Sync {
    fn latest_assessment(&self, user: &UserId) -> Option<RiskAssessment>;
    /// Oldest first, `from <= computed_at <= to`.
    fn assessments_between(&self, user: &UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RiskAssessment>;
    /// Newest `n`, oldest first.
    fn recent_assessments(&self, user: &UserId, n: usize) -> Vec<RiskAssessment>;

    fn alert(&self, id: Uuid) -> Option<Alert>;
    fn open_alert(&self, user: &UserId, alert_type: AlertType) -> Option<Alert>;
    /// All alerts of a user, resolved ones included.
    fn alerts_for_user(&self, user: &UserId) -> Vec<Alert>;

    /// Apply a batch atomically. Stored alerts get their version assigned here
    /// (`1` on insert, previous + 1 on update) and are returned in batch order.
    fn commit(&self, batch: CommitBatch) -> EngineResult<Vec<Alert>>;

    fn append_escalation(&self, record: EscalationRecord) -> EngineResult<()>;
    fn update_escalation(&self, record: EscalationRecord) -> EngineResult<()>;
    /// Oldest first.
    fn escalations_for_alert(&self, alert_id: Uuid) -> Vec<EscalationRecord>;
}

#[derive(Debug, Default)]
struct Inner {
    assessments: HashMap<UserId, Vec<RiskAssessment>>,
    alerts: HashMap<Uuid, Alert>,
    open_index: HashMap<(UserId, AlertType), Uuid>,
    escalations: HashMap<Uuid, Vec<EscalationRecord>>,
}

/// Process-local store. One mutex; every method is a short critical section.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl RiskStore for InMemoryStore {
    fn latest_assessment(&self, user: &UserId) -> Option<RiskAssessment> {
        self.lock().assessments.get(user).and_then(|v| v.last().cloned())
    }

    fn assessments_between(&self, user: &UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RiskAssessment> {
        self.lock()
            .assessments
            .get(user)
            .map(|v| {
                v.iter()
                    .filter(|a| a.computed_at >= from && a.computed_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn recent_assessments(&self, user: &UserId, n: usize) -> Vec<RiskAssessment> {
        self.lock()
            .assessments
            .get(user)
            .map(|v| v[v.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default()
    }

    fn alert(&self, id: Uuid) -> Option<Alert> {
        self.lock().alerts.get(&id).cloned()
    }

    fn open_alert(&self, user: &UserId, alert_type: AlertType) -> Option<Alert> {
        let g = self.lock();
        g.open_index
            .get(&(user.clone(), alert_type))
            .and_then(|id| g.alerts.get(id))
            .cloned()
    }

    fn alerts_for_user(&self, user: &UserId) -> Vec<Alert> {
        let g = self.lock();
        let mut v: Vec<Alert> = g.alerts.values().filter(|a| &a.user_id == user).cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        v
    }

    fn commit(&self, batch: CommitBatch) -> EngineResult<Vec<Alert>> {
        let mut g = self.lock();

        // 1) Validate against store + earlier writes of the same batch.
        let mut staged: Vec<Alert> = Vec::with_capacity(batch.alerts.len());
        for write in batch.alerts {
            match write {
                AlertWrite::Update {
                    mut alert,
                    expected_version,
                } => {
                    let current_version = staged
                        .iter()
                        .rev()
                        .find(|a| a.id == alert.id)
                        .or_else(|| g.alerts.get(&alert.id))
                        .map(|a| a.version)
                        .ok_or(EngineError::AlertNotFound(alert.id))?;
                    if current_version != expected_version {
                        return Err(EngineError::Conflict {
                            alert_id: alert.id,
                            expected: expected_version,
                            actual: current_version,
                        });
                    }
                    alert.version = current_version + 1;
                    staged.push(alert);
                }
                AlertWrite::Insert(mut alert) => {
                    if g.alerts.contains_key(&alert.id) || staged.iter().any(|a| a.id == alert.id) {
                        return Err(EngineError::Store(format!("duplicate alert id {}", alert.id)));
                    }
                    let key = (alert.user_id.clone(), alert.alert_type);
                    let open_in_batch = staged
                        .iter()
                        .any(|a| a.is_open() && a.user_id == key.0 && a.alert_type == key.1);
                    let open_in_store = g.open_index.get(&key).and_then(|id| {
                        // Still open unless this batch resolves it.
                        match staged.iter().rev().find(|a| a.id == *id) {
                            Some(s) if !s.is_open() => None,
                            _ => g.alerts.get(id),
                        }
                    });
                    if let Some(existing) = open_in_store {
                        return Err(EngineError::Conflict {
                            alert_id: existing.id,
                            expected: 0,
                            actual: existing.version,
                        });
                    }
                    if open_in_batch {
                        return Err(EngineError::Store(format!(
                            "batch opens two {:?} alerts for one user",
                            key.1
                        )));
                    }
                    alert.version = 1;
                    staged.push(alert);
                }
            }
        }

        // 2) Apply.
        if let Some(a) = batch.assessment {
            let list = g.assessments.entry(a.user_id.clone()).or_default();
            let pos = list.partition_point(|x| x.computed_at <= a.computed_at);
            list.insert(pos, a);
        }
        for alert in staged.iter() {
            let key = (alert.user_id.clone(), alert.alert_type);
            if alert.is_open() {
                g.open_index.insert(key, alert.id);
            } else if g.open_index.get(&key) == Some(&alert.id) {
                g.open_index.remove(&key);
            }
            g.alerts.insert(alert.id, alert.clone());
        }
        Ok(staged)
    }

    fn append_escalation(&self, record: EscalationRecord) -> EngineResult<()> {
        self.lock().escalations.entry(record.alert_id).or_default().push(record);
        Ok(())
    }

    fn update_escalation(&self, record: EscalationRecord) -> EngineResult<()> {
        let mut g = self.lock();
        let slot = g
            .escalations
            .get_mut(&record.alert_id)
            .and_then(|v| v.iter_mut().find(|r| r.id == record.id))
            .ok_or_else(|| EngineError::Store(format!("unknown escalation record {}", record.id)))?;
        *slot = record;
        Ok(())
    }

    fn escalations_for_alert(&self, alert_id: Uuid) -> Vec<EscalationRecord> {
        self.lock().escalations.get(&alert_id).cloned().unwrap_or_default()
    }
}
