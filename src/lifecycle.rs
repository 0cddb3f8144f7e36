//! Alert Lifecycle Manager.
//!
//! Owns every alert write. A detection either refreshes the open alert of the
//! same `(user, type)` or creates one; status changes follow
//! `active → acknowledged → resolved` and are guarded by the alert version.
//! Severity only ever rises in place; lowering it is an explicit downgrade
//! that resolves the old alert and opens a new one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actions::recommended_actions;
use crate::alert::{Alert, AlertStatus, AlertType, Severity};
use crate::classifier::Classification;
use crate::error::{EngineError, EngineResult};
use crate::scoring::RiskAssessment;
use crate::snapshot::UserId;
use crate::store::{AlertWrite, CommitBatch, RiskStore};

/// Result of folding one detection into the alert set.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Created(Alert),
    Refreshed { alert: Alert, previous_severity: Severity },
}

impl DetectionOutcome {
    pub fn alert(&self) -> &Alert {
        match self {
            DetectionOutcome::Created(a) => a,
            DetectionOutcome::Refreshed { alert, .. } => alert,
        }
    }

    /// Newly created alerts count as raised from nothing.
    pub fn severity_raised(&self) -> bool {
        match self {
            DetectionOutcome::Created(_) => true,
            DetectionOutcome::Refreshed {
                alert,
                previous_severity,
            } => alert.severity > *previous_severity,
        }
    }
}

/// A classification with its phrased reasoning, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub classification: Classification,
    pub reasoning: String,
}

pub fn new_alert(user: &UserId, d: &Detection, now: DateTime<Utc>) -> Alert {
    let c = &d.classification;
    Alert {
        id: Uuid::new_v4(),
        user_id: user.clone(),
        alert_type: c.alert_type,
        severity: c.severity,
        confidence_score: c.confidence,
        risk_score: c.risk_score,
        reasoning: d.reasoning.clone(),
        contributing_factors: c.contributing_kinds(),
        recommended_actions: c.recommended_actions.clone(),
        status: AlertStatus::Active,
        crisis_override: c.crisis_override,
        created_at: now,
        updated_at: now,
        acknowledged_at: None,
        resolved_at: None,
        detections: 1,
        version: 0,
    }
}

/// Fold a repeat detection into an open alert. Status is left alone so an
/// acknowledged alert stays acknowledged.
pub fn refresh(existing: &Alert, d: &Detection, now: DateTime<Utc>) -> Alert {
    let c = &d.classification;
    let severity = existing.severity.max(c.severity);
    let actions = if severity == c.severity {
        c.recommended_actions.clone()
    } else {
        owned_actions(recommended_actions(existing.alert_type, severity))
    };
    Alert {
        severity,
        confidence_score: c.confidence,
        risk_score: c.risk_score,
        reasoning: d.reasoning.clone(),
        contributing_factors: c.contributing_kinds(),
        recommended_actions: actions,
        crisis_override: existing.crisis_override || c.crisis_override,
        updated_at: now,
        detections: existing.detections.saturating_add(1),
        ..existing.clone()
    }
}

fn owned_actions(actions: &[&str]) -> Vec<String> {
    actions.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn RiskStore>,
    max_commit_retries: u8,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn RiskStore>, max_commit_retries: u8) -> Self {
        Self {
            store,
            max_commit_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn RiskStore> {
        &self.store
    }

    /// Persist an analysis run: the assessment plus the alert change its
    /// detection implies, in one batch.
    ///
    /// Every commit attempt goes through `fence`, which either runs the write
    /// it is handed or refuses with an error, writing nothing. Pass
    /// `|write| write()` for an unconditional commit.
    ///
    /// A concurrent writer on the same alert makes the commit conflict; the
    /// plan is rebuilt from the fresh alert and retried.
    pub fn commit_run<F>(
        &self,
        user: &UserId,
        assessment: Option<RiskAssessment>,
        detection: Option<&Detection>,
        now: DateTime<Utc>,
        fence: F,
    ) -> EngineResult<Option<DetectionOutcome>>
    where
        F: Fn(&dyn Fn() -> EngineResult<Vec<Alert>>) -> EngineResult<Vec<Alert>>,
    {
        let mut attempt: u8 = 0;
        loop {
            let (write, previous) = match detection {
                None => (None, None),
                Some(d) => match self.store.open_alert(user, d.classification.alert_type) {
                    Some(existing) => (
                        Some(AlertWrite::Update {
                            alert: refresh(&existing, d, now),
                            expected_version: existing.version,
                        }),
                        Some(existing.severity),
                    ),
                    None => (Some(AlertWrite::Insert(new_alert(user, d, now))), None),
                },
            };

            let batch = CommitBatch {
                assessment: assessment.clone(),
                alerts: write.into_iter().collect(),
            };
            match fence(&|| self.store.commit(batch.clone())) {
                Ok(mut written) => {
                    let Some(alert) = written.pop() else {
                        return Ok(None);
                    };
                    let outcome = match previous {
                        None => {
                            counter!("risk_alerts_created_total").increment(1);
                            info!(
                                target: "lifecycle",
                                user = %user.anon(),
                                alert_id = %alert.id,
                                alert_type = ?alert.alert_type,
                                severity = ?alert.severity,
                                "alert created"
                            );
                            DetectionOutcome::Created(alert)
                        }
                        Some(previous_severity) => {
                            debug!(
                                target: "lifecycle",
                                user = %user.anon(),
                                alert_id = %alert.id,
                                from = ?previous_severity,
                                to = ?alert.severity,
                                detections = alert.detections,
                                "alert refreshed"
                            );
                            DetectionOutcome::Refreshed {
                                alert,
                                previous_severity,
                            }
                        }
                    };
                    return Ok(Some(outcome));
                }
                Err(EngineError::Conflict { alert_id, .. }) if attempt < self.max_commit_retries => {
                    attempt += 1;
                    debug!(target: "lifecycle", user = %user.anon(), %alert_id, attempt, "commit conflict, replanning");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `active → acknowledged`, `active|acknowledged → resolved`.
    pub fn update_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> EngineResult<Alert> {
        let current = self.load_at_version(alert_id, expected_version)?;
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let mut next = current.clone();
        next.status = status;
        next.updated_at = now;
        match status {
            AlertStatus::Acknowledged => next.acknowledged_at = Some(now),
            AlertStatus::Resolved => next.resolved_at = Some(now),
            AlertStatus::Active => {}
        }

        let alert = self.commit_one(AlertWrite::Update {
            alert: next,
            expected_version,
        })?;
        info!(
            target: "lifecycle",
            user = %alert.user_id.anon(),
            alert_id = %alert.id,
            from = ?current.status,
            to = ?alert.status,
            version = alert.version,
            "alert status changed"
        );
        Ok(alert)
    }

    /// Resolve the alert and open a new one of the same type at `severity`.
    /// Returns the new alert.
    pub fn downgrade(
        &self,
        alert_id: Uuid,
        severity: Severity,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> EngineResult<Alert> {
        let current = self.load_at_version(alert_id, expected_version)?;
        if !current.is_open() {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: AlertStatus::Resolved,
            });
        }
        if severity >= current.severity {
            return Err(EngineError::InvalidDowngrade {
                from: current.severity,
                to: severity,
            });
        }

        let mut resolved = current.clone();
        resolved.status = AlertStatus::Resolved;
        resolved.resolved_at = Some(now);
        resolved.updated_at = now;

        let reopened = Alert {
            id: Uuid::new_v4(),
            severity,
            recommended_actions: owned_actions(recommended_actions(current.alert_type, severity)),
            reasoning: format!("{} Downgraded from {:?} to {:?}.", current.reasoning, current.severity, severity),
            status: AlertStatus::Active,
            crisis_override: false,
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            resolved_at: None,
            detections: 0,
            version: 0,
            ..current.clone()
        };

        let mut written = self.store.commit(CommitBatch {
            assessment: None,
            alerts: vec![
                AlertWrite::Update {
                    alert: resolved,
                    expected_version,
                },
                AlertWrite::Insert(reopened),
            ],
        })?;
        let alert = written
            .pop()
            .ok_or_else(|| EngineError::Store("downgrade commit returned no alert".into()))?;
        info!(
            target: "lifecycle",
            user = %alert.user_id.anon(),
            old_alert_id = %current.id,
            alert_id = %alert.id,
            from = ?current.severity,
            to = ?alert.severity,
            "alert downgraded"
        );
        Ok(alert)
    }

    /// Visible, lower-urgency alert telling the user to contact emergency
    /// services themselves. Deduplicated like any other type.
    pub fn raise_fallback(&self, user: &UserId, source: &Alert, now: DateTime<Utc>) -> EngineResult<DetectionOutcome> {
        let severity = Severity::High;
        let detection = Detection {
            classification: Classification {
                alert_type: AlertType::EmergencyFallback,
                severity,
                confidence: source.confidence_score,
                risk_score: source.risk_score,
                contributors: vec![],
                recommended_actions: owned_actions(recommended_actions(AlertType::EmergencyFallback, severity)),
                crisis_override: false,
            },
            reasoning: format!(
                "Your emergency contacts could not be reached about critical alert {}. Please contact your local emergency services or a crisis line directly.",
                source.id
            ),
        };
        self.commit_run(user, None, Some(&detection), now, |write| write())?
            .ok_or_else(|| EngineError::Store("fallback commit returned no alert".into()))
    }

    fn load_at_version(&self, alert_id: Uuid, expected_version: u64) -> EngineResult<Alert> {
        let current = self.store.alert(alert_id).ok_or(EngineError::AlertNotFound(alert_id))?;
        if current.version != expected_version {
            return Err(EngineError::Conflict {
                alert_id,
                expected: expected_version,
                actual: current.version,
            });
        }
        Ok(current)
    }

    fn commit_one(&self, write: AlertWrite) -> EngineResult<Alert> {
        self.store
            .commit(CommitBatch {
                assessment: None,
                alerts: vec![write],
            })?
            .pop()
            .ok_or_else(|| EngineError::Store("commit returned no alert".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn detection(ty: AlertType, sev: Severity) -> Detection {
        Detection {
            classification: Classification {
                alert_type: ty,
                severity: sev,
                confidence: 0.8,
                risk_score: 50.0,
                contributors: vec![],
                recommended_actions: owned_actions(recommended_actions(ty, sev)),
                crisis_override: false,
            },
            reasoning: "because".into(),
        }
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(Arc::new(InMemoryStore::new()), 3)
    }

    fn detect(m: &LifecycleManager, sev: Severity, at: DateTime<Utc>) -> DetectionOutcome {
        m.commit_run(
            &UserId::from("u"),
            None,
            Some(&detection(AlertType::DepressionRisk, sev)),
            at,
            |write| write(),
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn repeat_detection_refreshes_instead_of_duplicating() {
        let m = manager();
        let first = detect(&m, Severity::Moderate, t0());
        let second = detect(&m, Severity::Moderate, t0() + Duration::hours(1));
        assert!(matches!(first, DetectionOutcome::Created(_)));
        assert_eq!(first.alert().id, second.alert().id);
        assert_eq!(second.alert().detections, 2);
        assert_eq!(second.alert().version, 2);
        assert_eq!(m.store().alerts_for_user(&UserId::from("u")).len(), 1);
    }

    #[test]
    fn refresh_never_lowers_severity() {
        let m = manager();
        detect(&m, Severity::High, t0());
        let out = detect(&m, Severity::Low, t0() + Duration::hours(1));
        assert_eq!(out.alert().severity, Severity::High);
        assert!(!out.severity_raised());
        assert_eq!(
            out.alert().recommended_actions,
            owned_actions(recommended_actions(AlertType::DepressionRisk, Severity::High))
        );

        let up = detect(&m, Severity::Critical, t0() + Duration::hours(2));
        assert!(up.severity_raised());
    }

    #[test]
    fn status_machine_and_versions() {
        let m = manager();
        let a = detect(&m, Severity::Moderate, t0()).alert().clone();

        let acked = m.update_status(a.id, AlertStatus::Acknowledged, a.version, t0()).unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());

        let stale = m.update_status(a.id, AlertStatus::Resolved, a.version, t0()).unwrap_err();
        assert!(matches!(stale, EngineError::Conflict { .. }));

        let back = m
            .update_status(a.id, AlertStatus::Active, acked.version, t0())
            .unwrap_err();
        assert_eq!(
            back,
            EngineError::InvalidTransition {
                from: AlertStatus::Acknowledged,
                to: AlertStatus::Active
            }
        );

        let resolved = m.update_status(a.id, AlertStatus::Resolved, acked.version, t0()).unwrap();
        assert!(resolved.resolved_at.is_some());

        let again = detect(&m, Severity::Moderate, t0() + Duration::hours(1));
        assert!(matches!(again, DetectionOutcome::Created(_)));
        assert_ne!(again.alert().id, a.id);
    }

    #[test]
    fn unknown_alert_is_not_found() {
        let id = Uuid::new_v4();
        assert_eq!(
            manager().update_status(id, AlertStatus::Resolved, 1, t0()).unwrap_err(),
            EngineError::AlertNotFound(id)
        );
    }

    #[test]
    fn downgrade_resolves_and_reopens() {
        let m = manager();
        let a = detect(&m, Severity::High, t0()).alert().clone();

        let err = m.downgrade(a.id, Severity::Critical, a.version, t0()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDowngrade { .. }));

        let lower = m.downgrade(a.id, Severity::Moderate, a.version, t0()).unwrap();
        assert_ne!(lower.id, a.id);
        assert_eq!(lower.severity, Severity::Moderate);
        assert_eq!(m.store().alert(a.id).unwrap().status, AlertStatus::Resolved);
        assert_eq!(
            m.store().open_alert(&UserId::from("u"), AlertType::DepressionRisk).unwrap().id,
            lower.id
        );
    }

    #[test]
    fn refused_fence_writes_nothing() {
        let m = manager();
        let user = UserId::from("u");
        let err = m
            .commit_run(
                &user,
                None,
                Some(&detection(AlertType::SleepDisruption, Severity::Low)),
                t0(),
                |_write| Err(EngineError::Superseded(user.clone())),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Superseded(user.clone()));
        assert!(m.store().alerts_for_user(&user).is_empty());
    }
}
