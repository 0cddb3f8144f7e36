//! # Risk Engine
//! Facade over the pipeline: snapshot → baseline → factors → score →
//! classification → lifecycle commit → (critical) escalation.
//!
//! Feature extraction, scoring and classification are pure. The only awaits
//! are the snapshot fetch and the detached escalation task, so a run that is
//! timed out or superseded is dropped before anything is written.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::{sort_for_display, Alert, AlertStatus, EscalationRecord, Severity};
use crate::baseline::PersonalBaseline;
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::escalation::{ContactDirectory, EscalationDispatcher};
use crate::explain::{ReasoningGenerator, TemplateReasoner};
use crate::features;
use crate::lifecycle::{Detection, DetectionOutcome, LifecycleManager};
use crate::notify::ChannelRegistry;
use crate::scheduler::{Generations, SingleFlight};
use crate::scoring::{self, RiskAssessment};
use crate::snapshot::{SignalSnapshotProvider, UserId};
use crate::store::RiskStore;

/// Assessments compared for [`RiskTrend`].
const TREND_WINDOW: usize = 4;
/// Score change (points) that counts as a move.
const TREND_DELTA: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTrend {
    Rising,
    Falling,
    Stable,
    /// Fewer than two assessments.
    Unknown,
}

/// Dashboard summary for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub risk_score: f64,
    pub active_alert_count: usize,
    pub confidence_level: f64,
    pub last_assessment_at: Option<DateTime<Utc>>,
    pub trend: RiskTrend,
    /// Alerts that ever reached critical, resolved ones included.
    pub critical_events_total: usize,
}

/// Latest score against the mean of the ones before it.
pub fn trend_of(recent: &[RiskAssessment]) -> RiskTrend {
    let Some((latest, earlier)) = recent.split_last() else {
        return RiskTrend::Unknown;
    };
    if earlier.is_empty() {
        return RiskTrend::Unknown;
    }
    let mean = earlier.iter().map(|a| a.risk_score).sum::<f64>() / earlier.len() as f64;
    let delta = latest.risk_score - mean;
    if delta >= TREND_DELTA {
        RiskTrend::Rising
    } else if delta <= -TREND_DELTA {
        RiskTrend::Falling
    } else {
        RiskTrend::Stable
    }
}

pub struct RiskEngine {
    cfg: EngineConfig,
    provider: Arc<dyn SignalSnapshotProvider>,
    store: Arc<dyn RiskStore>,
    lifecycle: LifecycleManager,
    dispatcher: Arc<EscalationDispatcher>,
    reasoner: Arc<dyn ReasoningGenerator>,
    flights: SingleFlight<EngineResult<RiskAssessment>>,
    generations: Generations,
    escalations: Mutex<Vec<JoinHandle<()>>>,
}

impl RiskEngine {
    pub fn new(
        cfg: EngineConfig,
        provider: Arc<dyn SignalSnapshotProvider>,
        store: Arc<dyn RiskStore>,
        contacts: Arc<dyn ContactDirectory>,
        channels: ChannelRegistry,
    ) -> Self {
        let lifecycle = LifecycleManager::new(store.clone(), cfg.scheduler.max_commit_retries);
        let dispatcher = Arc::new(EscalationDispatcher::new(
            lifecycle.clone(),
            contacts,
            channels,
            cfg.escalation.clone(),
        ));
        Self {
            cfg,
            provider,
            store,
            lifecycle,
            dispatcher,
            reasoner: Arc::new(TemplateReasoner),
            flights: SingleFlight::new(),
            generations: Generations::default(),
            escalations: Mutex::new(Vec::new()),
        }
    }

    /// Replace the reasoning text generator. Decisions are unaffected.
    pub fn with_reasoner(mut self, reasoner: Arc<dyn ReasoningGenerator>) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    // ---- commands ----

    /// Analyze one user. Concurrent calls for the same user share one run.
    pub async fn run_risk_analysis(&self, user: &UserId) -> EngineResult<RiskAssessment> {
        self.flights.run(user, || self.run_bounded(user)).await
    }

    /// A newer snapshot exists for `user`; in-flight runs will not commit.
    pub fn snapshot_updated(&self, user: &UserId) {
        let generation = self.generations.bump(user);
        debug!(target: "risk", user = %user.anon(), generation, "snapshot updated");
    }

    pub fn update_alert_status(&self, alert_id: Uuid, status: AlertStatus, expected_version: u64) -> EngineResult<Alert> {
        self.lifecycle.update_status(alert_id, status, expected_version, Utc::now())
    }

    /// Resolve the alert and reopen it at a lower severity. Returns the new alert.
    pub fn downgrade_alert(&self, alert_id: Uuid, severity: Severity, expected_version: u64) -> EngineResult<Alert> {
        self.lifecycle.downgrade(alert_id, severity, expected_version, Utc::now())
    }

    pub async fn trigger_emergency_protocol(&self, alert_id: Uuid) -> EngineResult<EscalationRecord> {
        self.dispatcher.trigger(alert_id, Utc::now()).await
    }

    /// Wait for every escalation spawned so far.
    pub async fn wait_for_escalations(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut g = match self.escalations.lock() {
                    Ok(g) => g,
                    Err(poison) => poison.into_inner(),
                };
                std::mem::take(&mut *g)
            };
            if pending.is_empty() {
                return;
            }
            for h in pending {
                if let Err(e) = h.await {
                    error!(target: "escalation", error = %e, "escalation task panicked");
                }
            }
        }
    }

    // ---- queries ----

    /// Open alerts, critical first.
    pub fn get_active_alerts(&self, user: &UserId) -> Vec<Alert> {
        let mut v: Vec<Alert> = self
            .store
            .alerts_for_user(user)
            .into_iter()
            .filter(Alert::is_open)
            .collect();
        sort_for_display(&mut v);
        v
    }

    pub fn get_alert_history(&self, user: &UserId) -> Vec<Alert> {
        let mut v = self.store.alerts_for_user(user);
        sort_for_display(&mut v);
        v
    }

    pub fn get_alert(&self, alert_id: Uuid) -> EngineResult<Alert> {
        self.store.alert(alert_id).ok_or(EngineError::AlertNotFound(alert_id))
    }

    pub fn get_risk_history(&self, user: &UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RiskAssessment> {
        if from > to {
            return Vec::new();
        }
        self.store.assessments_between(user, from, to)
    }

    pub fn get_system_metrics(&self, user: &UserId) -> SystemMetrics {
        let recent = self.store.recent_assessments(user, TREND_WINDOW);
        let alerts = self.store.alerts_for_user(user);
        let latest = recent.last();
        SystemMetrics {
            risk_score: latest.map(|a| a.risk_score).unwrap_or(0.0),
            active_alert_count: alerts.iter().filter(|a| a.is_open()).count(),
            confidence_level: latest.map(|a| a.confidence_level).unwrap_or(0.0),
            last_assessment_at: latest.map(|a| a.computed_at),
            trend: trend_of(&recent),
            critical_events_total: alerts.iter().filter(|a| a.reached_critical()).count(),
        }
    }

    pub fn get_escalations(&self, alert_id: Uuid) -> Vec<EscalationRecord> {
        self.store.escalations_for_alert(alert_id)
    }

    // ---- internals ----

    async fn run_bounded(&self, user: &UserId) -> EngineResult<RiskAssessment> {
        let started = Instant::now();
        counter!("risk_analysis_runs_total").increment(1);

        let timeout_ms = self.cfg.scheduler.analysis_timeout_ms;
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), self.analyze(user)).await {
            Ok(r) => r,
            Err(_) => Err(EngineError::AnalysisTimeout {
                user: user.clone(),
                after_ms: timeout_ms,
            }),
        };

        histogram!("risk_analysis_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &result {
            counter!("risk_analysis_failures_total").increment(1);
            warn!(target: "risk", user = %user.anon(), error = %e, "risk analysis failed");
        }
        result
    }

    async fn analyze(&self, user: &UserId) -> EngineResult<RiskAssessment> {
        let generation = self.generations.current(user);
        let fc = &self.cfg.features;

        let snapshot = self
            .provider
            .get_snapshot(user, fc.lookback_days + fc.baseline_days)
            .await
            .map_err(|e| EngineError::SnapshotUnavailable(format!("{e:#}")))?;
        if &snapshot.user_id != user {
            return Err(EngineError::SnapshotUnavailable(format!(
                "provider returned a snapshot for another user ({})",
                snapshot.user_id.anon()
            )));
        }

        let (snapshot, rejected) = snapshot.sanitized();
        if rejected > 0 {
            warn!(target: "risk", user = %user.anon(), rejected, "dropped malformed samples");
        }

        let baseline = PersonalBaseline::from_snapshot(&snapshot, fc);
        let factors = features::extract(&snapshot, &baseline, fc);
        let now = Utc::now();
        let prior = self.store.latest_assessment(user);
        let assessment = scoring::assess(
            user,
            factors,
            prior.as_ref(),
            &self.cfg.weights,
            &self.cfg.scoring,
            rejected,
            now,
        );

        let detection = classify(&assessment, &self.cfg.severity).map(|classification| Detection {
            reasoning: self.reasoner.explain(&classification),
            classification,
        });

        if let Some(d) = detection.as_ref().filter(|d| d.classification.crisis_override) {
            counter!("risk_crisis_overrides_total").increment(1);
            warn!(
                target: "risk",
                user = %user.anon(),
                risk_score = assessment.risk_score,
                confidence = assessment.confidence_level,
                factors = ?assessment.factors,
                contributors = ?d.classification.contributing_kinds(),
                "crisis override: explicit self-harm signal"
            );
        }

        let outcome = self
            .lifecycle
            .commit_run(user, Some(assessment.clone()), detection.as_ref(), now, |write| {
                self.generations.commit_if_current(user, generation, write)
            })?;

        info!(
            target: "risk",
            user = %user.anon(),
            risk_score = assessment.risk_score,
            raw_score = assessment.raw_score,
            confidence = assessment.confidence_level,
            alert_type = ?outcome.as_ref().map(|o| o.alert().alert_type),
            severity = ?outcome.as_ref().map(|o| o.alert().severity),
            "risk analysis complete"
        );

        if let Some(outcome) = outcome {
            self.escalate_if_critical(&outcome, now);
        }
        Ok(assessment)
    }

    fn escalate_if_critical(&self, outcome: &DetectionOutcome, now: DateTime<Utc>) {
        let alert = outcome.alert().clone();
        if alert.severity != Severity::Critical {
            return;
        }
        if outcome.severity_raised() {
            warn!(
                target: "escalation",
                alert_id = %alert.id,
                user = %alert.user_id.anon(),
                refreshed = matches!(outcome, DetectionOutcome::Refreshed { .. }),
                "alert reached critical"
            );
        }
        if !self.dispatcher.reserve(&alert, now) {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&alert).await {
                warn!(target: "escalation", alert_id = %alert.id, error = %e, "escalation ended with error");
            }
        });
        let mut g = match self.escalations.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        g.retain(|h| !h.is_finished());
        g.push(handle);
    }
}
