// tests/common/mod.rs
//
// Shared builders and test doubles for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use wellbeing_risk_engine::alert::DeliveryStatus;
use wellbeing_risk_engine::config::EngineConfig;
use wellbeing_risk_engine::escalation::InMemoryContactDirectory;
use wellbeing_risk_engine::notify::{
    ChannelKind, ChannelRegistry, EmergencyContact, EscalationMessage, NotificationChannel,
};
use wellbeing_risk_engine::scheduler::StaticRoster;
use wellbeing_risk_engine::snapshot::{
    ConversationSignal, InMemorySnapshotProvider, MoodEntry, SignalSnapshot, SignalSnapshotProvider,
    UserId,
};
use wellbeing_risk_engine::store::InMemoryStore;
use wellbeing_risk_engine::RiskEngine;

/// Defaults with short backoff and timeouts so failure paths finish fast.
pub fn fast_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.escalation.backoff_base_ms = 1;
    cfg.escalation.channel_timeout_ms = 200;
    cfg.escalation.max_attempts = 3;
    cfg.scheduler.analysis_timeout_ms = 2_000;
    cfg
}

/// One mood entry per day for the last 14 days, falling `per_day` points a day
/// and ending at 2.0.
pub fn mood_trend_snapshot(user: &str, per_day: f64, taken_at: DateTime<Utc>) -> SignalSnapshot {
    let mut s = SignalSnapshot::empty(UserId::from(user), taken_at);
    for d in 0..14 {
        s.mood.push(MoodEntry {
            at: taken_at - ChronoDuration::days(d),
            score: 2.0 + per_day * d as f64,
        });
    }
    s
}

/// A single explicit self-harm signal and nothing else.
pub fn self_harm_snapshot(user: &str, taken_at: DateTime<Utc>) -> SignalSnapshot {
    let mut s = SignalSnapshot::empty(UserId::from(user), taken_at);
    s.conversation.push(ConversationSignal {
        at: taken_at - ChronoDuration::hours(2),
        risk_score: 0.9,
        explicit_self_harm: true,
    });
    s
}

pub fn sms_contact(name: &str) -> EmergencyContact {
    EmergencyContact {
        name: name.to_string(),
        channel: ChannelKind::Sms,
        address: format!("+1555{:04}", name.len()),
    }
}

/// SMS double: fails the first `fail_first` calls, then succeeds.
pub struct ScriptedChannel {
    pub calls: AtomicUsize,
    fail_first: usize,
    delay: Duration,
}

impl ScriptedChannel {
    pub fn ok() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first,
            delay: Duration::ZERO,
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            delay,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, _contact: &EmergencyContact, _message: &EscalationMessage, _key: &str) -> Result<DeliveryStatus> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(anyhow!("gateway unavailable (call {})", n + 1));
        }
        Ok(DeliveryStatus::Sent)
    }
}

/// Engine over in-memory collaborators, plus handles to seed them.
pub struct Harness {
    pub engine: Arc<RiskEngine>,
    pub snapshots: Arc<InMemorySnapshotProvider>,
    pub contacts: Arc<InMemoryContactDirectory>,
    pub roster: Arc<StaticRoster>,
}

impl Harness {
    pub fn new(cfg: EngineConfig, channel: Option<Arc<ScriptedChannel>>) -> Self {
        let snapshots = Arc::new(InMemorySnapshotProvider::new());
        let contacts = Arc::new(InMemoryContactDirectory::new());
        let mut channels = ChannelRegistry::new();
        if let Some(c) = channel {
            channels.register(c);
        }
        let engine = Arc::new(RiskEngine::new(
            cfg,
            snapshots.clone(),
            Arc::new(InMemoryStore::new()),
            contacts.clone(),
            channels,
        ));
        Self {
            engine,
            snapshots,
            contacts,
            roster: Arc::new(StaticRoster::default()),
        }
    }

    pub fn with_provider(cfg: EngineConfig, provider: Arc<dyn SignalSnapshotProvider>) -> Arc<RiskEngine> {
        Arc::new(RiskEngine::new(
            cfg,
            provider,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryContactDirectory::new()),
            ChannelRegistry::new(),
        ))
    }
}
