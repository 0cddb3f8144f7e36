// tests/concurrency.rs
//
// Single-flight runs, timeouts, supersession and the periodic sweep.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Notify;

use common::{fast_config, mood_trend_snapshot, Harness};
use wellbeing_risk_engine::scheduler::{sweep, StaticRoster};
use wellbeing_risk_engine::snapshot::{SignalSnapshot, SignalSnapshotProvider, UserId};
use wellbeing_risk_engine::EngineError;

/// Counts calls and sleeps before answering.
struct SlowProvider {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl SignalSnapshotProvider for SlowProvider {
    async fn get_snapshot(&self, user: &UserId, _days: u32) -> anyhow::Result<SignalSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(mood_trend_snapshot(user.as_str(), 0.25, Utc::now()))
    }
}

/// Blocks until released, signalling when a fetch has started.
struct GatedProvider {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl SignalSnapshotProvider for GatedProvider {
    async fn get_snapshot(&self, user: &UserId, _days: u32) -> anyhow::Result<SignalSnapshot> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(mood_trend_snapshot(user.as_str(), 0.25, Utc::now()))
    }
}

fn window() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    (Utc::now() - ChronoDuration::days(1), Utc::now() + ChronoDuration::days(1))
}

#[tokio::test]
async fn concurrent_runs_for_one_user_share_a_single_flight() {
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    });
    let engine = Harness::with_provider(fast_config(), provider.clone());
    let user = UserId::from("busy");

    let (a, b) = tokio::join!(engine.run_risk_analysis(&user), engine.run_risk_analysis(&user));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(a, b);
    let (from, to) = window();
    assert_eq!(engine.get_risk_history(&user, from, to).len(), 1);
}

#[tokio::test]
async fn different_users_run_in_parallel() {
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    });
    let engine = Harness::with_provider(fast_config(), provider.clone());
    let (u1, u2) = (UserId::from("a"), UserId::from("b"));

    let (a, b) = tokio::join!(engine.run_risk_analysis(&u1), engine.run_risk_analysis(&u2));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_snapshot_times_out_without_writes() {
    let mut cfg = fast_config();
    cfg.scheduler.analysis_timeout_ms = 30;
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(500),
    });
    let engine = Harness::with_provider(cfg, provider);
    let user = UserId::from("late");

    let err = engine.run_risk_analysis(&user).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::AnalysisTimeout {
            user: user.clone(),
            after_ms: 30
        }
    );
    let (from, to) = window();
    assert!(engine.get_risk_history(&user, from, to).is_empty());
    assert!(engine.get_alert_history(&user).is_empty());
}

#[tokio::test]
async fn newer_snapshot_supersedes_in_flight_run() {
    let provider = Arc::new(GatedProvider {
        started: Notify::new(),
        release: Notify::new(),
    });
    let engine = Harness::with_provider(fast_config(), provider.clone());
    let user = UserId::from("moving");

    let task = {
        let engine = engine.clone();
        let user = user.clone();
        tokio::spawn(async move { engine.run_risk_analysis(&user).await })
    };

    provider.started.notified().await;
    engine.snapshot_updated(&user);
    provider.release.notify_one();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, EngineError::Superseded(user.clone()));
    let (from, to) = window();
    assert!(engine.get_risk_history(&user, from, to).is_empty());
    assert!(engine.get_alert_history(&user).is_empty());

    // The next run, under the new generation, commits.
    provider.release.notify_one();
    engine.run_risk_analysis(&user).await.unwrap();
    assert_eq!(engine.get_risk_history(&user, from, to).len(), 1);
}

#[tokio::test]
async fn sweep_covers_every_monitored_user() {
    let h = Harness::new(fast_config(), None);
    for name in ["s1", "s2", "s3"] {
        h.snapshots.put(mood_trend_snapshot(name, 0.25, Utc::now()));
    }
    let roster = StaticRoster::new(vec![UserId::from("s1"), UserId::from("s2"), UserId::from("s3")]);

    let summary = sweep(h.engine.clone(), &roster).await.unwrap();
    assert_eq!(summary.ok, 3);
    assert_eq!(summary.failed, 0);
    for name in ["s1", "s2", "s3"] {
        assert_eq!(h.engine.get_active_alerts(&UserId::from(name)).len(), 1);
    }
}
