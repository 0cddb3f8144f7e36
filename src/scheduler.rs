//! Run coordination: single-flight per user, snapshot generations, and the
//! periodic sweep over monitored users.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::OnceCell;
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::RiskEngine;
use crate::error::{EngineError, EngineResult};
use crate::snapshot::UserId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

/// At most one computation per key at a time. Callers arriving while one is
/// running wait for it and receive a clone of its result.
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<UserId, Arc<OnceCell<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: &UserId, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = lock(&self.inflight)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let out = cell.get_or_init(f).await.clone();

        let mut g = lock(&self.inflight);
        if g.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            g.remove(key);
        }
        out
    }

    pub fn in_flight(&self, key: &UserId) -> bool {
        lock(&self.inflight).contains_key(key)
    }
}

/// Per-user snapshot generation. A run remembers the generation it started
/// under and commits through [`Generations::commit_if_current`]; a bump
/// before that point marks it superseded, a bump during it waits.
#[derive(Debug, Default)]
pub struct Generations {
    slots: Mutex<HashMap<UserId, Arc<Mutex<u64>>>>,
}

impl Generations {
    fn slot(&self, user: &UserId) -> Arc<Mutex<u64>> {
        lock(&self.slots).entry(user.clone()).or_default().clone()
    }

    pub fn current(&self, user: &UserId) -> u64 {
        let slot = lock(&self.slots).get(user).cloned();
        match slot {
            Some(slot) => {
                let g = lock(&slot);
                *g
            }
            None => 0,
        }
    }

    pub fn bump(&self, user: &UserId) -> u64 {
        let slot = self.slot(user);
        let mut g = lock(&slot);
        *g += 1;
        *g
    }

    /// Run `commit` only if `user` is still at `generation`, holding the
    /// user's slot for the duration so a concurrent bump cannot interleave.
    pub fn commit_if_current<R>(
        &self,
        user: &UserId,
        generation: u64,
        commit: impl FnOnce() -> EngineResult<R>,
    ) -> EngineResult<R> {
        let slot = self.slot(user);
        let g = lock(&slot);
        if *g != generation {
            return Err(EngineError::Superseded(user.clone()));
        }
        let out = commit();
        drop(g);
        out
    }
}

/// Users covered by the periodic sweep.
#[async_trait]
pub trait UserRoster: Send + Sync {
    async fn monitored_users(&self) -> anyhow::Result<Vec<UserId>>;
}

#[derive(Debug, Default)]
pub struct StaticRoster {
    users: RwLock<Vec<UserId>>,
}

impl StaticRoster {
    pub fn new(users: Vec<UserId>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn add(&self, user: UserId) {
        let mut g = match self.users.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        if !g.contains(&user) {
            g.push(user);
        }
    }
}

#[async_trait]
impl UserRoster for StaticRoster {
    async fn monitored_users(&self) -> anyhow::Result<Vec<UserId>> {
        let g = match self.users.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        Ok(g.clone())
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub ok: usize,
    pub failed: usize,
    pub superseded: usize,
}

/// Analyze every monitored user once, in parallel.
pub async fn sweep(engine: Arc<RiskEngine>, roster: &dyn UserRoster) -> anyhow::Result<SweepSummary> {
    let users = roster.monitored_users().await?;
    let mut set = JoinSet::new();
    for user in users {
        let engine = engine.clone();
        set.spawn(async move { engine.run_risk_analysis(&user).await });
    }

    let mut summary = SweepSummary::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(_)) => summary.ok += 1,
            Ok(Err(EngineError::Superseded(_))) => summary.superseded += 1,
            Ok(Err(_)) => summary.failed += 1,
            Err(e) => {
                tracing::error!(target: "scheduler", error = %e, "analysis task panicked");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Spawn the periodic sweep. The first tick fires immediately.
pub fn spawn_periodic(engine: Arc<RiskEngine>, roster: Arc<dyn UserRoster>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp().max(0) as u64;

            match sweep(engine.clone(), roster.as_ref()).await {
                Ok(s) => {
                    counter!("risk_sweeps_total").increment(1);
                    gauge!("risk_sweep_last_run_ts").set(now as f64);
                    tracing::info!(
                        target: "scheduler",
                        ok = s.ok,
                        failed = s.failed,
                        superseded = s.superseded,
                        "risk sweep tick"
                    );
                }
                Err(e) => {
                    tracing::warn!(target: "scheduler", error = %format!("{e:#}"), "roster unavailable, sweep skipped");
                }
            }
        }
    })
}
