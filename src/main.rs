//! Risk Engine Service: Binary Entrypoint
//! Boots the Axum HTTP server, wiring the engine, the periodic sweep and
//! the Prometheus endpoint.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wellbeing_risk_engine::{
    api::{self, AppState},
    config,
    escalation::InMemoryContactDirectory,
    metrics::Metrics,
    notify::ChannelRegistry,
    scheduler::{spawn_periodic, StaticRoster},
    snapshot::{InMemorySnapshotProvider, UserId},
    store::InMemoryStore,
    RiskEngine,
};

/// `RUST_LOG` wins; JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wellbeing_risk_engine=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // try_init: the Shuttle runtime may already have a subscriber installed.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
}

/// Comma-separated `MONITORED_USERS`, empty when unset.
fn monitored_users_from_env() -> Vec<UserId> {
    std::env::var("MONITORED_USERS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(UserId::from)
        .collect()
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading risk engine config")?;
    let metrics = Metrics::init(&cfg)?;
    let channels = ChannelRegistry::from_env(cfg.escalation.channel_timeout_ms)?;
    let interval_secs = cfg.scheduler.interval_secs;

    // Snapshots and contacts arrive over the intake routes; the same
    // instances back the engine.
    let snapshots = Arc::new(InMemorySnapshotProvider::new());
    let contacts = Arc::new(InMemoryContactDirectory::new());
    let engine = Arc::new(RiskEngine::new(
        cfg,
        snapshots.clone(),
        Arc::new(InMemoryStore::new()),
        contacts.clone(),
        channels,
    ));

    let roster = Arc::new(StaticRoster::new(monitored_users_from_env()));
    spawn_periodic(engine.clone(), roster.clone(), interval_secs);

    let state = AppState::new(engine, snapshots, contacts, roster);
    let router = api::router(state).merge(metrics.router());
    Ok(router.into())
}
