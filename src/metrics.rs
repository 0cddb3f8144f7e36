use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use axum::{routing::get, Router};

use crate::config::EngineConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and publish the
    /// static config gauges.
    pub fn init(cfg: &EngineConfig) -> Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("risk_analysis_runs_total", "Risk analysis runs started");
        describe_counter!("risk_analysis_failures_total", "Risk analysis runs that returned an error");
        describe_counter!("risk_alerts_created_total", "Alerts created (refreshes excluded)");
        describe_counter!("risk_crisis_overrides_total", "Classifications forced to critical by explicit self-harm signals");
        describe_counter!("escalation_attempts_total", "Emergency-contact delivery attempts");
        describe_counter!("escalation_failures_total", "Failed emergency-contact delivery attempts");
        describe_counter!("escalation_fallback_alerts_total", "Fallback alerts raised after undeliverable escalations");
        describe_histogram!("risk_analysis_duration_ms", Unit::Milliseconds, "Wall time of one risk analysis run");

        gauge!("escalation_cooldown_secs").set(cfg.escalation.cooldown_secs as f64);
        gauge!("risk_analysis_interval_secs").set(cfg.scheduler.interval_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
