//! HTTP surface over [`RiskEngine`] commands and queries, plus the intake
//! routes that feed the in-memory snapshot provider and contact directory.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::alert::{Alert, AlertStatus, EscalationRecord, Severity};
use crate::engine::{RiskEngine, SystemMetrics};
use crate::error::EngineError;
use crate::escalation::InMemoryContactDirectory;
use crate::notify::EmergencyContact;
use crate::scheduler::StaticRoster;
use crate::scoring::RiskAssessment;
use crate::snapshot::{InMemorySnapshotProvider, SignalSnapshot, UserId};

/// History queries without `from` look back this far.
const DEFAULT_HISTORY_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RiskEngine>,
    /// Must be the provider the engine reads from.
    pub snapshots: Arc<InMemorySnapshotProvider>,
    /// Must be the directory the engine's dispatcher reads from.
    pub contacts: Arc<InMemoryContactDirectory>,
    /// Users who pushed a snapshot join the periodic sweep.
    pub roster: Arc<StaticRoster>,
}

impl AppState {
    pub fn new(
        engine: Arc<RiskEngine>,
        snapshots: Arc<InMemorySnapshotProvider>,
        contacts: Arc<InMemoryContactDirectory>,
        roster: Arc<StaticRoster>,
    ) -> Self {
        Self {
            engine,
            snapshots,
            contacts,
            roster,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/users/{user_id}/snapshot", put(put_snapshot))
        .route("/users/{user_id}/contacts", put(put_contacts))
        .route("/users/{user_id}/analysis", post(run_analysis))
        .route("/users/{user_id}/alerts", get(active_alerts))
        .route("/users/{user_id}/alerts/history", get(alert_history))
        .route("/users/{user_id}/history", get(risk_history))
        .route("/users/{user_id}/metrics", get(system_metrics))
        .route("/alerts/{alert_id}", get(get_alert))
        .route("/alerts/{alert_id}/status", patch(update_status))
        .route("/alerts/{alert_id}/downgrade", post(downgrade))
        .route("/alerts/{alert_id}/escalate", post(escalate))
        .route("/alerts/{alert_id}/escalations", get(escalations))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Engine errors as HTTP responses.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            EngineError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            EngineError::Superseded(_) => (StatusCode::CONFLICT, "superseded"),
            EngineError::AlertNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::InvalidTransition { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition"),
            EngineError::InvalidDowngrade { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_downgrade"),
            EngineError::NotEscalatable { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "not_escalatable"),
            EngineError::NoEmergencyContacts(_) => (StatusCode::FAILED_DEPENDENCY, "no_emergency_contacts"),
            EngineError::EscalationInProgress(_) => (StatusCode::CONFLICT, "escalation_in_progress"),
            EngineError::AnalysisTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "analysis_timeout"),
            EngineError::SnapshotUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "snapshot_unavailable"),
            EngineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let mut body = json!({
            "error": code,
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        if let EngineError::Conflict { actual, .. } = &self.0 {
            body["currentVersion"] = json!(actual);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Replace the user's snapshot. The path user wins over `user_id` in the body.
/// Runs already in flight for this user will not commit.
async fn put_snapshot(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(mut snapshot): Json<SignalSnapshot>,
) -> StatusCode {
    let user = UserId::from(user_id);
    snapshot.user_id = user.clone();
    let samples = snapshot.mood.len()
        + snapshot.sleep.len()
        + snapshot.activity.len()
        + snapshot.stress.len()
        + snapshot.social.len()
        + snapshot.conversation.len()
        + snapshot.assessments.len();

    state.snapshots.put(snapshot);
    state.engine.snapshot_updated(&user);
    state.roster.add(user.clone());
    info!(target: "api", user = %user.anon(), samples, "snapshot stored");
    StatusCode::NO_CONTENT
}

async fn put_contacts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(contacts): Json<Vec<EmergencyContact>>,
) -> StatusCode {
    let user = UserId::from(user_id);
    info!(target: "api", user = %user.anon(), contacts = contacts.len(), "emergency contacts replaced");
    state.contacts.set(user, contacts);
    StatusCode::NO_CONTENT
}

async fn run_analysis(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<RiskAssessment> {
    let user = UserId::from(user_id);
    Ok(Json(state.engine.run_risk_analysis(&user).await?))
}

async fn active_alerts(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Vec<Alert>> {
    Json(state.engine.get_active_alerts(&UserId::from(user_id)))
}

async fn alert_history(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Vec<Alert>> {
    Json(state.engine.get_alert_history(&UserId::from(user_id)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn risk_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<RiskAssessment>> {
    let to = q.to.unwrap_or_else(Utc::now);
    let from = q.from.unwrap_or(to - Duration::days(DEFAULT_HISTORY_DAYS));
    Json(state.engine.get_risk_history(&UserId::from(user_id), from, to))
}

async fn system_metrics(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<SystemMetrics> {
    Json(state.engine.get_system_metrics(&UserId::from(user_id)))
}

async fn get_alert(State(state): State<AppState>, Path(alert_id): Path<Uuid>) -> ApiResult<Alert> {
    Ok(Json(state.engine.get_alert(alert_id)?))
}

#[derive(Debug, Deserialize)]
struct StatusReq {
    status: AlertStatus,
    version: u64,
}

async fn update_status(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(body): Json<StatusReq>,
) -> ApiResult<Alert> {
    Ok(Json(state.engine.update_alert_status(alert_id, body.status, body.version)?))
}

#[derive(Debug, Deserialize)]
struct DowngradeReq {
    severity: Severity,
    version: u64,
}

async fn downgrade(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(body): Json<DowngradeReq>,
) -> ApiResult<Alert> {
    Ok(Json(state.engine.downgrade_alert(alert_id, body.severity, body.version)?))
}

async fn escalate(State(state): State<AppState>, Path(alert_id): Path<Uuid>) -> ApiResult<EscalationRecord> {
    Ok(Json(state.engine.trigger_emergency_protocol(alert_id).await?))
}

async fn escalations(State(state): State<AppState>, Path(alert_id): Path<Uuid>) -> Json<Vec<EscalationRecord>> {
    Json(state.engine.get_escalations(alert_id))
}
