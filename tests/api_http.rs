// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /users/{id}/analysis
// - GET /users/{id}/alerts, /history, /metrics
// - PATCH /alerts/{id}/status (200 / 409 / 422 / 404)
// - POST /alerts/{id}/downgrade, /escalate
// - PUT /users/{id}/snapshot, /contacts feeding a real escalation

mod common;

use chrono::Utc;
use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::{fast_config, mood_trend_snapshot, self_harm_snapshot, sms_contact, Harness, ScriptedChannel};
use wellbeing_risk_engine::api::{self, AppState};
use wellbeing_risk_engine::scheduler::UserRoster;
use wellbeing_risk_engine::snapshot::UserId;

const BODY_LIMIT: usize = 1024 * 1024;

fn app_for(h: &Harness) -> Router {
    api::router(AppState::new(
        h.engine.clone(),
        h.snapshots.clone(),
        h.contacts.clone(),
        h.roster.clone(),
    ))
}

fn test_app(user: &str) -> (Router, Harness) {
    let h = Harness::new(fast_config(), None);
    h.snapshots.put(mood_trend_snapshot(user, 0.25, Utc::now()));
    (app_for(&h), h)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        })
        .expect("build request");

    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Json::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _h) = test_app("u");
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn analysis_then_alert_queries() {
    let (app, _h) = test_app("web");

    let (status, a) = call(&app, "POST", "/users/web/analysis", None).await;
    assert_eq!(status, StatusCode::OK, "{a}");
    assert_eq!(a["user_id"], "web");
    assert!(a["risk_score"].as_f64().unwrap() > 40.0);
    assert!(a["factors"].is_array());

    let (status, alerts) = call(&app, "GET", "/users/web/alerts", None).await;
    assert_eq!(status, StatusCode::OK);
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["alert_type"], "depression_risk");
    assert_eq!(alerts[0]["severity"], "moderate");
    assert_eq!(alerts[0]["status"], "active");

    let (status, hist) = call(&app, "GET", "/users/web/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hist.as_array().unwrap().len(), 1);

    let (status, m) = call(&app, "GET", "/users/web/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(m["activeAlertCount"], 1);
    assert_eq!(m["trend"], "unknown");
}

#[tokio::test]
async fn status_updates_map_errors_to_http_codes() {
    let (app, _h) = test_app("st");
    call(&app, "POST", "/users/st/analysis", None).await;
    let (_, alerts) = call(&app, "GET", "/users/st/alerts", None).await;
    let id = alerts[0]["id"].as_str().unwrap().to_string();
    let version = alerts[0]["version"].as_u64().unwrap();
    let uri = format!("/alerts/{id}/status");

    // wrong version
    let (status, err) = call(&app, "PATCH", &uri, Some(json!({"status": "acknowledged", "version": version + 7}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");
    assert_eq!(err["currentVersion"], version);

    // ok
    let (status, acked) = call(&app, "PATCH", &uri, Some(json!({"status": "acknowledged", "version": version}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");
    let version = acked["version"].as_u64().unwrap();

    // backwards
    let (status, err) = call(&app, "PATCH", &uri, Some(json!({"status": "active", "version": version}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "invalid_transition");

    // unknown alert
    let missing = format!("/alerts/{}/status", uuid::Uuid::new_v4());
    let (status, _) = call(&app, "PATCH", &missing, Some(json!({"status": "resolved", "version": 1}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn downgrade_and_escalate_endpoints() {
    let (app, _h) = test_app("dg");
    call(&app, "POST", "/users/dg/analysis", None).await;
    let (_, alerts) = call(&app, "GET", "/users/dg/alerts", None).await;
    let id = alerts[0]["id"].as_str().unwrap().to_string();
    let version = alerts[0]["version"].as_u64().unwrap();

    // Moderate alerts do not escalate.
    let (status, err) = call(&app, "POST", &format!("/alerts/{id}/escalate"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "not_escalatable");

    let (status, err) = call(
        &app,
        "POST",
        &format!("/alerts/{id}/downgrade"),
        Some(json!({"severity": "high", "version": version})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "invalid_downgrade");

    let (status, lower) = call(
        &app,
        "POST",
        &format!("/alerts/{id}/downgrade"),
        Some(json!({"severity": "low", "version": version})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lower["severity"], "low");
    assert_ne!(lower["id"].as_str().unwrap(), id);

    let (_, history) = call(&app, "GET", "/users/dg/alerts/history", None).await;
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (status, recs) = call(&app, "GET", &format!("/alerts/{id}/escalations"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(recs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn pushed_snapshot_is_analyzed_and_user_is_enrolled() {
    let h = Harness::new(fast_config(), None);
    let app = app_for(&h);

    // Body names another user; the path decides.
    let snapshot = serde_json::to_value(mood_trend_snapshot("someone-else", 0.25, Utc::now())).unwrap();
    let (status, _) = call(&app, "PUT", "/users/pushed/snapshot", Some(snapshot)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, a) = call(&app, "POST", "/users/pushed/analysis", None).await;
    assert_eq!(status, StatusCode::OK, "{a}");
    assert!(a["risk_score"].as_f64().unwrap() > 40.0);

    let (_, alerts) = call(&app, "GET", "/users/pushed/alerts", None).await;
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["severity"], "moderate");

    let roster = h.roster.monitored_users().await.unwrap();
    assert_eq!(roster, vec![UserId::from("pushed")]);
}

#[tokio::test]
async fn pushed_contacts_receive_crisis_escalation() {
    let channel = ScriptedChannel::ok();
    let h = Harness::new(fast_config(), Some(channel.clone()));
    let app = app_for(&h);

    let contacts = serde_json::to_value(vec![sms_contact("Robin")]).unwrap();
    let (status, _) = call(&app, "PUT", "/users/crisis/contacts", Some(contacts)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let snapshot = serde_json::to_value(self_harm_snapshot("crisis", Utc::now())).unwrap();
    call(&app, "PUT", "/users/crisis/snapshot", Some(snapshot)).await;

    let (status, _) = call(&app, "POST", "/users/crisis/analysis", None).await;
    assert_eq!(status, StatusCode::OK);
    h.engine.wait_for_escalations().await;

    let (_, alerts) = call(&app, "GET", "/users/crisis/alerts", None).await;
    assert_eq!(alerts[0]["alert_type"], "crisis_risk");
    assert_eq!(alerts[0]["severity"], "critical");
    let id = alerts[0]["id"].as_str().unwrap().to_string();

    let (_, recs) = call(&app, "GET", &format!("/alerts/{id}/escalations"), None).await;
    let recs = recs.as_array().unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["contact_name"], "Robin");
    assert_eq!(recs[0]["delivery_status"], "sent");
    assert_eq!(channel.call_count(), 1);
    // No fallback: the contact was reached.
    assert!(alerts.as_array().unwrap().iter().all(|a| a["alert_type"] != "emergency_fallback"));
}
