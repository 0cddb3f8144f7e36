//! alert.rs: Alert record, its taxonomy and lifecycle states.
//!
//! Alerts are created by the classifier's output, mutated only through the
//! lifecycle manager, and never deleted. `version` is bumped on every write
//! and is what optimistic-concurrency callers must echo back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FactorKind;
use crate::notify::ChannelKind;
use crate::snapshot::UserId;

/// Ordinal response urgency. Ordering is meaningful: `Low < ... < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CrisisRisk,
    DepressionRisk,
    BurnoutRisk,
    AnxietySpike,
    SleepDisruption,
    /// Raised when emergency contacts could not be reached.
    EmergencyFallback,
}

impl AlertType {
    pub fn label(self) -> &'static str {
        match self {
            AlertType::CrisisRisk => "crisis risk",
            AlertType::DepressionRisk => "depression risk",
            AlertType::BurnoutRisk => "burnout risk",
            AlertType::AnxietySpike => "anxiety spike",
            AlertType::SleepDisruption => "sleep disruption",
            AlertType::EmergencyFallback => "emergency contact unreachable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Not yet resolved. Open alerts are the ones "active" queries return.
    pub fn is_open(self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }

    /// `active → acknowledged`, `active|acknowledged → resolved`.
    pub fn can_transition_to(self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Active, AlertStatus::Acknowledged)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: UserId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub confidence_score: f64,
    /// Composite score of the detection that last touched this alert.
    pub risk_score: f64,
    pub reasoning: String,
    /// Strongest first, at most three.
    pub contributing_factors: Vec<FactorKind>,
    pub recommended_actions: Vec<String>,
    pub status: AlertStatus,
    /// Set when the explicit self-harm override produced or refreshed it.
    #[serde(default)]
    pub crisis_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Number of detections folded into this alert.
    pub detections: u32,
    pub version: u64,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Severity never drops in place, so this survives resolution.
    pub fn reached_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    /// The channel reported end-to-end delivery.
    Confirmed,
}

impl DeliveryStatus {
    pub fn is_delivered(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Confirmed)
    }
}

/// One outreach to one emergency contact for a critical alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub user_id: UserId,
    pub contact_name: String,
    pub channel: ChannelKind,
    pub delivery_status: DeliveryStatus,
    pub attempted_at: DateTime<Utc>,
    /// Retries after the first attempt.
    pub retry_count: u32,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Open critical alerts first, then by severity, then newest first.
pub fn sort_for_display(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        let rank = |x: &Alert| (x.is_open() && x.reached_critical(), x.is_open(), x.severity);
        rank(b)
            .cmp(&rank(a))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn alert(sev: Severity, status: AlertStatus, age_min: i64) -> Alert {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() - Duration::minutes(age_min);
        Alert {
            id: Uuid::new_v4(),
            user_id: UserId::from("u"),
            alert_type: AlertType::DepressionRisk,
            severity: sev,
            confidence_score: 0.8,
            risk_score: 50.0,
            reasoning: String::new(),
            contributing_factors: vec![],
            recommended_actions: vec![],
            status,
            crisis_override: false,
            created_at: t,
            updated_at: t,
            acknowledged_at: None,
            resolved_at: None,
            detections: 1,
            version: 1,
        }
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Moderate);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn transitions_follow_state_machine() {
        use AlertStatus::*;
        assert!(Active.can_transition_to(Acknowledged));
        assert!(Active.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(!Acknowledged.can_transition_to(Active));
        assert!(!Resolved.can_transition_to(Active));
        assert!(!Resolved.can_transition_to(Acknowledged));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn critical_open_alerts_sort_first() {
        let mut v = vec![
            alert(Severity::High, AlertStatus::Active, 1),
            alert(Severity::Critical, AlertStatus::Resolved, 0),
            alert(Severity::Critical, AlertStatus::Acknowledged, 30),
            alert(Severity::Low, AlertStatus::Active, 0),
        ];
        sort_for_display(&mut v);
        assert_eq!(v[0].severity, Severity::Critical);
        assert!(v[0].is_open());
        assert_eq!(v[1].severity, Severity::High);
        assert_eq!(v[2].severity, Severity::Low);
        assert_eq!(v[3].status, AlertStatus::Resolved);
    }
}
