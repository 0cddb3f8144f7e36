//! Error types for the risk engine.
//!
//! Domain failures are typed so callers can tell a retryable version conflict
//! from a missing alert. Adapter code (channels, providers, config) stays on
//! `anyhow` and is folded into these variants at the engine boundary.
//!
//! Display strings end up in logs and HTTP bodies, so they never carry a raw
//! user id. The id stays available as a field.

use thiserror::Error;
use uuid::Uuid;

use crate::alert::{AlertStatus, Severity};
use crate::snapshot::UserId;

/// Errors surfaced by the engine's commands and queries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("alert {alert_id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        alert_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("invalid downgrade {from:?} -> {to:?}: target severity must be lower")]
    InvalidDowngrade { from: Severity, to: Severity },

    #[error("risk analysis timed out after {after_ms} ms")]
    AnalysisTimeout { user: UserId, after_ms: u64 },

    #[error("risk analysis was superseded by a newer snapshot")]
    Superseded(UserId),

    #[error("signal snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("alert {alert_id} has severity {severity:?}; only critical alerts escalate")]
    NotEscalatable { alert_id: Uuid, severity: Severity },

    #[error("no emergency contacts reachable")]
    NoEmergencyContacts(UserId),

    #[error("escalation for alert {0} is already being dispatched")]
    EscalationInProgress(Uuid),

    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether a caller may simply retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. }
                | EngineError::Superseded(_)
                | EngineError::AnalysisTimeout { .. }
                | EngineError::EscalationInProgress(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
