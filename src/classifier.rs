//! # Alert Classifier
//! Pure, testable mapping `RiskAssessment` → optional `Classification`.
//! No I/O and no text generation: reasoning prose is produced afterwards by
//! [`crate::explain`], from the classification this module returns.
//!
//! Policy:
//! 1. Explicit self-harm language always wins: `crisis_risk` / critical,
//!    whatever the composite score says.
//! 2. Otherwise severity comes from the score bands (below `low` ⇒ no alert).
//! 3. The alert type is picked from the most strongly triggered factor group:
//!    mood/conversation/social ⇒ depression_risk, stress/activity ⇒
//!    burnout_risk (or anxiety_spike for a sharp stress rise on its own),
//!    sleep ⇒ sleep_disruption.

use serde::{Deserialize, Serialize};

use crate::actions::recommended_actions;
use crate::alert::{AlertType, Severity};
use crate::config::SeverityConfig;
use crate::features::{FactorKind, FactorMap};
use crate::scoring::RiskAssessment;

/// Up to this many factors are cited per alert.
pub const MAX_CONTRIBUTORS: usize = 3;

/// One factor cited as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub kind: FactorKind,
    pub indicator: f64,
    pub confidence: f64,
    pub triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<f64>,
}

/// Deterministic outcome of classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub confidence: f64,
    pub risk_score: f64,
    /// Strongest first, at most [`MAX_CONTRIBUTORS`].
    pub contributors: Vec<Contribution>,
    pub recommended_actions: Vec<String>,
    pub crisis_override: bool,
}

impl Classification {
    pub fn contributing_kinds(&self) -> Vec<FactorKind> {
        self.contributors.iter().map(|c| c.kind).collect()
    }
}

/// Score band → severity; `None` below the `low` bound.
pub fn severity_for_score(score: f64, cfg: &SeverityConfig) -> Option<Severity> {
    if score >= cfg.critical {
        Some(Severity::Critical)
    } else if score >= cfg.high {
        Some(Severity::High)
    } else if score >= cfg.moderate {
        Some(Severity::Moderate)
    } else if score >= cfg.low {
        Some(Severity::Low)
    } else {
        None
    }
}

pub fn classify(assessment: &RiskAssessment, cfg: &SeverityConfig) -> Option<Classification> {
    let factors = &assessment.factors;
    let contributors = top_contributors(factors);

    if factors.explicit_self_harm() {
        return Some(Classification {
            alert_type: AlertType::CrisisRisk,
            severity: Severity::Critical,
            // Explicit language is direct evidence, not an inference.
            confidence: 1.0,
            risk_score: assessment.risk_score,
            contributors,
            recommended_actions: owned(recommended_actions(AlertType::CrisisRisk, Severity::Critical)),
            crisis_override: true,
        });
    }

    let severity = severity_for_score(assessment.risk_score, cfg)?;
    let alert_type = choose_alert_type(factors, cfg);

    Some(Classification {
        alert_type,
        severity,
        confidence: assessment.confidence_level,
        risk_score: assessment.risk_score,
        contributors,
        recommended_actions: owned(recommended_actions(alert_type, severity)),
        crisis_override: false,
    })
}

fn owned(actions: &[&str]) -> Vec<String> {
    actions.iter().map(|s| s.to_string()).collect()
}

/// Usable factors with a non-zero indicator, strongest first.
/// Ties keep `FactorKind` order.
pub fn top_contributors(factors: &FactorMap) -> Vec<Contribution> {
    let mut all: Vec<Contribution> = factors
        .usable()
        .filter(|f| f.reading().indicator > 0.0)
        .map(|f| {
            let r = f.reading();
            Contribution {
                kind: f.kind(),
                indicator: r.indicator,
                confidence: r.confidence,
                triggered: r.triggered,
                measure: r.measure,
            }
        })
        .collect();
    all.sort_by(|a, b| {
        b.indicator
            .total_cmp(&a.indicator)
            .then_with(|| a.kind.cmp(&b.kind))
    });
    all.truncate(MAX_CONTRIBUTORS);
    all
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Depression,
    Burnout,
    Sleep,
}

impl Group {
    const ORDER: [Group; 3] = [Group::Depression, Group::Burnout, Group::Sleep];

    fn members(self) -> &'static [FactorKind] {
        match self {
            Group::Depression => &[
                FactorKind::MoodDecline,
                FactorKind::ConversationPatterns,
                FactorKind::SocialWithdrawal,
            ],
            Group::Burnout => &[FactorKind::StressIncrease, FactorKind::ActivityDecrease],
            Group::Sleep => &[FactorKind::SleepDisruption],
        }
    }
}

/// `(any member triggered, strength)`; triggered groups outrank untriggered.
fn group_strength(factors: &FactorMap, group: Group) -> (bool, f64) {
    let mut triggered = false;
    let mut best_triggered = 0.0f64;
    let mut best_any = 0.0f64;
    for kind in group.members() {
        let r = factors.reading(*kind);
        if !r.is_usable() {
            continue;
        }
        if r.triggered {
            triggered = true;
            best_triggered = best_triggered.max(r.indicator);
        }
        best_any = best_any.max(r.indicator * r.confidence);
    }
    if triggered {
        (true, best_triggered)
    } else {
        (false, best_any)
    }
}

fn choose_alert_type(factors: &FactorMap, cfg: &SeverityConfig) -> AlertType {
    let mut best = Group::ORDER[0];
    let mut best_key = group_strength(factors, best);
    for g in Group::ORDER.iter().skip(1) {
        let key = group_strength(factors, *g);
        // Strictly greater: earlier groups win ties.
        if (key.0 && !best_key.0) || (key.0 == best_key.0 && key.1 > best_key.1) {
            best = *g;
            best_key = key;
        }
    }

    match best {
        Group::Depression => AlertType::DepressionRisk,
        Group::Sleep => AlertType::SleepDisruption,
        Group::Burnout => {
            let stress = factors.reading(FactorKind::StressIncrease);
            let activity = factors.reading(FactorKind::ActivityDecrease);
            if stress.triggered && !activity.triggered && stress.indicator >= cfg.sharp_stress_indicator {
                AlertType::AnxietySpike
            } else {
                AlertType::BurnoutRisk
            }
        }
    }
}
