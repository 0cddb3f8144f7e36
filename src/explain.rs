//! Free-text reasoning for alerts.
//!
//! Decisions are already final when this runs; a generator only phrases them.
//! Swapping the template for an LLM-backed generator cannot change severity,
//! type or actions.

use crate::classifier::{Classification, Contribution};
use crate::features::FactorKind;

pub trait ReasoningGenerator: Send + Sync {
    fn explain(&self, classification: &Classification) -> String;
}

/// Plain template phrasing, ASCII only for stable console output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateReasoner;

impl ReasoningGenerator for TemplateReasoner {
    fn explain(&self, c: &Classification) -> String {
        let mut out = if c.crisis_override {
            format!(
                "Explicit self-harm language was detected in recent conversations; severity set to critical regardless of the composite score ({:.0}).",
                c.risk_score
            )
        } else {
            format!(
                "Composite risk score {:.0} ({:?}, confidence {:.2}) points to {}.",
                c.risk_score,
                c.severity,
                c.confidence,
                c.alert_type.label()
            )
        };

        if c.contributors.is_empty() {
            out.push_str(" No other factor had enough data to contribute.");
        } else {
            let parts: Vec<String> = c.contributors.iter().map(describe).collect();
            out.push_str(" Main factors: ");
            out.push_str(&parts.join("; "));
            out.push('.');
        }
        out
    }
}

fn describe(c: &Contribution) -> String {
    let detail = match (c.kind, c.measure) {
        (FactorKind::MoodDecline, Some(m)) if m < 0.0 => format!(", mood trend {m:+.2}/day"),
        (FactorKind::SleepDisruption, Some(z)) => format!(", {z:.1} SD from usual sleep"),
        (FactorKind::ActivityDecrease, Some(d)) => format!(", {:.0}% below usual activity", d * 100.0),
        (FactorKind::StressIncrease, Some(z)) => format!(", stress {z:.1} SD above usual"),
        (FactorKind::SocialWithdrawal, Some(d)) => format!(", {:.0}% fewer social interactions", d * 100.0),
        (FactorKind::ConversationPatterns, Some(r)) => format!(", conversation risk {r:.2}"),
        _ => String::new(),
    };
    format!(
        "{} (strength {:.2}{}{})",
        c.kind.label(),
        c.indicator,
        detail,
        if c.triggered { ", above threshold" } else { "" }
    )
}
