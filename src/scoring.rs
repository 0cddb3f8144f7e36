//! # Composite Risk Scorer
//!
//! `raw = 100 * Σ(wᵢ·indicatorᵢ·confidenceᵢ) / Σ(wᵢ·confidenceᵢ)`
//!
//! Only usable factors (confidence > 0) enter the sums; with none, the score
//! is 0. The raw score is then exponentially smoothed against the previous
//! assessment so a single noisy reading cannot swing the result on its own.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{FactorWeights, ScoringConfig};
use crate::features::FactorMap;
use crate::snapshot::UserId;

/// One immutable record per analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub user_id: UserId,
    pub computed_at: DateTime<Utc>,
    /// Smoothed composite, 0..=100.
    pub risk_score: f64,
    /// Composite before smoothing, 0..=100.
    pub raw_score: f64,
    pub confidence_level: f64,
    pub factors: FactorMap,
    /// Malformed samples dropped from the snapshot.
    #[serde(default)]
    pub rejected_samples: usize,
    /// Timestamp of the assessment used for smoothing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothed_against: Option<DateTime<Utc>>,
}

/// Unsmoothed aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composite {
    pub score: f64,
    pub confidence: f64,
    pub factors_used: usize,
}

/// Confidence-weighted composite over usable factors.
pub fn composite(factors: &FactorMap, weights: &FactorWeights) -> Composite {
    let mut num = 0.0;
    let mut den = 0.0;
    let mut weight_sum = 0.0;
    let mut used = 0usize;

    for f in factors.usable() {
        let r = f.reading();
        let w = weights.weight(f.kind());
        if w <= 0.0 {
            continue;
        }
        num += w * r.indicator * r.confidence;
        den += w * r.confidence;
        weight_sum += w;
        used += 1;
    }

    if den <= 0.0 {
        return Composite {
            score: 0.0,
            confidence: 0.0,
            factors_used: 0,
        };
    }

    Composite {
        score: (100.0 * num / den).clamp(0.0, 100.0),
        // Weight-averaged confidence of the factors that took part.
        confidence: (den / weight_sum).clamp(0.0, 1.0),
        factors_used: used,
    }
}

/// Build the assessment for one run.
pub fn assess(
    user_id: &UserId,
    factors: FactorMap,
    prior: Option<&RiskAssessment>,
    weights: &FactorWeights,
    cfg: &ScoringConfig,
    rejected_samples: usize,
    now: DateTime<Utc>,
) -> RiskAssessment {
    let c = composite(&factors, weights);

    let usable_prior = prior.filter(|p| {
        c.factors_used > 0
            && p.computed_at <= now
            && now - p.computed_at <= Duration::days(i64::from(cfg.prior_max_age_days))
    });

    let risk_score = match usable_prior {
        Some(p) => smooth(c.score, p.risk_score, cfg.smoothing_alpha),
        None => c.score,
    };

    RiskAssessment {
        user_id: user_id.clone(),
        computed_at: now,
        risk_score,
        raw_score: c.score,
        confidence_level: c.confidence,
        factors,
        rejected_samples,
        smoothed_against: usable_prior.map(|p| p.computed_at),
    }
}

/// Moves `prior` toward `new` by `alpha`. Equal inputs return `prior` bit-for-bit.
fn smooth(new: f64, prior: f64, alpha: f64) -> f64 {
    (prior + alpha * (new - prior)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FactorKind, FactorReading};
    use chrono::TimeZone;

    fn r(indicator: f64, confidence: f64) -> FactorReading {
        FactorReading::new(indicator, confidence, indicator >= 0.5, None)
    }

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn no_usable_factor_scores_zero() {
        let c = composite(&FactorMap::empty(), &FactorWeights::default());
        assert_eq!(c.score, 0.0);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.factors_used, 0);
    }

    #[test]
    fn single_factor_score_equals_its_indicator() {
        let m = FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.62, 0.4));
        let c = composite(&m, &FactorWeights::default());
        assert!((c.score - 62.0).abs() < 1e-9);
        assert!((c.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn weights_and_confidence_combine() {
        // mood w=25 (ind 1.0, conf 1.0), sleep w=15 (ind 0.0, conf 0.5)
        let m = FactorMap::empty()
            .with_reading(FactorKind::MoodDecline, r(1.0, 1.0))
            .with_reading(FactorKind::SleepDisruption, r(0.0, 0.5));
        let c = composite(&m, &FactorWeights::default());
        let expected = 100.0 * 25.0 / (25.0 + 7.5);
        assert!((c.score - expected).abs() < 1e-9);
        assert!((c.confidence - 32.5 / 40.0).abs() < 1e-9);
    }

    #[test]
    fn monotonic_in_each_indicator() {
        let base = FactorMap::empty()
            .with_reading(FactorKind::MoodDecline, r(0.3, 0.8))
            .with_reading(FactorKind::SleepDisruption, r(0.6, 0.5))
            .with_reading(FactorKind::StressIncrease, r(0.2, 1.0))
            .with_reading(FactorKind::ConversationPatterns, r(0.4, 0.3));
        let w = FactorWeights::default();
        for kind in FactorKind::ALL {
            let conf = base.reading(kind).confidence.max(0.6);
            let mut last = f64::MIN;
            for step in 0..=10 {
                let m = base.clone().with_reading(kind, r(step as f64 / 10.0, conf));
                let s = composite(&m, &w).score;
                assert!(s >= last - 1e-12, "{kind:?} not monotonic at step {step}");
                last = s;
            }
        }
    }

    #[test]
    fn smoothing_blends_with_recent_prior() {
        let w = FactorWeights::default();
        let cfg = ScoringConfig::default();
        let u = UserId::from("u");
        let m = FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.9, 1.0));
        let prior = assess(&u, FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.4, 1.0)), None, &w, &cfg, 0, t());
        assert!((prior.risk_score - 40.0).abs() < 1e-9);

        let next = assess(&u, m, Some(&prior), &w, &cfg, 0, t() + Duration::days(1));
        assert!((next.raw_score - 90.0).abs() < 1e-9);
        assert!((next.risk_score - (0.7 * 90.0 + 0.3 * 40.0)).abs() < 1e-9);
        assert_eq!(next.smoothed_against, Some(t()));
    }

    #[test]
    fn stale_prior_is_ignored() {
        let w = FactorWeights::default();
        let cfg = ScoringConfig::default();
        let u = UserId::from("u");
        let prior = assess(&u, FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.1, 1.0)), None, &w, &cfg, 0, t());
        let m = FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.9, 1.0));
        let next = assess(&u, m, Some(&prior), &w, &cfg, 0, t() + Duration::days(30));
        assert!((next.risk_score - 90.0).abs() < 1e-9);
        assert!(next.smoothed_against.is_none());
    }

    #[test]
    fn rerun_against_equal_prior_is_bit_identical() {
        let w = FactorWeights::default();
        let cfg = ScoringConfig::default();
        let u = UserId::from("u");
        for i in 1..1000 {
            let m = FactorMap::empty().with_reading(FactorKind::MoodDecline, r(i as f64 / 1000.0, 0.8));
            let first = assess(&u, m.clone(), None, &w, &cfg, 0, t());
            let second = assess(&u, m, Some(&first), &w, &cfg, 0, t() + Duration::hours(1));
            assert_eq!(first.risk_score, second.risk_score, "indicator {i}/1000");
        }
    }

    #[test]
    fn unconfident_run_is_zero_even_with_prior() {
        let w = FactorWeights::default();
        let cfg = ScoringConfig::default();
        let u = UserId::from("u");
        let prior = assess(&u, FactorMap::empty().with_reading(FactorKind::MoodDecline, r(0.9, 1.0)), None, &w, &cfg, 0, t());
        let next = assess(&u, FactorMap::empty(), Some(&prior), &w, &cfg, 0, t() + Duration::hours(1));
        assert_eq!(next.risk_score, 0.0);
        assert_eq!(next.confidence_level, 0.0);
    }
}
