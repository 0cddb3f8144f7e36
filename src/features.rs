//! # Risk Feature Extractor
//! Pure mapping `(snapshot, personal baseline, config)` → [`FactorMap`].
//!
//! Each of the six factors yields an `indicator` in [0,1], a `confidence` in
//! [0,1] and a `triggered` flag. Missing data never reads as "normal": below
//! the minimum sample count a factor gets confidence 0 and is left out of
//! scoring entirely.
//!
//! No I/O, no clock. Same inputs, same bits out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::{PersonalBaseline, SeriesStats};
use crate::config::FeatureConfig;
use crate::snapshot::{between, SignalSnapshot};

/// The closed set of monitored dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    MoodDecline,
    SleepDisruption,
    ActivityDecrease,
    StressIncrease,
    SocialWithdrawal,
    ConversationPatterns,
}

impl FactorKind {
    pub const ALL: [FactorKind; 6] = [
        FactorKind::MoodDecline,
        FactorKind::SleepDisruption,
        FactorKind::ActivityDecrease,
        FactorKind::StressIncrease,
        FactorKind::SocialWithdrawal,
        FactorKind::ConversationPatterns,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FactorKind::MoodDecline => "mood decline",
            FactorKind::SleepDisruption => "sleep disruption",
            FactorKind::ActivityDecrease => "activity decrease",
            FactorKind::StressIncrease => "stress increase",
            FactorKind::SocialWithdrawal => "social withdrawal",
            FactorKind::ConversationPatterns => "conversation patterns",
        }
    }
}

/// Indicator + confidence for one factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorReading {
    pub indicator: f64,
    pub confidence: f64,
    pub triggered: bool,
    /// Raw statistic behind the indicator (slope, z-score, drop ratio, mean
    /// risk), kept for explanations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<f64>,
}

impl FactorReading {
    /// Clamps into range; an unconfident reading can never be triggered.
    pub fn new(indicator: f64, confidence: f64, triggered: bool, measure: Option<f64>) -> Self {
        let indicator = clamp01(indicator);
        let confidence = clamp01(confidence);
        Self {
            indicator,
            confidence,
            triggered: triggered && confidence > 0.0,
            measure,
        }
    }

    pub fn unconfident() -> Self {
        Self {
            indicator: 0.0,
            confidence: 0.0,
            triggered: false,
            measure: None,
        }
    }

    /// Takes part in scoring.
    pub fn is_usable(&self) -> bool {
        self.confidence > 0.0
    }
}

/// One monitored dimension with its reading. The conversation factor also
/// carries the explicit self-harm flag from the sentiment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum RiskFactor {
    MoodDecline(FactorReading),
    SleepDisruption(FactorReading),
    ActivityDecrease(FactorReading),
    StressIncrease(FactorReading),
    SocialWithdrawal(FactorReading),
    ConversationPatterns {
        reading: FactorReading,
        explicit_self_harm: bool,
    },
}

impl RiskFactor {
    pub fn kind(&self) -> FactorKind {
        match self {
            RiskFactor::MoodDecline(_) => FactorKind::MoodDecline,
            RiskFactor::SleepDisruption(_) => FactorKind::SleepDisruption,
            RiskFactor::ActivityDecrease(_) => FactorKind::ActivityDecrease,
            RiskFactor::StressIncrease(_) => FactorKind::StressIncrease,
            RiskFactor::SocialWithdrawal(_) => FactorKind::SocialWithdrawal,
            RiskFactor::ConversationPatterns { .. } => FactorKind::ConversationPatterns,
        }
    }

    pub fn reading(&self) -> &FactorReading {
        match self {
            RiskFactor::MoodDecline(r)
            | RiskFactor::SleepDisruption(r)
            | RiskFactor::ActivityDecrease(r)
            | RiskFactor::StressIncrease(r)
            | RiskFactor::SocialWithdrawal(r) => r,
            RiskFactor::ConversationPatterns { reading, .. } => reading,
        }
    }

    pub fn explicit_self_harm(&self) -> bool {
        matches!(
            self,
            RiskFactor::ConversationPatterns {
                explicit_self_harm: true,
                ..
            }
        )
    }

    /// Same factor with a different reading. Used by tests and what-if tooling.
    pub fn with_reading(self, r: FactorReading) -> Self {
        match self {
            RiskFactor::MoodDecline(_) => RiskFactor::MoodDecline(r),
            RiskFactor::SleepDisruption(_) => RiskFactor::SleepDisruption(r),
            RiskFactor::ActivityDecrease(_) => RiskFactor::ActivityDecrease(r),
            RiskFactor::StressIncrease(_) => RiskFactor::StressIncrease(r),
            RiskFactor::SocialWithdrawal(_) => RiskFactor::SocialWithdrawal(r),
            RiskFactor::ConversationPatterns {
                explicit_self_harm, ..
            } => RiskFactor::ConversationPatterns {
                reading: r,
                explicit_self_harm,
            },
        }
    }
}

/// Exactly one [`RiskFactor`] per [`FactorKind`], in `FactorKind::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorMap {
    factors: Vec<RiskFactor>,
}

impl FactorMap {
    pub fn new(
        mood: FactorReading,
        sleep: FactorReading,
        activity: FactorReading,
        stress: FactorReading,
        social: FactorReading,
        conversation: FactorReading,
        explicit_self_harm: bool,
    ) -> Self {
        Self {
            factors: vec![
                RiskFactor::MoodDecline(mood),
                RiskFactor::SleepDisruption(sleep),
                RiskFactor::ActivityDecrease(activity),
                RiskFactor::StressIncrease(stress),
                RiskFactor::SocialWithdrawal(social),
                RiskFactor::ConversationPatterns {
                    reading: conversation,
                    explicit_self_harm,
                },
            ],
        }
    }

    /// Every factor unconfident, no flag.
    pub fn empty() -> Self {
        let u = FactorReading::unconfident();
        Self::new(u, u, u, u, u, u, false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskFactor> {
        self.factors.iter()
    }

    pub fn get(&self, kind: FactorKind) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.kind() == kind)
    }

    pub fn reading(&self, kind: FactorKind) -> FactorReading {
        self.get(kind)
            .map(|f| *f.reading())
            .unwrap_or_else(FactorReading::unconfident)
    }

    /// Replace one factor's reading, keeping the rest.
    pub fn with_reading(mut self, kind: FactorKind, r: FactorReading) -> Self {
        for f in self.factors.iter_mut() {
            if f.kind() == kind {
                *f = f.with_reading(r);
            }
        }
        self
    }

    pub fn explicit_self_harm(&self) -> bool {
        self.factors.iter().any(RiskFactor::explicit_self_harm)
    }

    pub fn usable(&self) -> impl Iterator<Item = &RiskFactor> {
        self.factors.iter().filter(|f| f.reading().is_usable())
    }

    pub fn triggered(&self) -> impl Iterator<Item = &RiskFactor> {
        self.factors.iter().filter(|f| f.reading().triggered)
    }
}

/// Run the extractor over a sanitized snapshot.
pub fn extract(snapshot: &SignalSnapshot, baseline: &PersonalBaseline, cfg: &FeatureConfig) -> FactorMap {
    let now = snapshot.taken_at;
    let window_start = now - Duration::days(i64::from(cfg.lookback_days));

    let (conversation, self_harm) = conversation_patterns(snapshot, window_start, cfg);
    FactorMap::new(
        mood_decline(snapshot, window_start, cfg),
        sleep_disruption(snapshot, baseline, window_start, cfg),
        activity_decrease(snapshot, baseline, window_start, cfg),
        stress_increase(snapshot, baseline, window_start, cfg),
        social_withdrawal(snapshot, baseline, window_start, cfg),
        conversation,
        self_harm,
    )
}

/// 0 below `min`, then linear up to 1.0 at `full` samples.
fn sample_confidence(n: usize, min: usize, full: usize) -> f64 {
    if n < min || n == 0 {
        return 0.0;
    }
    (n as f64 / full.max(min).max(1) as f64).min(1.0)
}

fn window_confidence(n: usize, cfg: &FeatureConfig) -> f64 {
    sample_confidence(n, cfg.min_samples, cfg.lookback_days as usize)
}

fn baseline_confidence(stats: &SeriesStats, cfg: &FeatureConfig) -> f64 {
    sample_confidence(stats.count, cfg.min_baseline_samples, cfg.min_baseline_samples * 2)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Least-squares slope of `(t, y)` in y-units per day.
fn slope_per_day(points: &[(DateTime<Utc>, f64)], origin: DateTime<Utc>) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = points
        .iter()
        .map(|(t, _)| (*t - origin).num_seconds() as f64 / 86_400.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let mx = mean(&xs);
    let my = mean(&ys);
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        num += (x - mx) * (y - my);
        den += (x - mx).powi(2);
    }
    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

fn mood_decline(snapshot: &SignalSnapshot, window_start: DateTime<Utc>, cfg: &FeatureConfig) -> FactorReading {
    let now = snapshot.taken_at;
    let lookback = Duration::days(i64::from(cfg.lookback_days));
    let prior_start = window_start - lookback;

    let window: Vec<(DateTime<Utc>, f64)> = between(&snapshot.mood, window_start, now)
        .iter()
        .map(|m| (m.at, m.score))
        .collect();
    let prior: Vec<(DateTime<Utc>, f64)> = between(&snapshot.mood, prior_start, window_start)
        .iter()
        .map(|m| (m.at, m.score))
        .collect();

    let slope_reading = if window.len() >= cfg.min_samples {
        let slope = slope_per_day(&window, window_start);
        // A decline that merely continues still counts; a reversal of a
        // previously rising trend counts too.
        let effective = if prior.len() >= cfg.min_samples {
            let prior_slope = slope_per_day(&prior, prior_start);
            slope.min(slope - prior_slope)
        } else {
            slope
        };
        let indicator = -effective / cfg.mood_slope_full_scale.max(f64::EPSILON);
        FactorReading::new(
            indicator,
            window_confidence(window.len(), cfg),
            effective <= cfg.mood_slope_trigger,
            Some(effective),
        )
    } else {
        FactorReading::unconfident()
    };

    let latest_assessment = between(&snapshot.assessments, window_start, now)
        .last()
        .map(|a| a.normalized())
        .filter(|n| *n >= cfg.assessment_floor);

    match latest_assessment {
        None => slope_reading,
        Some(norm) if !slope_reading.is_usable() => FactorReading::new(norm, 0.5, true, Some(norm)),
        Some(norm) => FactorReading::new(
            slope_reading.indicator.max(norm),
            slope_reading.confidence.max(0.5),
            true,
            slope_reading.measure,
        ),
    }
}

fn sleep_disruption(
    snapshot: &SignalSnapshot,
    baseline: &PersonalBaseline,
    window_start: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> FactorReading {
    let nights = between(&snapshot.sleep, window_start, snapshot.taken_at);
    let Some(base) = baseline.sleep_hours else {
        return FactorReading::unconfident();
    };
    if nights.len() < cfg.min_samples || base.count < cfg.min_baseline_samples {
        return FactorReading::unconfident();
    }

    let hours: Vec<f64> = nights.iter().map(|n| n.duration_hours).collect();
    let z_hours = (mean(&hours) - base.mean).abs() / base.std_dev.max(cfg.sleep_hours_std_floor);

    // Quality only counts when it got worse.
    let quality: Vec<f64> = nights.iter().filter_map(|n| n.quality).collect();
    let z_quality = match baseline.sleep_quality {
        Some(q) if quality.len() >= cfg.min_samples && q.count >= cfg.min_baseline_samples => {
            (q.mean - mean(&quality)).max(0.0) / q.std_dev.max(cfg.sleep_quality_std_floor)
        }
        _ => 0.0,
    };

    let z = z_hours.max(z_quality);
    let confidence = window_confidence(nights.len(), cfg).min(baseline_confidence(&base, cfg));
    FactorReading::new(
        z / cfg.sleep_z_full_scale.max(f64::EPSILON),
        confidence,
        z >= cfg.sleep_z_trigger,
        Some(z),
    )
}

fn activity_decrease(
    snapshot: &SignalSnapshot,
    baseline: &PersonalBaseline,
    window_start: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> FactorReading {
    let days = between(&snapshot.activity, window_start, snapshot.taken_at);
    let Some(base) = baseline.activity_minutes else {
        return FactorReading::unconfident();
    };
    if days.len() < cfg.min_samples || base.count < cfg.min_baseline_samples || base.median <= 0.0 {
        return FactorReading::unconfident();
    }

    let recent: Vec<f64> = days.iter().map(|d| d.active_minutes).collect();
    let drop = ((base.median - mean(&recent)) / base.median).max(0.0);
    let confidence = window_confidence(days.len(), cfg).min(baseline_confidence(&base, cfg));
    FactorReading::new(
        drop / cfg.activity_drop_full_scale.max(f64::EPSILON),
        confidence,
        drop >= cfg.activity_drop_trigger,
        Some(drop),
    )
}

fn stress_increase(
    snapshot: &SignalSnapshot,
    baseline: &PersonalBaseline,
    window_start: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> FactorReading {
    let readings = between(&snapshot.stress, window_start, snapshot.taken_at);
    let Some(base) = baseline.stress_level else {
        return FactorReading::unconfident();
    };
    if readings.len() < cfg.min_samples || base.count < cfg.min_baseline_samples {
        return FactorReading::unconfident();
    }

    let levels: Vec<f64> = readings.iter().map(|s| s.level).collect();
    let rise = ((mean(&levels) - base.mean) / base.std_dev.max(cfg.stress_std_floor)).max(0.0);
    let confidence = window_confidence(readings.len(), cfg).min(baseline_confidence(&base, cfg));
    FactorReading::new(
        rise / cfg.stress_z_full_scale.max(f64::EPSILON),
        confidence,
        rise >= cfg.stress_z_trigger,
        Some(rise),
    )
}

fn social_withdrawal(
    snapshot: &SignalSnapshot,
    baseline: &PersonalBaseline,
    window_start: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> FactorReading {
    let days = between(&snapshot.social, window_start, snapshot.taken_at);
    let Some(base) = baseline.social_interactions else {
        return FactorReading::unconfident();
    };
    if days.len() < cfg.min_samples || base.count < cfg.min_baseline_samples || base.mean <= 0.0 {
        return FactorReading::unconfident();
    }

    let recent: Vec<f64> = days.iter().map(|d| f64::from(d.interactions)).collect();
    let drop = ((base.mean - mean(&recent)) / base.mean).max(0.0);
    let confidence = window_confidence(days.len(), cfg).min(baseline_confidence(&base, cfg));
    FactorReading::new(
        drop / cfg.social_drop_full_scale.max(f64::EPSILON),
        confidence,
        drop >= cfg.social_drop_trigger,
        Some(drop),
    )
}

/// The self-harm flag is reported regardless of sample count.
fn conversation_patterns(
    snapshot: &SignalSnapshot,
    window_start: DateTime<Utc>,
    cfg: &FeatureConfig,
) -> (FactorReading, bool) {
    let signals = between(&snapshot.conversation, window_start, snapshot.taken_at);
    let self_harm = signals.iter().any(|c| c.explicit_self_harm);
    if signals.len() < cfg.min_conversation_samples {
        return (FactorReading::unconfident(), self_harm);
    }

    let scores: Vec<f64> = signals.iter().map(|c| c.risk_score).collect();
    let avg = mean(&scores);
    let confidence = sample_confidence(
        signals.len(),
        cfg.min_conversation_samples,
        cfg.min_conversation_samples * 3,
    );
    (
        FactorReading::new(avg, confidence, avg >= cfg.conversation_trigger, Some(avg)),
        self_harm,
    )
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
