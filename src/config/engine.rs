// src/config/engine.rs
//! Policy values owned by the clinical/product team.
//!
//! Every section has serde defaults, so a config file only needs the keys it
//! wants to change. `validate()` rejects combinations that would break scoring
//! (weights not summing to 100, unordered severity bands, bad smoothing alpha).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::features::FactorKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub weights: FactorWeights,
    pub scoring: ScoringConfig,
    pub severity: SeverityConfig,
    pub escalation: EscalationConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        let all = FactorKind::ALL.map(|k| w.weight(k));
        if all.iter().any(|x| !x.is_finite() || *x < 0.0) {
            bail!("factor weights must be finite and non-negative: {all:?}");
        }
        let sum: f64 = all.iter().sum();
        if (sum - 100.0).abs() > 1e-6 {
            bail!("factor weights must sum to 100, got {sum}");
        }

        let s = &self.severity;
        if !(s.low > 0.0 && s.low < s.moderate && s.moderate < s.high && s.high < s.critical && s.critical <= 100.0) {
            bail!(
                "severity bands must ascend within (0, 100]: low={} moderate={} high={} critical={}",
                s.low,
                s.moderate,
                s.high,
                s.critical
            );
        }
        if !(0.0..=1.0).contains(&s.sharp_stress_indicator) {
            bail!("sharp_stress_indicator must be in [0, 1]");
        }

        let a = self.scoring.smoothing_alpha;
        if !(a > 0.0 && a <= 1.0) {
            bail!("smoothing_alpha must be in (0, 1], got {a}");
        }

        let f = &self.features;
        if f.lookback_days == 0 || f.baseline_days == 0 {
            bail!("lookback_days and baseline_days must be positive");
        }
        if f.min_samples == 0 || f.min_baseline_samples == 0 || f.min_conversation_samples == 0 {
            bail!("minimum sample counts must be positive");
        }
        if f.mood_slope_trigger >= 0.0 {
            bail!("mood_slope_trigger must be negative (a decline per day)");
        }

        if self.escalation.max_attempts == 0 {
            bail!("escalation.max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Feature extraction windows and per-factor thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Analysis window, in days.
    pub lookback_days: u32,
    /// Pre-window history used for the personal baseline, in days.
    pub baseline_days: u32,
    /// Samples needed inside the window before a factor is trusted at all.
    pub min_samples: usize,
    /// Samples needed in the baseline period.
    pub min_baseline_samples: usize,
    pub min_conversation_samples: usize,

    /// Mood points per day; at or below this the factor triggers.
    pub mood_slope_trigger: f64,
    /// Decline magnitude (points/day) that maps to indicator 1.0.
    pub mood_slope_full_scale: f64,
    /// Normalized questionnaire score above which it feeds the mood factor.
    pub assessment_floor: f64,

    pub sleep_z_trigger: f64,
    pub sleep_z_full_scale: f64,
    pub sleep_hours_std_floor: f64,
    pub sleep_quality_std_floor: f64,

    pub activity_drop_trigger: f64,
    pub activity_drop_full_scale: f64,

    pub stress_z_trigger: f64,
    pub stress_z_full_scale: f64,
    pub stress_std_floor: f64,

    pub social_drop_trigger: f64,
    pub social_drop_full_scale: f64,

    pub conversation_trigger: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback_days: 14,
            baseline_days: 30,
            min_samples: 5,
            min_baseline_samples: 7,
            min_conversation_samples: 2,
            mood_slope_trigger: -0.1,
            mood_slope_full_scale: 0.5,
            assessment_floor: 0.5,
            sleep_z_trigger: 1.5,
            sleep_z_full_scale: 3.0,
            sleep_hours_std_floor: 0.25,
            sleep_quality_std_floor: 0.5,
            activity_drop_trigger: 0.30,
            activity_drop_full_scale: 0.60,
            stress_z_trigger: 1.5,
            stress_z_full_scale: 3.0,
            stress_std_floor: 0.5,
            social_drop_trigger: 0.40,
            social_drop_full_scale: 0.80,
            conversation_trigger: 0.5,
        }
    }
}

/// Declared per-factor weights; must sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub mood_decline: f64,
    pub sleep_disruption: f64,
    pub activity_decrease: f64,
    pub stress_increase: f64,
    pub social_withdrawal: f64,
    pub conversation_patterns: f64,
}

impl FactorWeights {
    pub fn weight(&self, kind: FactorKind) -> f64 {
        match kind {
            FactorKind::MoodDecline => self.mood_decline,
            FactorKind::SleepDisruption => self.sleep_disruption,
            FactorKind::ActivityDecrease => self.activity_decrease,
            FactorKind::StressIncrease => self.stress_increase,
            FactorKind::SocialWithdrawal => self.social_withdrawal,
            FactorKind::ConversationPatterns => self.conversation_patterns,
        }
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            mood_decline: 25.0,
            sleep_disruption: 15.0,
            activity_decrease: 15.0,
            stress_increase: 15.0,
            social_withdrawal: 10.0,
            conversation_patterns: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Share of the new reading in the smoothed score.
    pub smoothing_alpha: f64,
    /// Prior assessments older than this are not used for smoothing.
    pub prior_max_age_days: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.7,
            prior_max_age_days: 14,
        }
    }
}

/// Lower bounds of each severity band on the 0..100 score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
    /// Stress indicator at or above which a stress-only pattern is an anxiety spike.
    pub sharp_stress_indicator: f64,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            low: 20.0,
            moderate: 40.0,
            high: 60.0,
            critical: 80.0,
            sharp_stress_indicator: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub cooldown_secs: i64,
    pub max_attempts: u8,
    pub backoff_base_ms: u64,
    pub channel_timeout_ms: u64,
    /// Appended to every emergency-contact message.
    pub crisis_resources: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30 * 60,
            max_attempts: 4,
            backoff_base_ms: 500,
            channel_timeout_ms: 5_000,
            crisis_resources: vec![
                "988 Suicide & Crisis Lifeline: call or text 988 (US)".to_string(),
                "Crisis Text Line: text HOME to 741741".to_string(),
                "If there is immediate danger, call your local emergency number.".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub analysis_timeout_ms: u64,
    /// Re-plan attempts when an alert changed between planning and commit.
    pub max_commit_retries: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            analysis_timeout_ms: 30_000,
            max_commit_retries: 3,
        }
    }
}
