//! Rolling personal baseline
//!
//! Every comparison in feature extraction is against the user's own history,
//! never a population norm. The baseline covers the `baseline_days` that end
//! where the analysis window starts, so the window never compares to itself.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::snapshot::{between, SignalSnapshot};

/// Summary statistics over one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub median: f64,
    pub count: usize,
}

impl SeriesStats {
    /// `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: var.sqrt(),
            median: median(values),
            count: values.len(),
        })
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Per-user reference levels for the relative factors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalBaseline {
    pub sleep_hours: Option<SeriesStats>,
    pub sleep_quality: Option<SeriesStats>,
    pub activity_minutes: Option<SeriesStats>,
    pub stress_level: Option<SeriesStats>,
    pub social_interactions: Option<SeriesStats>,
    /// Start of the baseline period (exclusive).
    pub from: Option<DateTime<Utc>>,
    /// End of the baseline period (inclusive) == start of the analysis window.
    pub to: Option<DateTime<Utc>>,
}

impl PersonalBaseline {
    /// Derive the baseline from the pre-window part of a (sanitized) snapshot.
    pub fn from_snapshot(snapshot: &SignalSnapshot, cfg: &FeatureConfig) -> Self {
        let to = snapshot.taken_at - Duration::days(i64::from(cfg.lookback_days));
        let from = to - Duration::days(i64::from(cfg.baseline_days));

        let sleep = between(&snapshot.sleep, from, to);
        let sleep_hours: Vec<f64> = sleep.iter().map(|s| s.duration_hours).collect();
        let sleep_quality: Vec<f64> = sleep.iter().filter_map(|s| s.quality).collect();
        let activity: Vec<f64> = between(&snapshot.activity, from, to)
            .iter()
            .map(|a| a.active_minutes)
            .collect();
        let stress: Vec<f64> = between(&snapshot.stress, from, to)
            .iter()
            .map(|s| s.level)
            .collect();
        let social: Vec<f64> = between(&snapshot.social, from, to)
            .iter()
            .map(|s| f64::from(s.interactions))
            .collect();

        Self {
            sleep_hours: SeriesStats::from_values(&sleep_hours),
            sleep_quality: SeriesStats::from_values(&sleep_quality),
            activity_minutes: SeriesStats::from_values(&activity),
            stress_level: SeriesStats::from_values(&stress),
            social_interactions: SeriesStats::from_values(&social),
            from: Some(from),
            to: Some(to),
        }
    }
}
