//! # Signal Snapshot
//! Read-only, time-windowed bundle of a user's raw wellness metrics.
//!
//! Collection and storage live outside the engine; the engine only sees
//! snapshots through [`SignalSnapshotProvider`]. A snapshot is immutable for
//! the duration of one analysis run.
//!
//! Scales used throughout:
//! - mood score and stress level: 1.0 ..= 10.0
//! - sleep quality: 1.0 ..= 10.0 (optional), duration in hours 0 ..= 24
//! - conversation risk score: 0.0 ..= 1.0 (from the external sentiment service)

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-reversible id for log lines. Raw ids never go to logs.
    pub fn anon(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.0.as_bytes());
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Anything carrying an observation timestamp.
pub trait Timestamped {
    fn at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub at: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepEntry {
    /// Wake-up time of the night being described.
    pub at: DateTime<Utc>,
    pub duration_hours: f64,
    #[serde(default)]
    pub quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    /// Movement plus in-app engagement minutes for the day.
    pub active_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressSource {
    SelfReport,
    Physiological,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressEntry {
    pub at: DateTime<Utc>,
    pub level: f64,
    pub source: StressSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialEntry {
    pub at: DateTime<Utc>,
    /// Interactions with social features for the day.
    pub interactions: u32,
}

/// Output of the external conversation-sentiment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSignal {
    pub at: DateTime<Utc>,
    pub risk_score: f64,
    #[serde(default)]
    pub explicit_self_harm: bool,
}

/// Periodic questionnaire result (e.g. PHQ-9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentScore {
    pub at: DateTime<Utc>,
    pub instrument: String,
    pub score: f64,
    pub max_score: f64,
}

impl AssessmentScore {
    pub fn normalized(&self) -> f64 {
        (self.score / self.max_score).clamp(0.0, 1.0)
    }
}

macro_rules! impl_timestamped {
    ($($t:ty),*) => {
        $(impl Timestamped for $t {
            fn at(&self) -> DateTime<Utc> {
                self.at
            }
        })*
    };
}

impl_timestamped!(
    MoodEntry,
    SleepEntry,
    ActivityEntry,
    StressEntry,
    SocialEntry,
    ConversationSignal,
    AssessmentScore
);

/// Point-in-time bundle of a user's recent wellness metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub user_id: UserId,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub mood: Vec<MoodEntry>,
    #[serde(default)]
    pub sleep: Vec<SleepEntry>,
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub stress: Vec<StressEntry>,
    #[serde(default)]
    pub social: Vec<SocialEntry>,
    #[serde(default)]
    pub conversation: Vec<ConversationSignal>,
    #[serde(default)]
    pub assessments: Vec<AssessmentScore>,
}

impl SignalSnapshot {
    pub fn empty(user_id: UserId, taken_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            taken_at,
            mood: Vec::new(),
            sleep: Vec::new(),
            activity: Vec::new(),
            stress: Vec::new(),
            social: Vec::new(),
            conversation: Vec::new(),
            assessments: Vec::new(),
        }
    }

    /// Drop malformed samples instead of failing the run.
    ///
    /// Returns the cleaned snapshot and the number of rejected samples.
    /// Series are sorted by timestamp afterwards.
    pub fn sanitized(mut self) -> (Self, usize) {
        let taken_at = self.taken_at;
        let not_future = |at: DateTime<Utc>| at <= taken_at;
        let on_scale = |x: f64| x.is_finite() && (1.0..=10.0).contains(&x);
        let mut rejected = 0usize;

        rejected += retain_counting(&mut self.mood, |m| not_future(m.at) && on_scale(m.score));
        rejected += retain_counting(&mut self.sleep, |s| {
            not_future(s.at)
                && s.duration_hours.is_finite()
                && (0.0..=24.0).contains(&s.duration_hours)
                && s.quality.map_or(true, on_scale)
        });
        rejected += retain_counting(&mut self.activity, |a| {
            not_future(a.at) && a.active_minutes.is_finite() && a.active_minutes >= 0.0
        });
        rejected += retain_counting(&mut self.stress, |s| not_future(s.at) && on_scale(s.level));
        rejected += retain_counting(&mut self.social, |s| not_future(s.at));
        // Self-harm flags are kept even when the score itself is unusable.
        for c in self.conversation.iter_mut() {
            if !(c.risk_score.is_finite() && (0.0..=1.0).contains(&c.risk_score)) && c.explicit_self_harm {
                c.risk_score = 1.0;
                rejected += 1;
            }
        }
        rejected += retain_counting(&mut self.conversation, |c| {
            not_future(c.at) && c.risk_score.is_finite() && (0.0..=1.0).contains(&c.risk_score)
        });
        rejected += retain_counting(&mut self.assessments, |a| {
            not_future(a.at)
                && a.score.is_finite()
                && a.max_score.is_finite()
                && a.max_score > 0.0
                && a.score >= 0.0
        });

        self.mood.sort_by_key(|e| e.at);
        self.sleep.sort_by_key(|e| e.at);
        self.activity.sort_by_key(|e| e.at);
        self.stress.sort_by_key(|e| e.at);
        self.social.sort_by_key(|e| e.at);
        self.conversation.sort_by_key(|e| e.at);
        self.assessments.sort_by_key(|e| e.at);

        (self, rejected)
    }
}

fn retain_counting<T>(v: &mut Vec<T>, keep: impl Fn(&T) -> bool) -> usize {
    let before = v.len();
    v.retain(|x| keep(x));
    before - v.len()
}

/// Samples from `series` with `from < at <= to`.
pub fn between<T: Timestamped>(series: &[T], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&T> {
    series.iter().filter(|e| e.at() > from && e.at() <= to).collect()
}

/// External collector/store boundary.
#[async_trait::async_trait]
pub trait SignalSnapshotProvider: Send + Sync {
    /// Snapshot covering at least `window_days` plus the history needed for
    /// the personal baseline.
    async fn get_snapshot(&self, user_id: &UserId, window_days: u32) -> Result<SignalSnapshot>;
}

/// Provider backed by a map; used by the binary until a real collector is
/// wired in, and by tests.
#[derive(Debug, Default)]
pub struct InMemorySnapshotProvider {
    inner: RwLock<HashMap<UserId, SignalSnapshot>>,
}

impl InMemorySnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, snapshot: SignalSnapshot) {
        let mut g = match self.inner.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        g.insert(snapshot.user_id.clone(), snapshot);
    }
}

#[async_trait::async_trait]
impl SignalSnapshotProvider for InMemorySnapshotProvider {
    async fn get_snapshot(&self, user_id: &UserId, _window_days: u32) -> Result<SignalSnapshot> {
        let g = match self.inner.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        Ok(g
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| SignalSnapshot::empty(user_id.clone(), Utc::now())))
    }
}
