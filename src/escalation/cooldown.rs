use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::alert::Severity;

/// Per-alert cooldown gate against notification floods.
/// - First dispatch for an alert always allowed.
/// - Inside the cooldown, suppressed unless severity went up.
/// - State is updated explicitly via `record_dispatch`.
#[derive(Debug, Clone, Default)]
pub struct CooldownGate {
    cooldown: ChronoDuration,
    last: HashMap<Uuid, (DateTime<Utc>, Severity)>,
}

impl CooldownGate {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last: HashMap::new(),
        }
    }

    /// Does NOT mutate state.
    pub fn should_dispatch(&self, alert_id: Uuid, severity: Severity, now: DateTime<Utc>) -> bool {
        match self.last.get(&alert_id) {
            None => true,
            Some((ts, last_severity)) => {
                now.signed_duration_since(*ts) >= self.cooldown || severity > *last_severity
            }
        }
    }

    pub fn record_dispatch(&mut self, alert_id: Uuid, severity: Severity, now: DateTime<Utc>) {
        self.last.insert(alert_id, (now, severity));
    }

    /// Check and record in one step.
    pub fn try_acquire(&mut self, alert_id: Uuid, severity: Severity, now: DateTime<Utc>) -> bool {
        if !self.should_dispatch(alert_id, severity, now) {
            return false;
        }
        self.record_dispatch(alert_id, severity, now);
        true
    }

    /// Drop entries whose cooldown has long passed.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.last.retain(|_, (ts, _)| now.signed_duration_since(*ts) < cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn first_dispatch_passes() {
        let g = CooldownGate::new(1_800);
        assert!(g.should_dispatch(Uuid::new_v4(), Severity::Critical, t0()));
    }

    #[test]
    fn inside_cooldown_blocked() {
        let mut g = CooldownGate::new(1_800);
        let id = Uuid::new_v4();
        assert!(g.try_acquire(id, Severity::Critical, t0()));
        assert!(!g.try_acquire(id, Severity::Critical, t0() + ChronoDuration::minutes(5)));
        assert!(!g.try_acquire(id, Severity::Critical, t0() + ChronoDuration::minutes(10)));
        // Other alerts are independent.
        assert!(g.should_dispatch(Uuid::new_v4(), Severity::Critical, t0()));
    }

    #[test]
    fn severity_increase_bypasses_cooldown() {
        let mut g = CooldownGate::new(1_800);
        let id = Uuid::new_v4();
        g.record_dispatch(id, Severity::High, t0());
        assert!(g.should_dispatch(id, Severity::Critical, t0() + ChronoDuration::minutes(1)));
        assert!(!g.should_dispatch(id, Severity::High, t0() + ChronoDuration::minutes(1)));
    }

    #[test]
    fn after_cooldown_passes_and_prunes() {
        let mut g = CooldownGate::new(1_800);
        let id = Uuid::new_v4();
        g.record_dispatch(id, Severity::Critical, t0());
        let later = t0() + ChronoDuration::seconds(1_805);
        assert!(g.should_dispatch(id, Severity::Critical, later));
        g.prune(later);
        assert!(g.last.is_empty());
    }
}
