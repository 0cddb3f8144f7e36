//! Escalation Dispatcher.
//!
//! Reaches a user's emergency contacts when one of their alerts is critical.
//! Delivery is at-least-once: a `pending` record is written before the first
//! attempt and updated after each one. Attempts are bounded by a per-channel
//! timeout and retried with exponential backoff. When no contact could be
//! reached the user gets a visible `emergency_fallback` alert instead.
//!
//! Runs detached from alert persistence; nothing here can undo a committed
//! alert.

pub mod contacts;
pub mod cooldown;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::{Alert, DeliveryStatus, EscalationRecord, Severity};
use crate::config::EscalationConfig;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::LifecycleManager;
use crate::notify::{ChannelRegistry, EmergencyContact, EscalationMessage};
use crate::store::RiskStore;

pub use contacts::{ContactDirectory, InMemoryContactDirectory};
pub use cooldown::CooldownGate;

/// Stable per (alert, contact, severity); survives retries and re-dispatches.
pub fn idempotency_key(alert_id: Uuid, contact: &EmergencyContact, severity: Severity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(alert_id.as_bytes());
    hasher.update(format!("|{:?}|{}|{:?}", contact.channel, contact.address, severity).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub struct EscalationDispatcher {
    store: Arc<dyn RiskStore>,
    lifecycle: LifecycleManager,
    contacts: Arc<dyn ContactDirectory>,
    channels: ChannelRegistry,
    cfg: EscalationConfig,
    gate: Mutex<CooldownGate>,
}

impl EscalationDispatcher {
    pub fn new(
        lifecycle: LifecycleManager,
        contacts: Arc<dyn ContactDirectory>,
        channels: ChannelRegistry,
        cfg: EscalationConfig,
    ) -> Self {
        Self {
            store: lifecycle.store().clone(),
            gate: Mutex::new(CooldownGate::new(cfg.cooldown_secs)),
            lifecycle,
            contacts,
            channels,
            cfg,
        }
    }

    /// Claim the right to dispatch for this alert now. Only critical alerts
    /// qualify; the cooldown gate is checked and updated atomically so
    /// concurrent detections cannot both win.
    pub fn reserve(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        if alert.severity != Severity::Critical {
            return false;
        }
        let mut gate = match self.gate.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        gate.prune(now);
        let ok = gate.try_acquire(alert.id, alert.severity, now);
        if !ok {
            debug!(target: "escalation", alert_id = %alert.id, "inside cooldown, dispatch suppressed");
        }
        ok
    }

    /// Manual escalation. Returns the first record of a fresh dispatch, or the
    /// latest existing record when the alert is still cooling down. Inside the
    /// cooldown with no record yet, a dispatch is still looking up contacts:
    /// that is `EscalationInProgress` unless the user has none at all.
    pub async fn trigger(&self, alert_id: Uuid, now: DateTime<Utc>) -> EngineResult<EscalationRecord> {
        let alert = self.store.alert(alert_id).ok_or(EngineError::AlertNotFound(alert_id))?;
        if alert.severity != Severity::Critical {
            return Err(EngineError::NotEscalatable {
                alert_id,
                severity: alert.severity,
            });
        }
        if self.reserve(&alert, now) {
            if let Some(first) = self.dispatch(&alert).await?.into_iter().next() {
                return Ok(first);
            }
        }
        if let Some(latest) = self.store.escalations_for_alert(alert_id).pop() {
            return Ok(latest);
        }
        let has_contacts = self
            .contacts
            .crisis_contacts(&alert.user_id)
            .await
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        if has_contacts {
            Err(EngineError::EscalationInProgress(alert_id))
        } else {
            Err(EngineError::NoEmergencyContacts(alert.user_id))
        }
    }

    /// Notify every contact of the alert's user. Contacts already reached for
    /// this alert at this severity are skipped.
    pub async fn dispatch(&self, alert: &Alert) -> EngineResult<Vec<EscalationRecord>> {
        if alert.severity != Severity::Critical {
            return Err(EngineError::NotEscalatable {
                alert_id: alert.id,
                severity: alert.severity,
            });
        }

        let contacts = match self.contacts.crisis_contacts(&alert.user_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "escalation", user = %alert.user_id.anon(), error = %format!("{e:#}"), "contact lookup failed");
                Vec::new()
            }
        };
        if contacts.is_empty() {
            self.raise_fallback(alert)?;
            return Err(EngineError::NoEmergencyContacts(alert.user_id.clone()));
        }

        let message = self.message_for(alert);
        let previous = self.store.escalations_for_alert(alert.id);
        let mut records = Vec::with_capacity(contacts.len());
        let mut delivered = false;

        for contact in &contacts {
            let key = idempotency_key(alert.id, contact, alert.severity);
            if previous
                .iter()
                .any(|r| r.idempotency_key == key && r.delivery_status.is_delivered())
            {
                debug!(target: "escalation", alert_id = %alert.id, contact = %contact.name, "already delivered, skipping");
                delivered = true;
                continue;
            }
            let record = self.deliver(alert, contact, &message, key).await?;
            delivered |= record.delivery_status.is_delivered();
            records.push(record);
        }

        if !delivered {
            self.raise_fallback(alert)?;
        }
        Ok(records)
    }

    async fn deliver(
        &self,
        alert: &Alert,
        contact: &EmergencyContact,
        message: &EscalationMessage,
        idempotency_key: String,
    ) -> EngineResult<EscalationRecord> {
        let mut record = EscalationRecord {
            id: Uuid::new_v4(),
            alert_id: alert.id,
            user_id: alert.user_id.clone(),
            contact_name: contact.name.clone(),
            channel: contact.channel,
            delivery_status: DeliveryStatus::Pending,
            attempted_at: Utc::now(),
            retry_count: 0,
            idempotency_key,
            last_error: None,
        };
        self.store.append_escalation(record.clone())?;

        let Some(channel) = self.channels.get(contact.channel) else {
            record.delivery_status = DeliveryStatus::Failed;
            record.last_error = Some(format!("no {:?} channel configured", contact.channel));
            self.store.update_escalation(record.clone())?;
            counter!("escalation_failures_total").increment(1);
            warn!(target: "escalation", alert_id = %alert.id, channel = ?contact.channel, "no channel for contact");
            return Ok(record);
        };

        let timeout = Duration::from_millis(self.cfg.channel_timeout_ms);
        let max_attempts = self.cfg.max_attempts.max(1);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            record.attempted_at = Utc::now();
            record.retry_count = u32::from(attempt - 1);
            counter!("escalation_attempts_total").increment(1);

            let outcome = match tokio::time::timeout(timeout, channel.send(contact, message, &record.idempotency_key)).await {
                Ok(Ok(status)) if status.is_delivered() => Ok(status),
                Ok(Ok(status)) => Err(format!("channel reported {status:?}")),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(_) => Err(format!("timed out after {} ms", self.cfg.channel_timeout_ms)),
            };

            match outcome {
                Ok(status) => {
                    record.delivery_status = status;
                    record.last_error = None;
                    self.store.update_escalation(record.clone())?;
                    info!(
                        target: "escalation",
                        alert_id = %alert.id,
                        user = %alert.user_id.anon(),
                        channel = ?contact.channel,
                        attempt,
                        "emergency contact notified"
                    );
                    return Ok(record);
                }
                Err(err) => {
                    record.delivery_status = DeliveryStatus::Failed;
                    record.last_error = Some(err.clone());
                    self.store.update_escalation(record.clone())?;
                    counter!("escalation_failures_total").increment(1);

                    if attempt < max_attempts {
                        warn!(target: "escalation", alert_id = %alert.id, channel = ?contact.channel, attempt, error = %err, "delivery failed, retrying");
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    warn!(target: "escalation", alert_id = %alert.id, channel = ?contact.channel, attempt, error = %err, "delivery failed, giving up");
                    return Ok(record);
                }
            }
        }
    }

    fn backoff(&self, attempt: u8) -> Duration {
        let shift = u32::from(attempt.saturating_sub(1)).min(16);
        Duration::from_millis(self.cfg.backoff_base_ms.saturating_mul(1u64 << shift))
    }

    fn raise_fallback(&self, alert: &Alert) -> EngineResult<()> {
        let outcome = self.lifecycle.raise_fallback(&alert.user_id, alert, Utc::now())?;
        counter!("escalation_fallback_alerts_total").increment(1);
        error!(
            target: "escalation",
            alert_id = %alert.id,
            fallback_alert_id = %outcome.alert().id,
            user = %alert.user_id.anon(),
            "no emergency contact reached, fallback alert raised"
        );
        Ok(())
    }

    fn message_for(&self, alert: &Alert) -> EscalationMessage {
        EscalationMessage {
            alert_id: alert.id,
            severity: alert.severity,
            subject: "Urgent: a person who trusts you may need help".to_string(),
            body: format!(
                "You are listed as an emergency contact. A critical wellbeing alert ({}) was raised at {} UTC. Please reach out to them now.",
                alert.alert_type.label(),
                alert.created_at.format("%Y-%m-%d %H:%M")
            ),
            crisis_resources: self.cfg.crisis_resources.clone(),
        }
    }
}
