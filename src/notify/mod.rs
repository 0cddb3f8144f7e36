//! Outbound notification channels used for emergency-contact escalation.
//!
//! Channels only deliver; retries, backoff and timeouts belong to the
//! escalation dispatcher so every adapter behaves the same under failure.

pub mod email;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{DeliveryStatus, Severity};

pub use email::EmailChannel;
pub use webhook::WebhookChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Sms,
    Email,
    Webhook,
}

/// Someone to reach when a user's alert turns critical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub channel: ChannelKind,
    /// Phone number, mailbox or URL, depending on `channel`.
    pub address: String,
}

/// Rendered once per dispatch, shared by all contacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationMessage {
    pub alert_id: Uuid,
    pub severity: Severity,
    pub subject: String,
    pub body: String,
    pub crisis_resources: Vec<String>,
}

impl EscalationMessage {
    /// Body plus the crisis-resource list, for plain-text channels.
    pub fn full_text(&self) -> String {
        if self.crisis_resources.is_empty() {
            return self.body.clone();
        }
        let mut out = self.body.clone();
        out.push_str("\n\nCrisis resources:\n");
        for r in &self.crisis_resources {
            out.push_str("- ");
            out.push_str(r);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// One delivery attempt. `idempotency_key` is stable across retries so a
    /// receiver can drop duplicates.
    async fn send(
        &self,
        contact: &EmergencyContact,
        message: &EscalationMessage,
        idempotency_key: &str,
    ) -> Result<DeliveryStatus>;
}

/// Channel lookup by kind.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration; a later channel of the same kind wins.
    pub fn with(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register(channel);
        self
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Webhook delivery is always available; SMS needs `SMS_GATEWAY_URL`,
    /// email needs the SMTP variables read by [`EmailChannel::from_env`].
    pub fn from_env(timeout_ms: u64) -> Result<Self> {
        let mut reg = Self::new().with(Arc::new(WebhookChannel::new().with_timeout_ms(timeout_ms)));

        if let Ok(url) = std::env::var("SMS_GATEWAY_URL") {
            reg.register(Arc::new(WebhookChannel::sms_gateway(url).with_timeout_ms(timeout_ms)));
        } else {
            tracing::debug!(target: "escalation", "SMS disabled (no SMS_GATEWAY_URL)");
        }

        match EmailChannel::from_env()? {
            Some(email) => reg.register(Arc::new(email)),
            None => tracing::debug!(target: "escalation", "email disabled (no SMTP_HOST)"),
        }
        Ok(reg)
    }
}
