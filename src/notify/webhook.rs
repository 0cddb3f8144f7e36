use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::{ChannelKind, EmergencyContact, EscalationMessage, NotificationChannel};
use crate::alert::DeliveryStatus;

/// JSON POST delivery. Either straight to the contact's own URL (`Webhook`)
/// or through an SMS gateway that takes the phone number in the payload.
#[derive(Clone)]
pub struct WebhookChannel {
    kind: ChannelKind,
    gateway: Option<String>,
    client: Client,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new() -> Self {
        Self {
            kind: ChannelKind::Webhook,
            gateway: None,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn sms_gateway(url: String) -> Self {
        Self {
            kind: ChannelKind::Sms,
            gateway: Some(url),
            ..Self::new()
        }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Duration::from_millis(ms);
        self
    }
}

impl Default for WebhookChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    name: &'a str,
    subject: &'a str,
    text: String,
    alert_id: String,
    severity: crate::alert::Severity,
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(
        &self,
        contact: &EmergencyContact,
        message: &EscalationMessage,
        idempotency_key: &str,
    ) -> Result<DeliveryStatus> {
        let url = self.gateway.as_deref().unwrap_or(&contact.address);
        if url.is_empty() {
            return Err(anyhow!("no webhook URL for contact {}", contact.name));
        }

        let payload = WebhookPayload {
            to: &contact.address,
            name: &contact.name,
            subject: &message.subject,
            text: message.full_text(),
            alert_id: message.alert_id.to_string(),
            severity: message.severity,
        };

        let rsp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("Idempotency-Key", idempotency_key)
            .json(&payload)
            .send()
            .await
            .context("webhook post")?
            .error_for_status()
            .context("webhook non-2xx")?;

        // 202 means queued by the receiver; anything else 2xx is a hand-off.
        Ok(match rsp.status() {
            StatusCode::ACCEPTED => DeliveryStatus::Sent,
            _ => DeliveryStatus::Confirmed,
        })
    }
}
