use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{ChannelKind, EmergencyContact, EscalationMessage, NotificationChannel};
use crate::alert::DeliveryStatus;

pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    /// `Ok(None)` when `SMTP_HOST` is unset; an error when it is set but the
    /// rest of the SMTP settings are missing or malformed.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("NOTIFY_EMAIL_FROM").context("NOTIFY_EMAIL_FROM missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();
        let from: Mailbox = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;

        Ok(Some(Self { mailer, from }))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        contact: &EmergencyContact,
        message: &EscalationMessage,
        idempotency_key: &str,
    ) -> Result<DeliveryStatus> {
        let to: Mailbox = contact.address.parse().context("invalid contact mailbox")?;

        // Stable Message-ID lets mail servers drop a retried duplicate.
        let msg = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .message_id(Some(format!("<{idempotency_key}@risk-engine>")))
            .header(header::ContentType::TEXT_PLAIN)
            .body(message.full_text())
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(DeliveryStatus::Sent)
    }
}
