// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SMTP email channel.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::{Channel, Message, NotificationChannel, NotificationError, Result};

/// SMTP settings.
#[derive(Clone, Default)]
pub struct EmailConfig {
    /// SMTP relay host.
    pub smtp_host: String,
    /// SMTP port; 465 uses implicit TLS, anything else STARTTLS.
    pub smtp_port: u16,
    /// Sender address, also the login user.
    pub from: String,
    /// SMTP password. Never logged.
    pub password: Option<String>,
    /// Recipients; when empty, mail goes to the sender address.
    pub recipients: Vec<String>,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("from", &self.from)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("recipients", &self.recipients)
            .finish()
    }
}

impl EmailConfig {
    /// Recipients, falling back to the sender.
    pub fn effective_recipients(&self) -> Vec<String> {
        if self.recipients.is_empty() {
            vec![self.from.clone()]
        } else {
            self.recipients.clone()
        }
    }
}

/// Sends plain-text mail over SMTP.
pub struct EmailChannel {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

fn smtp_error(e: impl std::fmt::Display) -> NotificationError {
    NotificationError::channel(Channel::Email, e.to_string())
}

impl EmailChannel {
    /// Build the transport. No connection is made until the first send.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(smtp_error)?
        .port(config.smtp_port);

        let builder = match config.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => builder.credentials(Credentials::new(
                config.from.clone(),
                password.to_string(),
            )),
            None => builder,
        };

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    /// Compose the mail for `message`.
    pub fn compose(&self, message: &Message) -> Result<lettre::Message> {
        let from: Mailbox = self.config.from.parse().map_err(smtp_error)?;
        let mut builder = lettre::Message::builder()
            .from(from)
            .subject(format!("[FinOps] {}", message.title))
            .header(ContentType::TEXT_PLAIN);
        for recipient in self.config.effective_recipients() {
            let to: Mailbox = recipient.parse().map_err(smtp_error)?;
            builder = builder.to(to);
        }

        let body = format!(
            "{}\r\n\r\nEvent: {}\r\nTime: {}",
            message.body,
            message.event,
            message.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );
        builder.body(body).map_err(smtp_error)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let email = self.compose(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotificationError::channel(Channel::Email, format!("email send failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EventKind;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            from: "finops@example.com".into(),
            password: Some("hunter2".into()),
            recipients: Vec::new(),
        }
    }

    #[test]
    fn test_compose_falls_back_to_sender() {
        let channel = EmailChannel::new(config()).unwrap();
        let mail = channel
            .compose(&Message::new(EventKind::BudgetExceeded, "Budget Exceeded: Prod", "Over."))
            .unwrap();
        let raw = String::from_utf8(mail.formatted()).unwrap();

        assert!(raw.contains("Subject: [FinOps] Budget Exceeded: Prod"));
        assert!(raw.contains("To: finops@example.com"));
        assert!(raw.contains("Event: budget.exceeded"));
    }

    #[test]
    fn test_compose_uses_configured_recipients() {
        let mut cfg = config();
        cfg.recipients = vec!["a@example.com".into(), "b@example.com".into()];
        let channel = EmailChannel::new(cfg).unwrap();
        let mail = channel
            .compose(&Message::new(EventKind::CostSpike, "Spike", "Up."))
            .unwrap();
        let raw = String::from_utf8(mail.formatted()).unwrap();
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
    }

    #[test]
    fn test_bad_recipient_is_a_channel_error() {
        let mut cfg = config();
        cfg.recipients = vec!["not an address".into()];
        let channel = EmailChannel::new(cfg).unwrap();
        let err = channel
            .compose(&Message::new(EventKind::CostSpike, "t", "b"))
            .unwrap_err();
        assert!(matches!(err, NotificationError::Channel { channel: Channel::Email, .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        assert!(!format!("{:?}", config()).contains("hunter2"));
    }
}
