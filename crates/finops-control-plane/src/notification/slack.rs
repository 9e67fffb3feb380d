// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Slack-compatible incoming webhook channel.

use async_trait::async_trait;
use finops_core::model::Severity;
use serde_json::{Value, json};

use super::{Channel, Message, NotificationChannel, NotificationError, Result};

/// Posts a single coloured attachment per message.
pub struct SlackChannel {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackChannel {
    /// Create a channel for one webhook URL.
    pub fn new(http: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            http,
            webhook_url: webhook_url.into(),
        }
    }

    fn color(severity: Option<Severity>) -> &'static str {
        match severity {
            Some(Severity::Critical) => "#FF0000",
            Some(Severity::High) => "#FF9800",
            Some(Severity::Medium) => "#FFC107",
            _ => "#2196F3",
        }
    }

    fn payload(message: &Message) -> Value {
        let fields: Vec<Value> = message
            .data
            .iter()
            .map(|(title, value)| json!({"title": title, "value": value, "short": true}))
            .collect();
        json!({
            "attachments": [{
                "color": Self::color(message.severity),
                "title": message.title,
                "text": message.body,
                "footer": "FinOps",
                "ts": message.timestamp.timestamp(),
                "fields": fields,
            }]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(message))
            .send()
            .await
            .map_err(|e| NotificationError::channel(Channel::Slack, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::channel(
                Channel::Slack,
                format!("returned status {}", status.as_u16()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EventKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_colour_and_fields() {
        let msg = Message::new(EventKind::AnomalyDetected, "Spike", "EC2 doubled")
            .with_severity(Severity::High)
            .with_field("Service", "EC2");
        let payload = SlackChannel::payload(&msg);
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "#FF9800");
        assert_eq!(attachment["footer"], "FinOps");
        assert_eq!(attachment["fields"][0]["title"], "Service");
        assert_eq!(attachment["fields"][0]["short"], true);

        let plain = Message::new(EventKind::WeeklyDigest, "Digest", "");
        assert_eq!(SlackChannel::payload(&plain)["attachments"][0]["color"], "#2196F3");
    }

    #[tokio::test]
    async fn test_send_posts_attachment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"attachments": [{"title": "Budget Exceeded: Prod"}]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(reqwest::Client::new(), format!("{}/hook", server.uri()));
        channel
            .send(&Message::budget_exceeded("Prod", 100.0, 150.0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_team"))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(reqwest::Client::new(), server.uri());
        let err = channel
            .send(&Message::new(EventKind::CostSpike, "t", "b"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "slack: returned status 404");
    }
}
