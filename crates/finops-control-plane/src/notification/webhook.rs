// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic JSON webhook channel.

use async_trait::async_trait;

use super::{Channel, Message, NotificationChannel, NotificationError, Result};

/// Header carrying the event kind.
pub const EVENT_HEADER: &str = "X-FinOps-Event";

/// POSTs the message JSON to every URL. Any status of 300 or above fails.
pub struct WebhookChannel {
    http: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookChannel {
    /// Create a channel for a set of URLs.
    pub fn new(http: reqwest::Client, urls: Vec<String>) -> Self {
        Self { http, urls }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let mut errors = Vec::new();
        for url in &self.urls {
            let result = self
                .http
                .post(url)
                .header(EVENT_HEADER, message.event.as_str())
                .json(message)
                .send()
                .await;
            match result {
                Ok(response) if response.status().as_u16() >= 300 => {
                    errors.push(format!("webhook {}: status {}", url, response.status().as_u16()));
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("webhook {}: {}", url, e)),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::channel(Channel::Webhook, errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_to_every_url_and_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .and(header(EVENT_HEADER, "budget.warning"))
            .and(body_partial_json(json!({"event_type": "budget.warning", "severity": "medium"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/conflict"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(
            reqwest::Client::new(),
            vec![format!("{}/ok", server.uri()), format!("{}/conflict", server.uri())],
        );
        let err = channel
            .send(&Message::budget_warning("Dev", 100.0, 80.0, 80.0))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("/conflict: status 409"), "{}", text);
        assert!(!text.contains("/ok"));
    }
}
