// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-channel notification delivery.
//!
//! A [`NotificationService`] fans a [`Message`] out to every configured
//! channel (Slack-compatible webhook, SMTP email, generic webhooks). Each
//! channel is tried independently: a failing channel is logged and reported
//! in [`NotificationError::Composite`] without stopping the others.

pub mod email;
pub mod slack;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finops_core::ErrorKind;
use finops_core::model::{OrganizationSettings, Severity};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

pub use email::{EmailChannel, EmailConfig};
pub use slack::SlackChannel;
pub use webhook::WebhookChannel;

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Slack-compatible incoming webhook.
    Slack,
    /// SMTP email.
    Email,
    /// Generic JSON webhooks.
    Webhook,
}

impl Channel {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// A cost anomaly was detected.
    #[serde(rename = "anomaly.detected")]
    AnomalyDetected,
    /// A budget reached its amount.
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded,
    /// A budget crossed a warning threshold.
    #[serde(rename = "budget.warning")]
    BudgetWarning,
    /// A new recommendation was found.
    #[serde(rename = "recommendation.new")]
    RecommendationNew,
    /// Sudden spend increase.
    #[serde(rename = "cost.spike")]
    CostSpike,
    /// Weekly summary.
    #[serde(rename = "weekly.digest")]
    WeeklyDigest,
}

impl EventKind {
    /// Dotted wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnomalyDetected => "anomaly.detected",
            Self::BudgetExceeded => "budget.exceeded",
            Self::BudgetWarning => "budget.warning",
            Self::RecommendationNew => "recommendation.new",
            Self::CostSpike => "cost.spike",
            Self::WeeklyDigest => "weekly.digest",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification. The timestamp is stamped by the service at send time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Event kind.
    #[serde(rename = "event_type")]
    pub event: EventKind,
    /// Short title.
    pub title: String,
    /// Plain-text body.
    pub body: String,
    /// Severity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Free-form fields rendered by channels that support them.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// UTC send time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A message without severity or data.
    pub fn new(event: EventKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            event,
            title: title.into(),
            body: body.into(),
            severity: None,
            data: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Add a data field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Cost anomaly alert.
    pub fn anomaly_detected(
        service: &str,
        provider: &str,
        severity: Severity,
        deviation_pct: f64,
        actual: f64,
        expected: f64,
    ) -> Self {
        Self::new(
            EventKind::AnomalyDetected,
            format!("Cost Anomaly Detected: {}", service),
            format!(
                "Unusual spending detected on {} ({}). Cost was ${:.2} vs expected ${:.2} ({:.1}% deviation).",
                service, provider, actual, expected, deviation_pct
            ),
        )
        .with_severity(severity)
        .with_field("Service", service)
        .with_field("Provider", provider)
        .with_field("Actual Cost", format!("${:.2}", actual))
        .with_field("Expected Cost", format!("${:.2}", expected))
        .with_field("Deviation", format!("{:.1}%", deviation_pct))
    }

    /// Budget threshold alert. `threshold_pct` is the crossed threshold in
    /// percent.
    pub fn budget_warning(name: &str, amount: f64, spent: f64, threshold_pct: f64) -> Self {
        let used = if amount > 0.0 { spent / amount * 100.0 } else { 0.0 };
        Self::new(
            EventKind::BudgetWarning,
            format!("Budget Warning: {}", name),
            format!(
                "Budget '{}' has reached {:.0}% of its ${:.2} limit (current spend: ${:.2}).",
                name, used, amount, spent
            ),
        )
        .with_severity(Severity::Medium)
        .with_budget_fields(name, amount, spent)
        .with_field("Threshold", format!("{:.0}%", threshold_pct))
    }

    /// Budget exceeded alert.
    pub fn budget_exceeded(name: &str, amount: f64, spent: f64) -> Self {
        let over = if amount > 0.0 {
            (spent - amount) / amount * 100.0
        } else {
            0.0
        };
        Self::new(
            EventKind::BudgetExceeded,
            format!("Budget Exceeded: {}", name),
            format!(
                "Budget '{}' has been exceeded. Limit: ${:.2}, Current spend: ${:.2} ({:.0}% over).",
                name, amount, spent, over
            ),
        )
        .with_severity(Severity::High)
        .with_budget_fields(name, amount, spent)
    }

    /// New recommendation alert.
    pub fn recommendation_new(resource_type: &str, kind: &str, monthly_savings: f64) -> Self {
        Self::new(
            EventKind::RecommendationNew,
            format!("New Recommendation: {}", kind),
            format!(
                "New optimization found for {}. Estimated savings: ${:.2}/month.",
                resource_type, monthly_savings
            ),
        )
        .with_severity(Severity::Low)
        .with_field("Resource Type", resource_type)
        .with_field("Type", kind)
        .with_field("Savings", format!("${:.2}/mo", monthly_savings))
    }

    fn with_budget_fields(self, name: &str, amount: f64, spent: f64) -> Self {
        self.with_field("Budget", name)
            .with_field("Limit", format!("${:.2}", amount))
            .with_field("Spent", format!("${:.2}", spent))
    }
}

/// Notification errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotificationError {
    /// One channel failed.
    #[error("{channel}: {message}")]
    Channel {
        /// The failing channel.
        channel: Channel,
        /// What went wrong.
        message: String,
    },

    /// Several channels were tried and at least one failed.
    #[error("notification errors: {}", join_errors(.0))]
    Composite(Vec<NotificationError>),

    /// The channel is not configured on this service.
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(Channel),
}

fn join_errors(errors: &[NotificationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl NotificationError {
    /// Shorthand for [`NotificationError::Channel`].
    pub fn channel(channel: Channel, message: impl Into<String>) -> Self {
        Self::Channel {
            channel,
            message: message.into(),
        }
    }

    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Channel { .. } | Self::Composite(_) => ErrorKind::Upstream,
            Self::UnsupportedChannel(_) => ErrorKind::Unsupported,
        }
    }
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotificationError>;

/// A delivery channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Which channel this is.
    fn channel(&self) -> Channel;

    /// Deliver one message.
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Process-level notification settings.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// Slack incoming webhook URL.
    pub slack_webhook_url: Option<String>,
    /// SMTP settings; email is disabled when `None`.
    pub email: Option<EmailConfig>,
    /// Generic webhook URLs.
    pub webhook_urls: Vec<String>,
    /// Per-request HTTP timeout (default 10 s when zero).
    pub timeout: Duration,
}

/// Fans messages out to the configured channels.
#[derive(Clone)]
pub struct NotificationService {
    config: NotificationConfig,
    http: reqwest::Client,
    configured: Vec<Arc<dyn NotificationChannel>>,
    custom: Vec<Arc<dyn NotificationChannel>>,
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

impl NotificationService {
    /// Build the service, enabling each channel whose settings are present.
    pub fn new(config: NotificationConfig) -> Result<Self> {
        let timeout = if config.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            config.timeout
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::channel(Channel::Webhook, e.to_string()))?;
        let configured = Self::configured_channels(&config, &http)?;
        Ok(Self {
            config,
            http,
            configured,
            custom: Vec::new(),
        })
    }

    fn configured_channels(
        config: &NotificationConfig,
        http: &reqwest::Client,
    ) -> Result<Vec<Arc<dyn NotificationChannel>>> {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        if let Some(url) = config.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            channels.push(Arc::new(SlackChannel::new(http.clone(), url)));
        }
        if let Some(email) = config.email.as_ref().filter(|e| !e.smtp_host.is_empty()) {
            channels.push(Arc::new(EmailChannel::new(email.clone())?));
        }
        if !config.webhook_urls.is_empty() {
            channels.push(Arc::new(WebhookChannel::new(
                http.clone(),
                config.webhook_urls.clone(),
            )));
        }
        Ok(channels)
    }

    /// A service with no channels; every send succeeds trivially.
    pub fn disabled() -> Self {
        Self {
            config: NotificationConfig::default(),
            http: reqwest::Client::new(),
            configured: Vec::new(),
            custom: Vec::new(),
        }
    }

    /// Add a custom channel.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.custom.push(channel);
        self
    }

    /// A service for one tenant: the organization's Slack webhook and email
    /// recipients override the process defaults. Custom channels are kept.
    pub fn with_recipients(&self, settings: &OrganizationSettings) -> Result<Self> {
        let mut config = self.config.clone();
        if let Some(url) = settings.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            config.slack_webhook_url = Some(url.to_string());
        }
        if !settings.email_recipients.is_empty()
            && let Some(email) = config.email.as_mut()
        {
            email.recipients = settings.email_recipients.clone();
        }
        let configured = Self::configured_channels(&config, &self.http)?;
        Ok(Self {
            config,
            http: self.http.clone(),
            configured,
            custom: self.custom.clone(),
        })
    }

    fn all(&self) -> impl Iterator<Item = &Arc<dyn NotificationChannel>> {
        self.configured.iter().chain(self.custom.iter())
    }

    /// Configured channels in delivery order.
    pub fn channels(&self) -> Vec<Channel> {
        self.all().map(|c| c.channel()).collect()
    }

    /// Whether `channel` is configured.
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.all().any(|c| c.channel() == channel)
    }

    /// Send to every channel; failures are collected into
    /// [`NotificationError::Composite`].
    pub async fn send(&self, mut message: Message) -> Result<()> {
        message.timestamp = Utc::now();
        let message = &message;
        let results = futures::future::join_all(self.all().map(|channel| async move {
            (channel.channel(), channel.send(message).await)
        }))
        .await;

        let mut errors = Vec::new();
        for (channel, result) in results {
            match result {
                Ok(()) => info!(channel = %channel, event = %message.event, "Notification sent"),
                Err(e) => {
                    error!(channel = %channel, event = %message.event, error = %e, "Notification send failed");
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::Composite(errors))
        }
    }

    /// Send through one channel.
    pub async fn send_to_channel(&self, channel: Channel, mut message: Message) -> Result<()> {
        message.timestamp = Utc::now();
        let target = self
            .all()
            .find(|c| c.channel() == channel)
            .ok_or(NotificationError::UnsupportedChannel(channel))?;
        target.send(&message).await
    }
}

/// Recording channel for tests.
#[derive(Default)]
pub struct MockChannel {
    sent: tokio::sync::Mutex<Vec<Message>>,
    /// When true, every send fails with "Mock failure".
    pub fail_by_default: bool,
    kind: Option<Channel>,
}

impl MockChannel {
    /// A succeeding mock posing as `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            kind: Some(channel),
            ..Default::default()
        }
    }

    /// A failing mock posing as `channel`.
    pub fn failing(channel: Channel) -> Self {
        Self {
            kind: Some(channel),
            fail_by_default: true,
            ..Default::default()
        }
    }

    /// Messages delivered so far.
    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    fn channel(&self) -> Channel {
        self.kind.unwrap_or(Channel::Webhook)
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if self.fail_by_default {
            return Err(NotificationError::channel(self.channel(), "Mock failure"));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
