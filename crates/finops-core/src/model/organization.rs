// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenants and their settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Currency;

/// A tenant. Parent of every other entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Tenant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Tenant-wide settings.
    pub settings: OrganizationSettings,
    /// When the tenant was created.
    pub created_at: DateTime<Utc>,
    /// When the tenant was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Create a new tenant with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            settings: OrganizationSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Settings bag stored as JSON on the organization row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationSettings {
    /// Currency used for summaries.
    pub default_currency: Currency,
    /// IANA timezone name.
    pub timezone: String,
    /// First month (1-12) of the fiscal year.
    pub fiscal_year_start: u32,
    /// Whether alert notifications are sent for this tenant.
    pub alerts_enabled: bool,
    /// Per-tenant Slack webhook overriding the process default.
    pub slack_webhook_url: Option<String>,
    /// Per-tenant email recipients overriding the process default.
    pub email_recipients: Vec<String>,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            default_currency: Currency::Usd,
            timezone: "UTC".to_string(),
            fiscal_year_start: 1,
            alerts_enabled: true,
            slack_webhook_url: None,
            email_recipients: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_tolerate_missing_fields() {
        let settings: OrganizationSettings =
            serde_json::from_str(r#"{"timezone":"Europe/Warsaw"}"#).unwrap();
        assert_eq!(settings.timezone, "Europe/Warsaw");
        assert_eq!(settings.default_currency, Currency::Usd);
        assert!(settings.alerts_enabled);
        assert!(settings.email_recipients.is_empty());
    }
}
