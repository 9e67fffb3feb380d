// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Optimization recommendations.
//!
//! Recommendations are read-only from the remediation engine's perspective.
//! Their status is changed by users, and they are refreshed from providers by
//! the recommendations job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, ProviderKind};

text_enum! {
    /// What a recommendation proposes.
    pub enum RecommendationKind {
        /// Move to a smaller instance type.
        Rightsizing => "rightsizing",
        /// Buy reserved instances.
        ReservedInstances => "reserved_instances",
        /// Buy a savings plan.
        SavingsPlans => "savings_plans",
        /// Remove idle resources.
        IdleResources => "idle_resources",
        /// Cheaper storage class or type.
        StorageOptimization => "storage_optimization",
        /// Cheaper network topology.
        NetworkOptimization => "network_optimization",
    }
}

text_enum! {
    /// Expected impact of acting on a recommendation.
    pub enum Impact {
        /// Small savings.
        Low => "low",
        /// Moderate savings.
        Medium => "medium",
        /// Large savings.
        High => "high",
    }
}

impl Impact {
    /// Lenient parse used for provider payloads (`"High"`, `"medium"`, ...).
    /// Unknown values map to `Medium`.
    pub fn from_provider(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

text_enum! {
    /// User-managed lifecycle of a recommendation.
    pub enum RecommendationStatus {
        /// Not yet reviewed.
        Pending => "pending",
        /// Accepted for implementation.
        Accepted => "accepted",
        /// Rejected by a user.
        Rejected => "rejected",
        /// Acted upon.
        Implemented => "implemented",
        /// Hidden by a user.
        Dismissed => "dismissed",
    }
}

/// A stored optimization recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Provider-assigned identifier; unique per (tenant, provider).
    pub external_id: String,
    /// Recommendation kind.
    pub kind: RecommendationKind,
    /// Cloud the resource lives in.
    pub provider: ProviderKind,
    /// Account or subscription.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Target resource.
    pub resource_id: String,
    /// Resource type, e.g. `ec2-instance`.
    pub resource_type: String,
    /// Current configuration, e.g. `m5.xlarge`.
    pub current_config: String,
    /// Recommended configuration.
    pub recommended_config: String,
    /// Estimated monthly savings.
    pub estimated_savings: f64,
    /// Currency of the savings.
    pub currency: Currency,
    /// Expected impact.
    pub impact: Impact,
    /// Implementation effort, free text.
    pub effort: Option<String>,
    /// Risk, free text.
    pub risk: Option<String>,
    /// Review status.
    pub status: RecommendationStatus,
    /// Provider-specific details.
    pub details: HashMap<String, serde_json::Value>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Recommendation {
    /// A pending recommendation with empty coordinates.
    pub fn new(
        organization_id: Uuid,
        provider: ProviderKind,
        external_id: impl Into<String>,
        kind: RecommendationKind,
        estimated_savings: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            external_id: external_id.into(),
            kind,
            provider,
            account_id: String::new(),
            region: String::new(),
            resource_id: String::new(),
            resource_type: String::new(),
            current_config: String::new(),
            recommended_config: String::new(),
            estimated_savings,
            currency: Currency::default(),
            impact: Impact::Medium,
            effort: None,
            risk: None,
            status: RecommendationStatus::Pending,
            details: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
