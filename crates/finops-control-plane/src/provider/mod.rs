// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider abstraction.
//!
//! A [`CloudProvider`] reads costs and recommendations from one cloud account
//! and normalizes them into the canonical model. Long-lived providers built
//! from process configuration live in the [`ProviderRegistry`]; per-tenant
//! providers are built from sealed credentials by the [`ProviderFactory`],
//! used for one sync, and closed.

pub mod aws;
pub mod azure;
pub mod factory;
pub mod mock;
pub mod normalize;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use finops_core::model::{
    Currency, Granularity, Impact, ProviderKind, Recommendation, RecommendationKind,
};
use finops_core::{CryptoError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::cloud::CloudError;

pub use factory::ProviderFactory;
pub use mock::MockProvider;
pub use registry::ProviderRegistry;

/// Errors raised by providers and the factory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// No constructor is registered for the kind.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(ProviderKind),

    /// The cloud API call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Credentials could not be used to build a client.
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The sealed blob could not be opened or parsed.
    #[error("Corrupt credentials: {0}")]
    Corrupt(String),
}

impl ProviderError {
    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedProvider(_) => ErrorKind::Unsupported,
            Self::Upstream(_) | Self::Credentials(_) => ErrorKind::Upstream,
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Corrupt(_) => ErrorKind::Corrupt,
        }
    }
}

impl From<CloudError> for ProviderError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::Auth(message) => Self::Credentials(message),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<CryptoError> for ProviderError {
    fn from(e: CryptoError) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// Result type using ProviderError.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Outcome of a provider health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the probe succeeded.
    pub healthy: bool,
    /// Short human-readable outcome.
    pub message: String,
    /// When the probe ran.
    pub last_checked: DateTime<Utc>,
    /// Provider-specific details.
    pub details: HashMap<String, Value>,
}

impl HealthStatus {
    /// A passing probe.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            last_checked: Utc::now(),
            details: HashMap::new(),
        }
    }

    /// A failing probe.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            ..Self::healthy(message)
        }
    }

    /// Attach a detail.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Cost grouping axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// Cloud service.
    Service,
    /// Account / subscription.
    Account,
    /// Region / location.
    Region,
}

/// Cost query filters. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostFilters {
    /// Services to include.
    pub services: Vec<String>,
    /// Accounts to include.
    pub account_ids: Vec<String>,
    /// Regions to include.
    pub regions: Vec<String>,
    /// Tags that must match.
    pub tags: HashMap<String, String>,
}

/// A cost query over the half-open day range `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRequest {
    /// First day included.
    pub start: NaiveDate,
    /// First day excluded.
    pub end: NaiveDate,
    /// Bucket size. Weekly is not supported by any provider.
    pub granularity: Granularity,
    /// Grouping axes, in order.
    #[serde(default)]
    pub group_by: Vec<GroupBy>,
    /// Filters.
    #[serde(default)]
    pub filters: CostFilters,
}

impl CostRequest {
    /// Daily costs over `[start, end)` grouped by service.
    pub fn daily_by_service(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            granularity: Granularity::Daily,
            group_by: vec![GroupBy::Service],
            filters: CostFilters::default(),
        }
    }

    /// Reject empty ranges and unsupported granularities.
    pub fn validate(&self) -> Result<()> {
        if self.end <= self.start {
            return Err(ProviderError::InvalidRequest(format!(
                "end {} must be after start {}",
                self.end, self.start
            )));
        }
        if self.granularity == Granularity::Weekly {
            return Err(ProviderError::InvalidRequest(
                "weekly granularity is not supported".into(),
            ));
        }
        Ok(())
    }
}

/// One normalized cost bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostItem {
    /// UTC day the bucket starts on.
    pub date: NaiveDate,
    /// Amount in the response currency.
    pub amount: f64,
    /// Service, when grouped by service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Account, when grouped by account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Region, when grouped by region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Normalized cost query result in a single currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostResponse {
    /// Buckets.
    pub costs: Vec<CostItem>,
    /// Sum of every bucket.
    pub total_amount: f64,
    /// Currency of every amount.
    pub currency: Currency,
    /// Echo of the request start.
    pub start: NaiveDate,
    /// Echo of the request end.
    pub end: NaiveDate,
    /// `PartialParse` and similar non-fatal notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Recommendation query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationRequest {
    /// Kinds to fetch; empty means every kind the provider supports.
    pub kinds: Vec<RecommendationKind>,
    /// Accounts to include.
    pub account_ids: Vec<String>,
    /// Regions to include.
    pub regions: Vec<String>,
}

impl RecommendationRequest {
    /// Whether `kind` was requested.
    pub fn wants(&self, kind: RecommendationKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// A recommendation as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecommendation {
    /// Provider-assigned id, stable across refreshes.
    pub id: String,
    /// Recommendation kind.
    pub kind: RecommendationKind,
    /// Target resource.
    pub resource_id: String,
    /// Target resource type.
    pub resource_type: String,
    /// Account or subscription.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Current configuration.
    pub current_config: String,
    /// Recommended configuration.
    pub recommended_config: String,
    /// Estimated savings.
    pub estimated_savings: f64,
    /// Currency of the savings.
    pub currency: Currency,
    /// Expected impact.
    pub impact: Impact,
    /// Provider-specific details.
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl ProviderRecommendation {
    /// Convert into a stored recommendation for `organization_id`.
    pub fn into_model(self, organization_id: Uuid, provider: ProviderKind) -> Recommendation {
        let mut rec = Recommendation::new(
            organization_id,
            provider,
            self.id,
            self.kind,
            self.estimated_savings,
        );
        rec.resource_id = self.resource_id;
        rec.resource_type = self.resource_type;
        rec.account_id = self.account_id;
        rec.region = self.region;
        rec.current_config = self.current_config;
        rec.recommended_config = self.recommended_config;
        rec.currency = self.currency;
        rec.impact = self.impact;
        rec.details = self.details;
        rec
    }
}

/// Recommendation query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    /// Recommendations.
    pub recommendations: Vec<ProviderRecommendation>,
    /// Sum of estimated savings.
    pub total_savings: f64,
    /// Currency of the savings.
    pub currency: Currency,
}

impl RecommendationResponse {
    /// Wrap recommendations, totalling their savings.
    pub fn new(recommendations: Vec<ProviderRecommendation>, currency: Currency) -> Self {
        let total_savings = recommendations.iter().map(|r| r.estimated_savings).sum();
        Self {
            recommendations,
            total_savings,
            currency,
        }
    }
}

/// Capability set every cloud provider exposes.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Registry name, e.g. `aws`.
    fn name(&self) -> &str;

    /// Provider kind.
    fn kind(&self) -> ProviderKind;

    /// Probe connectivity. Never fails; failures are reported in the status.
    async fn health(&self) -> HealthStatus;

    /// Normalized costs over the request window.
    async fn get_costs(&self, request: &CostRequest) -> Result<CostResponse>;

    /// Optimization recommendations.
    async fn get_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse>;

    /// Release resources. Called once when the provider is discarded.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_cost_request_validation() {
        assert!(CostRequest::daily_by_service(day(1), day(31)).validate().is_ok());

        let err = CostRequest::daily_by_service(day(5), day(5)).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut weekly = CostRequest::daily_by_service(day(1), day(31));
        weekly.granularity = Granularity::Weekly;
        assert!(matches!(
            weekly.validate(),
            Err(ProviderError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ProviderError::UnsupportedProvider(ProviderKind::Gcp).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            ProviderError::from(CloudError::Auth("denied".into())).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            ProviderError::from(CryptoError::Corrupt).kind(),
            ErrorKind::Corrupt
        );
    }

    #[test]
    fn test_into_model_keeps_coordinates() {
        let org = Uuid::new_v4();
        let rec = ProviderRecommendation {
            id: "ri-m5.large".into(),
            kind: RecommendationKind::ReservedInstances,
            resource_id: "m5.large".into(),
            resource_type: "EC2 Reserved Instance".into(),
            account_id: "123".into(),
            region: "eu-west-1".into(),
            current_config: "On-Demand".into(),
            recommended_config: "Reserved (2 instances)".into(),
            estimated_savings: 1200.0,
            currency: Currency::Usd,
            impact: Impact::High,
            details: HashMap::new(),
        }
        .into_model(org, ProviderKind::Aws);

        assert_eq!(rec.organization_id, org);
        assert_eq!(rec.external_id, "ri-m5.large");
        assert_eq!(rec.region, "eu-west-1");
        assert_eq!(rec.impact, Impact::High);
    }
}
