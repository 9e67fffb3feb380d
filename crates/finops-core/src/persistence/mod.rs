// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository interfaces and backends.
//!
//! Every tenant-scoped call takes the organization id explicitly and rejects
//! the nil id with [`CoreError::MissingTenant`]. Two backends implement the
//! traits: [`postgres`] for production and [`memory`] for tests and embedders.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    Anomaly, AnomalyFilter, AnomalySummary, AutoApprovalRule, BindingStatus, BindingUpdate, Budget,
    BudgetEvaluation, BudgetFilters, BudgetSummary, BudgetUpdate, CostAllocation, CostBreakdown,
    CostDimension, CostRecord, CostSummary, CostTrend, CredentialBinding, DateRange, Forecast,
    Granularity, Organization, OrganizationSettings, Page, Pagination, ProviderKind, Recommendation,
    RecommendationStatus, RemediationAction, RemediationFilter, RemediationSummary, TrendAxis,
    UntaggedResource,
};

/// Fail loudly when a query is issued without a tenant.
pub fn require_tenant(organization_id: Uuid, scope: &'static str) -> Result<(), CoreError> {
    if organization_id.is_nil() {
        return Err(CoreError::MissingTenant(scope));
    }
    Ok(())
}

/// Tenants.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Insert a tenant.
    async fn create(&self, organization: &Organization) -> Result<(), CoreError>;
    /// Look up a tenant.
    async fn get(&self, id: Uuid) -> Result<Option<Organization>, CoreError>;
    /// All tenants ordered by name.
    async fn list(&self) -> Result<Vec<Organization>, CoreError>;
    /// Replace the settings bag.
    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> Result<(), CoreError>;
    /// Delete a tenant and, by cascade, everything it owns.
    async fn delete(&self, id: Uuid) -> Result<(), CoreError>;
}

/// Credential bindings. The sealed blob is loaded only by
/// [`CredentialRepository::list_enabled`] and
/// [`CredentialRepository::get_by_tenant_and_kind`], the factory paths.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert a binding; [`CoreError::Duplicate`] on (tenant, kind) collision.
    async fn create(&self, binding: &CredentialBinding) -> Result<(), CoreError>;
    /// Look up a binding without its blob.
    async fn get_by_id(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CredentialBinding>, CoreError>;
    /// A tenant's bindings without blobs.
    async fn get_by_tenant(&self, organization_id: Uuid)
    -> Result<Vec<CredentialBinding>, CoreError>;
    /// A tenant's binding for one kind, with its blob.
    async fn get_by_tenant_and_kind(
        &self,
        organization_id: Uuid,
        kind: ProviderKind,
    ) -> Result<Option<CredentialBinding>, CoreError>;
    /// Partial update of name, enabled flag and blob.
    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BindingUpdate,
    ) -> Result<(), CoreError>;
    /// Enabled bindings across all tenants, with blobs.
    async fn list_enabled(&self) -> Result<Vec<CredentialBinding>, CoreError>;
    /// Set status and message.
    async fn update_status(
        &self,
        id: Uuid,
        status: BindingStatus,
        message: &str,
    ) -> Result<(), CoreError>;
    /// Stamp the last successful sync.
    async fn update_last_sync(&self, id: Uuid) -> Result<(), CoreError>;
    /// Remove a binding.
    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
}

/// Cost observations and aggregates.
#[async_trait]
pub trait CostRepository: Send + Sync {
    /// Upsert by natural key in one transaction; returns rows written.
    async fn upsert_batch(&self, records: &[CostRecord]) -> Result<u64, CoreError>;
    /// Total plus per-service amounts, largest first.
    async fn summary(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<CostSummary, CoreError>;
    /// Bucketed totals, optionally split by provider and/or service.
    async fn trend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        granularity: Granularity,
        axes: &[TrendAxis],
    ) -> Result<CostTrend, CoreError>;
    /// Amounts grouped by one dimension, largest first.
    async fn breakdown(
        &self,
        organization_id: Uuid,
        range: DateRange,
        dimension: CostDimension,
    ) -> Result<CostBreakdown, CoreError>;
    /// Per-day totals in date order; days without records are absent.
    async fn daily_totals(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<(chrono::NaiveDate, f64)>, CoreError>;
    /// Spend inside `filters` over `range`.
    async fn spend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        filters: &BudgetFilters,
    ) -> Result<f64, CoreError>;
    /// Raw records in date order.
    async fn list(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostRecord>, CoreError>;
    /// Spend per owner (`team` tag, else `project` tag, else
    /// [`UNALLOCATED`](crate::model::UNALLOCATED)), split by service.
    async fn allocations(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostAllocation>, CoreError>;
    /// Resource-scoped sources whose latest record lacks any of `required`
    /// tags, costliest first, at most
    /// [`UNTAGGED_LIMIT`](crate::model::UNTAGGED_LIMIT).
    async fn untagged_resources(
        &self,
        organization_id: Uuid,
        range: DateRange,
        required: &[String],
    ) -> Result<Vec<UntaggedResource>, CoreError>;
}

/// Detected anomalies.
#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    /// Insert an anomaly.
    async fn create(&self, anomaly: &Anomaly) -> Result<(), CoreError>;
    /// Look up an anomaly.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Anomaly>, CoreError>;
    /// Newest first.
    async fn list(
        &self,
        organization_id: Uuid,
        filter: &AnomalyFilter,
        page: Pagination,
    ) -> Result<Page<Anomaly>, CoreError>;
    /// Mark acknowledged by `by`.
    async fn acknowledge(&self, organization_id: Uuid, id: Uuid, by: &str)
    -> Result<(), CoreError>;
    /// Mark resolved.
    async fn resolve(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    /// Mark dismissed.
    async fn dismiss(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    /// Counts and deviation totals.
    async fn summary(&self, organization_id: Uuid) -> Result<AnomalySummary, CoreError>;
}

/// Stored forecasts.
#[async_trait]
pub trait ForecastRepository: Send + Sync {
    /// Insert a forecast.
    async fn create(&self, forecast: &Forecast) -> Result<(), CoreError>;
    /// Look up a forecast.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Forecast>, CoreError>;
    /// The most recently generated forecast.
    async fn latest(&self, organization_id: Uuid) -> Result<Option<Forecast>, CoreError>;
    /// Newest first, at most `limit`.
    async fn list(&self, organization_id: Uuid, limit: i64) -> Result<Vec<Forecast>, CoreError>;
    /// Remove a forecast.
    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
}

/// Budgets.
#[async_trait]
pub trait BudgetRepository: Send + Sync {
    /// Insert a budget.
    async fn create(&self, budget: &Budget) -> Result<(), CoreError>;
    /// Look up a budget.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Budget>, CoreError>;
    /// A tenant's budgets ordered by name.
    async fn list(&self, organization_id: Uuid) -> Result<Vec<Budget>, CoreError>;
    /// Apply a partial update and return the result.
    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BudgetUpdate,
    ) -> Result<Budget, CoreError>;
    /// Record spend, recompute status and thresholds, and persist.
    async fn update_spend(
        &self,
        organization_id: Uuid,
        id: Uuid,
        spend: f64,
    ) -> Result<(Budget, BudgetEvaluation), CoreError>;
    /// Remove a budget.
    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    /// Totals across a tenant's budgets.
    async fn summary(&self, organization_id: Uuid) -> Result<BudgetSummary, CoreError>;
}

/// Recommendations refreshed from providers.
#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    /// Insert, or refresh by (tenant, provider, external id) keeping the status.
    async fn upsert(&self, recommendation: &Recommendation) -> Result<(), CoreError>;
    /// Look up a recommendation.
    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Recommendation>, CoreError>;
    /// Largest savings first.
    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<RecommendationStatus>,
        page: Pagination,
    ) -> Result<Page<Recommendation>, CoreError>;
    /// Set the review status.
    async fn update_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: RecommendationStatus,
    ) -> Result<(), CoreError>;
}

/// Remediation actions and auto-approval rules.
#[async_trait]
pub trait RemediationRepository: Send + Sync {
    /// Insert an action.
    async fn create(&self, action: &RemediationAction) -> Result<(), CoreError>;
    /// Look up an action.
    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RemediationAction>, CoreError>;
    /// Newest first, with the unpaginated total.
    async fn list(
        &self,
        organization_id: Uuid,
        filter: &RemediationFilter,
        page: Pagination,
    ) -> Result<Page<RemediationAction>, CoreError>;
    /// Persist every mutable column, including the audit log.
    async fn update(&self, action: &RemediationAction) -> Result<(), CoreError>;
    /// Counts and savings totals.
    async fn summary(&self, organization_id: Uuid) -> Result<RemediationSummary, CoreError>;

    /// Insert a rule.
    async fn create_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError>;
    /// All rules in creation order.
    async fn list_rules(&self, organization_id: Uuid) -> Result<Vec<AutoApprovalRule>, CoreError>;
    /// Look up a rule.
    async fn get_rule(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AutoApprovalRule>, CoreError>;
    /// Replace name, enabled flag and conditions.
    async fn update_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError>;
    /// Remove a rule.
    async fn delete_rule(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError>;
    /// Enabled rules in creation order.
    async fn active_rules(&self, organization_id: Uuid)
    -> Result<Vec<AutoApprovalRule>, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_tenant() {
        assert!(require_tenant(Uuid::new_v4(), "costs").is_ok());
        let err = require_tenant(Uuid::nil(), "costs").unwrap_err();
        assert!(matches!(err, CoreError::MissingTenant("costs")));
    }
}
