// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process repositories.
//!
//! These back unit tests and embedders that run without a database. They
//! enforce the same contracts as the PostgreSQL backend: tenant scoping,
//! natural-key upserts, (tenant, provider) uniqueness and blob-free reads.
//! Deleting an organization here does not cascade into the other stores.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AnomalyRepository, BudgetRepository, CostRepository, CredentialRepository, ForecastRepository,
    OrganizationRepository, RecommendationRepository, RemediationRepository, require_tenant,
};
use crate::error::CoreError;
use crate::model::{
    Anomaly, AnomalyFilter, AnomalyStatus, AnomalySummary, AutoApprovalRule, BindingStatus,
    BindingUpdate, Budget, BudgetEvaluation, BudgetFilters, BudgetSummary, BudgetUpdate,
    CostAllocation, CostBreakdown, CostDimension, CostRecord, CostSummary, CostTrend,
    CredentialBinding, Currency, DateRange, Forecast, Granularity, NaturalKey, Organization,
    OrganizationSettings, Page, Pagination, ProviderKind, Recommendation, RecommendationStatus,
    RemediationAction, RemediationFilter, RemediationSummary, SealedBlob, TrendAxis, TrendPoint,
    UNTAGGED_LIMIT, UntaggedResource, allocation_target, bucket_start, missing_tags,
};

fn paginate<T>(items: Vec<T>, page: Pagination) -> Page<T> {
    let total = items.len() as i64;
    let items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    Page { items, total }
}

fn without_blob(mut binding: CredentialBinding) -> CredentialBinding {
    binding.sealed_credentials = SealedBlob::default();
    binding
}

// ============================================================================
// Organizations
// ============================================================================

/// In-memory [`OrganizationRepository`].
#[derive(Clone, Default)]
pub struct MemoryOrganizationRepository {
    organizations: Arc<Mutex<HashMap<Uuid, Organization>>>,
}

impl MemoryOrganizationRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationRepository for MemoryOrganizationRepository {
    async fn create(&self, organization: &Organization) -> Result<(), CoreError> {
        self.organizations
            .lock()
            .await
            .insert(organization.id, organization.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Organization>, CoreError> {
        Ok(self.organizations.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Organization>, CoreError> {
        let mut all: Vec<_> = self.organizations.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> Result<(), CoreError> {
        let mut organizations = self.organizations.lock().await;
        let org = organizations
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("organization", id))?;
        org.settings = settings.clone();
        org.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        self.organizations
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("organization", id))
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// In-memory [`CredentialRepository`].
#[derive(Clone, Default)]
pub struct MemoryCredentialRepository {
    bindings: Arc<Mutex<HashMap<Uuid, CredentialBinding>>>,
}

impl MemoryCredentialRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn create(&self, binding: &CredentialBinding) -> Result<(), CoreError> {
        require_tenant(binding.organization_id, "cloud_providers")?;
        let mut bindings = self.bindings.lock().await;
        let taken = bindings.values().any(|b| {
            b.organization_id == binding.organization_id && b.provider == binding.provider
        });
        if taken {
            return Err(CoreError::Duplicate {
                entity: "credential binding",
                detail: format!("{} already bound for tenant", binding.provider),
            });
        }
        bindings.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn get_by_id(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        Ok(self
            .bindings
            .lock()
            .await
            .get(&id)
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .map(without_blob))
    }

    async fn get_by_tenant(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let mut found: Vec<_> = self
            .bindings
            .lock()
            .await
            .values()
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .map(without_blob)
            .collect();
        found.sort_by_key(|b| b.provider);
        Ok(found)
    }

    async fn get_by_tenant_and_kind(
        &self,
        organization_id: Uuid,
        kind: ProviderKind,
    ) -> Result<Option<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        Ok(self
            .bindings
            .lock()
            .await
            .values()
            .find(|b| b.organization_id == organization_id && b.provider == kind)
            .cloned())
    }

    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BindingUpdate,
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(&id)
            .filter(|b| b.organization_id == organization_id)
            .ok_or_else(|| CoreError::not_found("credential binding", id))?;
        if let Some(name) = &update.name {
            binding.name = name.clone();
        }
        if let Some(enabled) = update.enabled {
            binding.enabled = enabled;
        }
        if let Some(blob) = &update.sealed_credentials {
            binding.sealed_credentials = blob.clone();
        }
        binding.updated_at = Utc::now();
        Ok(())
    }

    async fn list_enabled(&self) -> Result<Vec<CredentialBinding>, CoreError> {
        let mut enabled: Vec<_> = self
            .bindings
            .lock()
            .await
            .values()
            .filter(|b| b.enabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|b| (b.organization_id, b.provider));
        Ok(enabled)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BindingStatus,
        message: &str,
    ) -> Result<(), CoreError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("credential binding", id))?;
        binding.status = status;
        binding.status_message = Some(message.to_string());
        binding.updated_at = Utc::now();
        Ok(())
    }

    async fn update_last_sync(&self, id: Uuid) -> Result<(), CoreError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("credential binding", id))?;
        let now = Utc::now();
        binding.last_sync_at = Some(now);
        binding.updated_at = now;
        Ok(())
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let mut bindings = self.bindings.lock().await;
        match bindings.get(&id) {
            Some(b) if b.organization_id == organization_id => {
                bindings.remove(&id);
                Ok(())
            }
            _ => Err(CoreError::not_found("credential binding", id)),
        }
    }
}

// ============================================================================
// Costs
// ============================================================================

/// In-memory [`CostRepository`] keyed by natural key.
#[derive(Clone, Default)]
pub struct MemoryCostRepository {
    records: Arc<Mutex<HashMap<NaturalKey, CostRecord>>>,
}

impl MemoryCostRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all tenants.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn in_range(&self, organization_id: Uuid, range: DateRange) -> Vec<CostRecord> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.organization_id == organization_id && range.contains(r.date))
            .cloned()
            .collect()
    }
}

fn dominant_currency(records: &[CostRecord]) -> Currency {
    let mut by_currency: HashMap<Currency, f64> = HashMap::new();
    for r in records {
        *by_currency.entry(r.currency).or_default() += r.amount;
    }
    by_currency
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
        .unwrap_or_default()
}

fn group_amounts<'a>(
    records: &'a [CostRecord],
    key: impl Fn(&'a CostRecord) -> &'a str,
) -> Vec<(String, f64)> {
    let mut groups: HashMap<&str, f64> = HashMap::new();
    for r in records {
        *groups.entry(key(r)).or_default() += r.amount;
    }
    groups
        .into_iter()
        .map(|(name, amount)| (name.to_string(), amount))
        .collect()
}

#[async_trait]
impl CostRepository for MemoryCostRepository {
    async fn upsert_batch(&self, records: &[CostRecord]) -> Result<u64, CoreError> {
        for record in records {
            require_tenant(record.organization_id, "costs")?;
        }
        let mut stored = self.records.lock().await;
        for record in records {
            stored
                .entry(record.natural_key())
                .and_modify(|existing| {
                    existing.amount = record.amount;
                    existing.estimated = record.estimated;
                    existing.updated_at = Utc::now();
                })
                .or_insert_with(|| record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn summary(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<CostSummary, CoreError> {
        require_tenant(organization_id, "costs")?;
        let records = self.in_range(organization_id, range).await;
        let groups = group_amounts(&records, |r| r.service.as_str());
        Ok(CostSummary::from_groups(
            range,
            dominant_currency(&records),
            groups,
        ))
    }

    async fn trend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        granularity: Granularity,
        axes: &[TrendAxis],
    ) -> Result<CostTrend, CoreError> {
        require_tenant(organization_id, "costs")?;
        let by_provider = axes.contains(&TrendAxis::Provider);
        let by_service = axes.contains(&TrendAxis::Service);

        let mut buckets: HashMap<(NaiveDate, Option<ProviderKind>, Option<String>), (f64, i64)> =
            HashMap::new();
        for r in self.in_range(organization_id, range).await {
            let key = (
                bucket_start(granularity, r.date),
                by_provider.then_some(r.provider),
                by_service.then(|| r.service.clone()),
            );
            let entry = buckets.entry(key).or_default();
            entry.0 += r.amount;
            entry.1 += 1;
        }
        let points = buckets
            .into_iter()
            .map(|((date, provider, service), (total, record_count))| TrendPoint {
                date,
                total,
                provider,
                service,
                record_count,
            })
            .collect();
        Ok(CostTrend::from_points(range, granularity, points))
    }

    async fn breakdown(
        &self,
        organization_id: Uuid,
        range: DateRange,
        dimension: CostDimension,
    ) -> Result<CostBreakdown, CoreError> {
        require_tenant(organization_id, "costs")?;
        let records = self.in_range(organization_id, range).await;
        let groups = group_amounts(&records, |r| dimension.value_of(r));
        Ok(CostBreakdown::from_groups(
            dimension,
            dominant_currency(&records),
            groups,
        ))
    }

    async fn daily_totals(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let mut days: HashMap<NaiveDate, f64> = HashMap::new();
        for r in self.in_range(organization_id, range).await {
            *days.entry(r.date).or_default() += r.amount;
        }
        let mut totals: Vec<_> = days.into_iter().collect();
        totals.sort_by_key(|(date, _)| *date);
        Ok(totals)
    }

    async fn spend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        filters: &BudgetFilters,
    ) -> Result<f64, CoreError> {
        require_tenant(organization_id, "costs")?;
        Ok(self
            .in_range(organization_id, range)
            .await
            .iter()
            .filter(|r| filters.accepts(r))
            .map(|r| r.amount)
            .sum())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostRecord>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let mut records = self.in_range(organization_id, range).await;
        records.sort_by(|a, b| {
            (a.date, a.provider, &a.service, &a.account_id, &a.region, &a.resource_id).cmp(&(
                b.date,
                b.provider,
                &b.service,
                &b.account_id,
                &b.region,
                &b.resource_id,
            ))
        });
        Ok(records)
    }

    async fn allocations(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostAllocation>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let records = self.in_range(organization_id, range).await;
        let mut groups: HashMap<(&str, &str), f64> = HashMap::new();
        for r in &records {
            *groups
                .entry((allocation_target(&r.tags), r.service.as_str()))
                .or_default() += r.amount;
        }
        let groups = groups
            .into_iter()
            .map(|((target, service), amount)| (target.to_string(), service.to_string(), amount))
            .collect();
        Ok(CostAllocation::from_groups(
            range,
            dominant_currency(&records),
            groups,
        ))
    }

    async fn untagged_resources(
        &self,
        organization_id: Uuid,
        range: DateRange,
        required: &[String],
    ) -> Result<Vec<UntaggedResource>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let records = self.in_range(organization_id, range).await;
        // (resource, service, provider, region) -> (cost, latest record)
        let mut resources: HashMap<(&str, &str, ProviderKind, &str), (f64, &CostRecord)> =
            HashMap::new();
        for r in records.iter().filter(|r| !r.resource_id.is_empty()) {
            let key = (r.resource_id.as_str(), r.service.as_str(), r.provider, r.region.as_str());
            let entry = resources.entry(key).or_insert((0.0, r));
            entry.0 += r.amount;
            if r.date > entry.1.date {
                entry.1 = r;
            }
        }

        let mut untagged: Vec<UntaggedResource> = resources
            .into_iter()
            .filter_map(|((resource_id, service, provider, region), (cost, latest))| {
                let missing = missing_tags(&latest.tags, required);
                (!missing.is_empty()).then(|| UntaggedResource {
                    resource_id: resource_id.to_string(),
                    resource_type: service.to_string(),
                    provider,
                    region: region.to_string(),
                    cost,
                    missing_tags: missing,
                })
            })
            .collect();
        untagged.sort_by(|a, b| {
            b.cost
                .total_cmp(&a.cost)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        untagged.truncate(UNTAGGED_LIMIT as usize);
        Ok(untagged)
    }
}

// ============================================================================
// Anomalies
// ============================================================================

/// In-memory [`AnomalyRepository`].
#[derive(Clone, Default)]
pub struct MemoryAnomalyRepository {
    anomalies: Arc<Mutex<HashMap<Uuid, Anomaly>>>,
}

impl MemoryAnomalyRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(
        &self,
        organization_id: Uuid,
        id: Uuid,
        f: impl FnOnce(&mut Anomaly),
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let mut anomalies = self.anomalies.lock().await;
        let anomaly = anomalies
            .get_mut(&id)
            .filter(|a| a.organization_id == organization_id)
            .ok_or_else(|| CoreError::not_found("anomaly", id))?;
        f(anomaly);
        anomaly.updated_at = Utc::now();
        Ok(())
    }

    async fn for_tenant(&self, organization_id: Uuid) -> Vec<Anomaly> {
        self.anomalies
            .lock()
            .await
            .values()
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnomalyRepository for MemoryAnomalyRepository {
    async fn create(&self, anomaly: &Anomaly) -> Result<(), CoreError> {
        require_tenant(anomaly.organization_id, "anomalies")?;
        self.anomalies
            .lock()
            .await
            .insert(anomaly.id, anomaly.clone());
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Anomaly>, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        Ok(self
            .anomalies
            .lock()
            .await
            .get(&id)
            .filter(|a| a.organization_id == organization_id)
            .cloned())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        filter: &AnomalyFilter,
        page: Pagination,
    ) -> Result<Page<Anomaly>, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let mut found: Vec<_> = self
            .for_tenant(organization_id)
            .await
            .into_iter()
            .filter(|a| filter.statuses.is_empty() || filter.statuses.contains(&a.status))
            .filter(|a| filter.severities.is_empty() || filter.severities.contains(&a.severity))
            .collect();
        found.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.date.cmp(&a.date)));
        Ok(paginate(found, page))
    }

    async fn acknowledge(&self, organization_id: Uuid, id: Uuid, by: &str) -> Result<(), CoreError> {
        self.modify(organization_id, id, |a| {
            a.status = AnomalyStatus::Acknowledged;
            a.acknowledged_at = Some(Utc::now());
            a.acknowledged_by = Some(by.to_string());
        })
        .await
    }

    async fn resolve(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        self.modify(organization_id, id, |a| {
            a.status = AnomalyStatus::Resolved;
            a.resolved_at = Some(Utc::now());
        })
        .await
    }

    async fn dismiss(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        self.modify(organization_id, id, |a| a.status = AnomalyStatus::Dismissed)
            .await
    }

    async fn summary(&self, organization_id: Uuid) -> Result<AnomalySummary, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let anomalies = self.for_tenant(organization_id).await;
        Ok(AnomalySummary::from_anomalies(&anomalies))
    }
}

// ============================================================================
// Forecasts
// ============================================================================

/// In-memory [`ForecastRepository`].
#[derive(Clone, Default)]
pub struct MemoryForecastRepository {
    forecasts: Arc<Mutex<Vec<Forecast>>>,
}

impl MemoryForecastRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ForecastRepository for MemoryForecastRepository {
    async fn create(&self, forecast: &Forecast) -> Result<(), CoreError> {
        require_tenant(forecast.organization_id, "forecasts")?;
        self.forecasts.lock().await.push(forecast.clone());
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Forecast>, CoreError> {
        require_tenant(organization_id, "forecasts")?;
        Ok(self
            .forecasts
            .lock()
            .await
            .iter()
            .find(|f| f.organization_id == organization_id && f.id == id)
            .cloned())
    }

    async fn latest(&self, organization_id: Uuid) -> Result<Option<Forecast>, CoreError> {
        Ok(self.list(organization_id, 1).await?.into_iter().next())
    }

    async fn list(&self, organization_id: Uuid, limit: i64) -> Result<Vec<Forecast>, CoreError> {
        require_tenant(organization_id, "forecasts")?;
        let mut found: Vec<_> = self
            .forecasts
            .lock()
            .await
            .iter()
            .filter(|f| f.organization_id == organization_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "forecasts")?;
        let mut forecasts = self.forecasts.lock().await;
        let before = forecasts.len();
        forecasts.retain(|f| !(f.organization_id == organization_id && f.id == id));
        if forecasts.len() == before {
            return Err(CoreError::not_found("forecast", id));
        }
        Ok(())
    }
}

// ============================================================================
// Budgets
// ============================================================================

/// In-memory [`BudgetRepository`].
#[derive(Clone, Default)]
pub struct MemoryBudgetRepository {
    budgets: Arc<Mutex<HashMap<Uuid, Budget>>>,
}

impl MemoryBudgetRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetRepository for MemoryBudgetRepository {
    async fn create(&self, budget: &Budget) -> Result<(), CoreError> {
        require_tenant(budget.organization_id, "budgets")?;
        self.budgets.lock().await.insert(budget.id, budget.clone());
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Budget>, CoreError> {
        require_tenant(organization_id, "budgets")?;
        Ok(self
            .budgets
            .lock()
            .await
            .get(&id)
            .filter(|b| b.organization_id == organization_id)
            .cloned())
    }

    async fn list(&self, organization_id: Uuid) -> Result<Vec<Budget>, CoreError> {
        require_tenant(organization_id, "budgets")?;
        let mut found: Vec<_> = self
            .budgets
            .lock()
            .await
            .values()
            .filter(|b| b.organization_id == organization_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BudgetUpdate,
    ) -> Result<Budget, CoreError> {
        require_tenant(organization_id, "budgets")?;
        let mut budgets = self.budgets.lock().await;
        let budget = budgets
            .get_mut(&id)
            .filter(|b| b.organization_id == organization_id)
            .ok_or_else(|| CoreError::not_found("budget", id))?;
        budget.apply(update)?;
        Ok(budget.clone())
    }

    async fn update_spend(
        &self,
        organization_id: Uuid,
        id: Uuid,
        spend: f64,
    ) -> Result<(Budget, BudgetEvaluation), CoreError> {
        require_tenant(organization_id, "budgets")?;
        let mut budgets = self.budgets.lock().await;
        let budget = budgets
            .get_mut(&id)
            .filter(|b| b.organization_id == organization_id)
            .ok_or_else(|| CoreError::not_found("budget", id))?;
        let evaluation = budget.evaluate(spend);
        Ok((budget.clone(), evaluation))
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "budgets")?;
        let mut budgets = self.budgets.lock().await;
        match budgets.get(&id) {
            Some(b) if b.organization_id == organization_id => {
                budgets.remove(&id);
                Ok(())
            }
            _ => Err(CoreError::not_found("budget", id)),
        }
    }

    async fn summary(&self, organization_id: Uuid) -> Result<BudgetSummary, CoreError> {
        let budgets = self.list(organization_id).await?;
        Ok(BudgetSummary::from_budgets(&budgets))
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// In-memory [`RecommendationRepository`].
#[derive(Clone, Default)]
pub struct MemoryRecommendationRepository {
    recommendations: Arc<Mutex<HashMap<Uuid, Recommendation>>>,
}

impl MemoryRecommendationRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecommendationRepository for MemoryRecommendationRepository {
    async fn upsert(&self, recommendation: &Recommendation) -> Result<(), CoreError> {
        require_tenant(recommendation.organization_id, "recommendations")?;
        let mut stored = self.recommendations.lock().await;
        let existing = stored.values_mut().find(|r| {
            r.organization_id == recommendation.organization_id
                && r.provider == recommendation.provider
                && r.external_id == recommendation.external_id
        });
        match existing {
            Some(existing) => {
                let keep = (existing.id, existing.status, existing.created_at);
                *existing = recommendation.clone();
                (existing.id, existing.status, existing.created_at) = keep;
                existing.updated_at = Utc::now();
            }
            None => {
                stored.insert(recommendation.id, recommendation.clone());
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Recommendation>, CoreError> {
        require_tenant(organization_id, "recommendations")?;
        Ok(self
            .recommendations
            .lock()
            .await
            .get(&id)
            .filter(|r| r.organization_id == organization_id)
            .cloned())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<RecommendationStatus>,
        page: Pagination,
    ) -> Result<Page<Recommendation>, CoreError> {
        require_tenant(organization_id, "recommendations")?;
        let mut found: Vec<_> = self
            .recommendations
            .lock()
            .await
            .values()
            .filter(|r| r.organization_id == organization_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.estimated_savings
                .total_cmp(&a.estimated_savings)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(paginate(found, page))
    }

    async fn update_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: RecommendationStatus,
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "recommendations")?;
        let mut stored = self.recommendations.lock().await;
        let rec = stored
            .get_mut(&id)
            .filter(|r| r.organization_id == organization_id)
            .ok_or_else(|| CoreError::not_found("recommendation", id))?;
        rec.status = status;
        rec.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// Remediation
// ============================================================================

/// In-memory [`RemediationRepository`]. Rules keep insertion order.
#[derive(Clone, Default)]
pub struct MemoryRemediationRepository {
    actions: Arc<Mutex<HashMap<Uuid, RemediationAction>>>,
    rules: Arc<Mutex<Vec<AutoApprovalRule>>>,
}

impl MemoryRemediationRepository {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemediationRepository for MemoryRemediationRepository {
    async fn create(&self, action: &RemediationAction) -> Result<(), CoreError> {
        require_tenant(action.organization_id, "remediation_actions")?;
        self.actions.lock().await.insert(action.id, action.clone());
        Ok(())
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RemediationAction>, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        Ok(self
            .actions
            .lock()
            .await
            .get(&id)
            .filter(|a| a.organization_id == organization_id)
            .cloned())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        filter: &RemediationFilter,
        page: Pagination,
    ) -> Result<Page<RemediationAction>, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        let mut found: Vec<_> = self
            .actions
            .lock()
            .await
            .values()
            .filter(|a| a.organization_id == organization_id && filter.accepts(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(found, page))
    }

    async fn update(&self, action: &RemediationAction) -> Result<(), CoreError> {
        require_tenant(action.organization_id, "remediation_actions")?;
        let mut actions = self.actions.lock().await;
        match actions.get_mut(&action.id) {
            Some(stored) if stored.organization_id == action.organization_id => {
                *stored = action.clone();
                Ok(())
            }
            _ => Err(CoreError::not_found("remediation action", action.id)),
        }
    }

    async fn summary(&self, organization_id: Uuid) -> Result<RemediationSummary, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        let actions = self.actions.lock().await;
        Ok(RemediationSummary::from_actions(
            actions
                .values()
                .filter(|a| a.organization_id == organization_id),
        ))
    }

    async fn create_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError> {
        require_tenant(rule.organization_id, "auto_approval_rules")?;
        let mut rules = self.rules.lock().await;
        if rules
            .iter()
            .any(|r| r.organization_id == rule.organization_id && r.name == rule.name)
        {
            return Err(CoreError::Duplicate {
                entity: "auto-approval rule",
                detail: rule.name.clone(),
            });
        }
        rules.push(rule.clone());
        Ok(())
    }

    async fn list_rules(&self, organization_id: Uuid) -> Result<Vec<AutoApprovalRule>, CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        Ok(self
            .rules
            .lock()
            .await
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn get_rule(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AutoApprovalRule>, CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        Ok(self
            .rules
            .lock()
            .await
            .iter()
            .find(|r| r.organization_id == organization_id && r.id == id)
            .cloned())
    }

    async fn update_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError> {
        require_tenant(rule.organization_id, "auto_approval_rules")?;
        let mut rules = self.rules.lock().await;
        let stored = rules
            .iter_mut()
            .find(|r| r.organization_id == rule.organization_id && r.id == rule.id)
            .ok_or_else(|| CoreError::not_found("auto-approval rule", rule.id))?;
        stored.name = rule.name.clone();
        stored.enabled = rule.enabled;
        stored.conditions = rule.conditions.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_rule(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        let mut rules = self.rules.lock().await;
        let before = rules.len();
        rules.retain(|r| !(r.organization_id == organization_id && r.id == id));
        if rules.len() == before {
            return Err(CoreError::not_found("auto-approval rule", id));
        }
        Ok(())
    }

    async fn active_rules(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<AutoApprovalRule>, CoreError> {
        Ok(self
            .list_rules(organization_id)
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }
}
