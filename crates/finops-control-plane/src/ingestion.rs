// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost ingestion (the cost-sync job).
//!
//! Every enabled binding gets a transient provider that is closed as soon as
//! its window has been fetched. A failing binding is marked `error` and the
//! loop moves on, so one tenant cannot stall the others. Records are written
//! through the natural-key upsert, which makes re-running a window idempotent.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use finops_core::model::{BindingStatus, CostRecord, CredentialBinding};
use finops_core::persistence::{CostRepository, CredentialRepository};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::JobReport;
use crate::provider::{CloudProvider, CostRequest, ProviderFactory};

/// Default look-back window in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Service name used when a provider reports an ungrouped item.
const UNKNOWN_SERVICE: &str = "Unknown";

/// Pulls daily per-service costs for every enabled binding.
#[derive(Clone)]
pub struct CostSync {
    credentials: Arc<dyn CredentialRepository>,
    costs: Arc<dyn CostRepository>,
    factory: ProviderFactory,
    window_days: i64,
}

impl CostSync {
    /// Create the job.
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        costs: Arc<dyn CostRepository>,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            credentials,
            costs,
            factory,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    /// Override the look-back window.
    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days.max(1);
        self
    }

    /// Sync every enabled binding up to today.
    pub async fn run(&self) -> Result<JobReport> {
        self.run_for(Utc::now().date_naive()).await
    }

    /// Sync every enabled binding for the window ending (exclusively) at
    /// `today`.
    pub async fn run_for(&self, today: NaiveDate) -> Result<JobReport> {
        let bindings = self.credentials.list_enabled().await?;
        let request = CostRequest::daily_by_service(today - Duration::days(self.window_days), today);
        let mut report = JobReport::default();

        for binding in &bindings {
            report.processed += 1;
            match self.sync_binding(binding, &request).await {
                Ok(written) => {
                    report.succeeded += 1;
                    info!(
                        tenant_id = %binding.organization_id,
                        provider = %binding.provider,
                        records = written,
                        "Cost sync completed"
                    );
                }
                Err(message) => {
                    report.failed += 1;
                    warn!(
                        tenant_id = %binding.organization_id,
                        provider = %binding.provider,
                        error = %message,
                        "Cost sync failed"
                    );
                    if let Err(e) = self
                        .credentials
                        .update_status(binding.id, BindingStatus::Error, &message)
                        .await
                    {
                        warn!(binding_id = %binding.id, error = %e, "Failed to record sync error");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Returns rows written, or the message recorded on the binding.
    async fn sync_binding(
        &self,
        binding: &CredentialBinding,
        request: &CostRequest,
    ) -> std::result::Result<u64, String> {
        let provider = self
            .factory
            .from_sealed(binding.provider, &binding.sealed_credentials)
            .map_err(|e| e.to_string())?;

        let outcome = self.ingest(binding, provider.as_ref(), request).await;
        provider.close().await;
        let written = outcome?;

        self.credentials
            .update_status(binding.id, BindingStatus::Connected, "")
            .await
            .map_err(|e| e.to_string())?;
        self.credentials
            .update_last_sync(binding.id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(written)
    }

    async fn ingest(
        &self,
        binding: &CredentialBinding,
        provider: &dyn CloudProvider,
        request: &CostRequest,
    ) -> std::result::Result<u64, String> {
        let response = provider.get_costs(request).await.map_err(|e| e.to_string())?;
        for warning in &response.warnings {
            debug!(tenant_id = %binding.organization_id, warning = %warning, "Provider warning");
        }

        let records: Vec<CostRecord> = response
            .costs
            .into_iter()
            .map(|item| {
                let service = item
                    .service
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
                let mut record = CostRecord::new(
                    binding.organization_id,
                    item.date,
                    binding.provider,
                    service,
                    item.amount,
                )
                .with_account(item.account_id.unwrap_or_default())
                .with_region(item.region.unwrap_or_default());
                record.currency = response.currency;
                record
            })
            .collect();

        if records.is_empty() {
            return Ok(0);
        }
        self.costs.upsert_batch(&records).await.map_err(|e| e.to_string())
    }
}
