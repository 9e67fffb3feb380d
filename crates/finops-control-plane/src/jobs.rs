// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled analytics jobs: anomaly detection, forecast refresh, budget
//! evaluation and recommendation refresh.
//!
//! Every job walks tenants (or bindings) one at a time. A failure is logged
//! against its tenant and counted in the [`JobReport`]; the loop continues.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use finops_core::model::{
    AnomalyFilter, BudgetStatus, DateRange, Forecast, Granularity, Organization, Pagination,
    Severity,
};
use finops_core::persistence::{
    AnomalyRepository, BudgetRepository, CostRepository, CredentialRepository, ForecastRepository,
    OrganizationRepository, RecommendationRepository, RemediationRepository, memory, postgres,
};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ml::{AnomalyRequest, DataPoint, ForecastRequest, MlClient};
use crate::notification::{Message, NotificationService};
use crate::provider::{ProviderFactory, RecommendationRequest};

/// Days of history fed to anomaly detection.
pub const ANOMALY_HISTORY_DAYS: i64 = 30;
/// Fewer points than this and detection is skipped.
pub const ANOMALY_MIN_POINTS: usize = 7;
/// Sensitivity passed to the sidecar.
pub const ANOMALY_SENSITIVITY: f64 = 0.1;
/// Days of history fed to the forecaster.
pub const FORECAST_HISTORY_DAYS: i64 = 90;
/// Fewer points than this and forecasting is skipped.
pub const FORECAST_MIN_POINTS: usize = 14;
/// Periods requested from the forecaster.
pub const FORECAST_PERIODS: u32 = 30;

/// Outcome counters of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Units (tenants, bindings, budgets) looked at.
    pub processed: usize,
    /// Units that completed.
    pub succeeded: usize,
    /// Units that failed and were logged.
    pub failed: usize,
    /// Units skipped for lack of data.
    pub skipped: usize,
}

/// The repositories the control plane works against.
#[derive(Clone)]
pub struct Repositories {
    /// Tenants.
    pub organizations: Arc<dyn OrganizationRepository>,
    /// Credential bindings.
    pub credentials: Arc<dyn CredentialRepository>,
    /// Cost records.
    pub costs: Arc<dyn CostRepository>,
    /// Anomalies.
    pub anomalies: Arc<dyn AnomalyRepository>,
    /// Forecasts.
    pub forecasts: Arc<dyn ForecastRepository>,
    /// Budgets.
    pub budgets: Arc<dyn BudgetRepository>,
    /// Recommendations.
    pub recommendations: Arc<dyn RecommendationRepository>,
    /// Remediation actions and rules.
    pub remediations: Arc<dyn RemediationRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            organizations: Arc::new(postgres::PostgresOrganizationRepository::new(pool.clone())),
            credentials: Arc::new(postgres::PostgresCredentialRepository::new(pool.clone())),
            costs: Arc::new(postgres::PostgresCostRepository::new(pool.clone())),
            anomalies: Arc::new(postgres::PostgresAnomalyRepository::new(pool.clone())),
            forecasts: Arc::new(postgres::PostgresForecastRepository::new(pool.clone())),
            budgets: Arc::new(postgres::PostgresBudgetRepository::new(pool.clone())),
            recommendations: Arc::new(postgres::PostgresRecommendationRepository::new(
                pool.clone(),
            )),
            remediations: Arc::new(postgres::PostgresRemediationRepository::new(pool)),
        }
    }

    /// In-process repositories.
    pub fn in_memory() -> Self {
        Self {
            organizations: Arc::new(memory::MemoryOrganizationRepository::new()),
            credentials: Arc::new(memory::MemoryCredentialRepository::new()),
            costs: Arc::new(memory::MemoryCostRepository::new()),
            anomalies: Arc::new(memory::MemoryAnomalyRepository::new()),
            forecasts: Arc::new(memory::MemoryForecastRepository::new()),
            budgets: Arc::new(memory::MemoryBudgetRepository::new()),
            recommendations: Arc::new(memory::MemoryRecommendationRepository::new()),
            remediations: Arc::new(memory::MemoryRemediationRepository::new()),
        }
    }
}

/// Result of one unit of work.
enum Unit {
    Done,
    Skipped,
}

/// Runs the analytics jobs.
#[derive(Clone)]
pub struct Analytics {
    repos: Repositories,
    factory: ProviderFactory,
    ml: Arc<MlClient>,
    notifier: NotificationService,
}

impl Analytics {
    /// Create the job set.
    pub fn new(
        repos: Repositories,
        factory: ProviderFactory,
        ml: Arc<MlClient>,
        notifier: NotificationService,
    ) -> Self {
        Self {
            repos,
            factory,
            ml,
            notifier,
        }
    }

    fn tally(report: &mut JobReport, job: &str, scope: &str, outcome: Result<Unit>) {
        report.processed += 1;
        match outcome {
            Ok(Unit::Done) => report.succeeded += 1,
            Ok(Unit::Skipped) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                error!(job = %job, scope = %scope, error = %e, "Job unit failed");
            }
        }
    }

    async fn notify(&self, organization: &Organization, message: Message) {
        if !organization.settings.alerts_enabled {
            return;
        }
        let notifier = match self.notifier.with_recipients(&organization.settings) {
            Ok(notifier) => notifier,
            Err(e) => {
                warn!(tenant_id = %organization.id, error = %e, "Invalid tenant notification settings");
                return;
            }
        };
        if let Err(e) = notifier.send(message).await {
            warn!(tenant_id = %organization.id, error = %e, "Notification delivery failed");
        }
    }

    /// Detect anomalies for every tenant.
    pub async fn detect_anomalies(&self) -> Result<JobReport> {
        self.detect_anomalies_for(Utc::now().date_naive()).await
    }

    /// Detect anomalies over the window ending (exclusively) at `today`.
    pub async fn detect_anomalies_for(&self, today: NaiveDate) -> Result<JobReport> {
        let mut report = JobReport::default();
        if !self.ml.is_enabled() {
            info!("ML sidecar disabled, skipping anomaly detection");
            return Ok(report);
        }
        for organization in self.repos.organizations.list().await? {
            let outcome = self.detect_for(&organization, today).await;
            Self::tally(&mut report, "anomaly-detect", &organization.id.to_string(), outcome);
        }
        Ok(report)
    }

    async fn detect_for(&self, organization: &Organization, today: NaiveDate) -> Result<Unit> {
        let range = DateRange::last_days(today, ANOMALY_HISTORY_DAYS);
        let totals = self.repos.costs.daily_totals(organization.id, range).await?;
        if totals.len() < ANOMALY_MIN_POINTS {
            debug!(tenant_id = %organization.id, points = totals.len(), "Not enough data for anomaly detection");
            return Ok(Unit::Skipped);
        }

        let request = AnomalyRequest {
            organization_id: organization.id,
            data: totals.into_iter().map(DataPoint::from).collect(),
            sensitivity: ANOMALY_SENSITIVITY,
        };
        let response = self.ml.detect_anomalies(&request).await?;

        // Re-running over the same window must not duplicate anomalies.
        let known: HashSet<NaiveDate> = self
            .repos
            .anomalies
            .list(organization.id, &AnomalyFilter::default(), Pagination { page: 1, page_size: 100 })
            .await?
            .items
            .into_iter()
            .map(|a| a.date)
            .collect();

        let mut created = 0;
        for detected in response.anomalies {
            if known.contains(&detected.date) {
                continue;
            }
            let anomaly = detected.into_anomaly(organization.id);
            self.repos.anomalies.create(&anomaly).await?;
            created += 1;

            if matches!(anomaly.severity, Severity::High | Severity::Critical) {
                let message = Message::anomaly_detected(
                    anomaly.service.as_deref().unwrap_or("All services"),
                    "all",
                    anomaly.severity,
                    anomaly.deviation_pct,
                    anomaly.actual_amount,
                    anomaly.expected_amount,
                );
                self.notify(organization, message).await;
            }
        }
        info!(tenant_id = %organization.id, anomalies = created, "Anomaly detection completed");
        Ok(Unit::Done)
    }

    /// Refresh the forecast of every tenant.
    pub async fn refresh_forecasts(&self) -> Result<JobReport> {
        self.refresh_forecasts_for(Utc::now().date_naive()).await
    }

    /// Refresh forecasts from the history ending (exclusively) at `today`.
    pub async fn refresh_forecasts_for(&self, today: NaiveDate) -> Result<JobReport> {
        let mut report = JobReport::default();
        if !self.ml.is_enabled() {
            info!("ML sidecar disabled, skipping forecast refresh");
            return Ok(report);
        }
        for organization in self.repos.organizations.list().await? {
            let outcome = self.forecast_for(&organization, today).await;
            Self::tally(&mut report, "forecast", &organization.id.to_string(), outcome);
        }
        Ok(report)
    }

    async fn forecast_for(&self, organization: &Organization, today: NaiveDate) -> Result<Unit> {
        let range = DateRange::last_days(today, FORECAST_HISTORY_DAYS);
        let totals = self.repos.costs.daily_totals(organization.id, range).await?;
        if totals.len() < FORECAST_MIN_POINTS {
            debug!(tenant_id = %organization.id, points = totals.len(), "Not enough data for forecast");
            return Ok(Unit::Skipped);
        }

        let request = ForecastRequest {
            organization_id: organization.id,
            historical_days: FORECAST_HISTORY_DAYS as u32,
            forecast_days: FORECAST_PERIODS,
            granularity: Granularity::Daily,
            service_filter: None,
            account_filter: None,
            data: totals.into_iter().map(DataPoint::from).collect(),
        };
        let response = self.ml.forecast(&request).await?;
        if response.cached {
            debug!(tenant_id = %organization.id, "Forecast unchanged since last run");
            return Ok(Unit::Skipped);
        }

        let mut forecast = Forecast::new(
            organization.id,
            response.model_version,
            Granularity::Daily,
            response.forecasts,
            response.confidence_level,
        );
        forecast.currency = organization.settings.default_currency;
        self.repos.forecasts.create(&forecast).await?;
        info!(
            tenant_id = %organization.id,
            points = forecast.predictions.len(),
            "Forecast refreshed"
        );
        Ok(Unit::Done)
    }

    /// Evaluate every budget against current-period spend.
    pub async fn check_budgets(&self) -> Result<JobReport> {
        self.check_budgets_for(Utc::now().date_naive()).await
    }

    /// Evaluate budgets for the periods containing `today`.
    pub async fn check_budgets_for(&self, today: NaiveDate) -> Result<JobReport> {
        let mut report = JobReport::default();
        for organization in self.repos.organizations.list().await? {
            let budgets = match self.repos.budgets.list(organization.id).await {
                Ok(budgets) => budgets,
                Err(e) => {
                    Self::tally(&mut report, "budget-check", &organization.id.to_string(), Err(e.into()));
                    continue;
                }
            };
            for budget in budgets {
                let outcome = self.check_budget(&organization, budget, today).await;
                Self::tally(&mut report, "budget-check", &organization.id.to_string(), outcome);
            }
        }
        Ok(report)
    }

    async fn check_budget(
        &self,
        organization: &Organization,
        budget: finops_core::model::Budget,
        today: NaiveDate,
    ) -> Result<Unit> {
        if budget.status == BudgetStatus::Inactive {
            return Ok(Unit::Skipped);
        }
        let range = budget.period.range_containing(today);
        let spend = self
            .repos
            .costs
            .spend(organization.id, range, &budget.filters)
            .await?;
        let (budget, evaluation) = self
            .repos
            .budgets
            .update_spend(organization.id, budget.id, spend)
            .await?;

        for threshold in &evaluation.newly_crossed {
            self.notify(
                organization,
                Message::budget_warning(&budget.name, budget.amount, spend, *threshold),
            )
            .await;
        }
        if evaluation.newly_exceeded {
            self.notify(
                organization,
                Message::budget_exceeded(&budget.name, budget.amount, spend),
            )
            .await;
        }
        debug!(
            tenant_id = %organization.id,
            budget_id = %budget.id,
            spend,
            status = %budget.status,
            "Budget evaluated"
        );
        Ok(Unit::Done)
    }

    /// Pull recommendations for every enabled binding.
    pub async fn refresh_recommendations(&self) -> Result<JobReport> {
        let mut report = JobReport::default();
        for binding in self.repos.credentials.list_enabled().await? {
            let outcome = async {
                let provider = self
                    .factory
                    .from_sealed(binding.provider, &binding.sealed_credentials)?;
                let response = provider
                    .get_recommendations(&RecommendationRequest::default())
                    .await;
                provider.close().await;

                let response = response?;
                let count = response.recommendations.len();
                for recommendation in response.recommendations {
                    let model = recommendation.into_model(binding.organization_id, binding.provider);
                    self.repos.recommendations.upsert(&model).await?;
                }
                info!(
                    tenant_id = %binding.organization_id,
                    provider = %binding.provider,
                    recommendations = count,
                    "Recommendations refreshed"
                );
                Ok::<_, Error>(Unit::Done)
            }
            .await;
            Self::tally(&mut report, "recommendations", &binding.id.to_string(), outcome);
        }
        Ok(report)
    }
}
