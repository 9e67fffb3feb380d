// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the control plane.
//!
//! [`ControlPlaneRuntime`] wires the repositories, provider factory, ML
//! client, notification service and remediation executors together, registers
//! the scheduled jobs and runs them until [`shutdown`](ControlPlaneRuntime::shutdown).
//!
//! ```rust,ignore
//! use finops_control_plane::jobs::Repositories;
//! use finops_control_plane::runtime::ControlPlaneRuntime;
//!
//! let runtime = ControlPlaneRuntime::builder()
//!     .repositories(Repositories::postgres(pool))
//!     .factory(factory)
//!     .ml(ml_client)
//!     .executor(Arc::new(AwsExecutor::new(http, AwsEndpoints::default())))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ... serve requests through runtime.engine() ...
//!
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::JobSchedules;
use crate::ingestion::CostSync;
use crate::jobs::{Analytics, JobReport, Repositories};
use crate::ml::MlClient;
use crate::notification::NotificationService;
use crate::provider::{CloudProvider, ProviderFactory, ProviderRegistry};
use crate::remediation::{Executor, RemediationEngine};
use crate::scheduler::{RunOutcome, Scheduler, SchedulerConfig};

/// Name of the cost ingestion job.
pub const JOB_COST_SYNC: &str = "cost-sync";
/// Name of the anomaly detection job.
pub const JOB_ANOMALY_DETECT: &str = "anomaly-detect";
/// Name of the forecast refresh job.
pub const JOB_FORECAST: &str = "forecast";
/// Name of the budget evaluation job.
pub const JOB_BUDGET_CHECK: &str = "budget-check";
/// Name of the recommendation refresh job.
pub const JOB_RECOMMENDATIONS: &str = "recommendations";

/// Builder for creating a [`ControlPlaneRuntime`].
#[derive(Default)]
pub struct ControlPlaneRuntimeBuilder {
    repositories: Option<Repositories>,
    factory: Option<ProviderFactory>,
    ml: Option<MlClient>,
    notifier: Option<NotificationService>,
    executors: Vec<Arc<dyn Executor>>,
    registry: ProviderRegistry,
    schedules: JobSchedules,
    scheduler: SchedulerConfig,
}

impl ControlPlaneRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repositories (required).
    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Set the provider factory used for per-tenant providers (required).
    pub fn factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the ML client.
    ///
    /// Default: disabled, so anomaly detection and forecasting are skipped.
    pub fn ml(mut self, client: MlClient) -> Self {
        self.ml = Some(client);
        self
    }

    /// Set the notification service.
    ///
    /// Default: no channels.
    pub fn notifier(mut self, notifier: NotificationService) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register a remediation executor for its provider kind.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Register a long-lived provider built from process configuration.
    pub fn provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.registry.register(provider);
        self
    }

    /// Set the job schedules.
    ///
    /// Default: [`JobSchedules::default`].
    pub fn schedules(mut self, schedules: JobSchedules) -> Self {
        self.schedules = schedules;
        self
    }

    /// Set the worker pool size and run deadline.
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ControlPlaneRuntimeConfig> {
        let repositories = self
            .repositories
            .ok_or_else(|| anyhow::anyhow!("repositories are required"))?;
        let factory = self
            .factory
            .ok_or_else(|| anyhow::anyhow!("factory is required"))?;

        Ok(ControlPlaneRuntimeConfig {
            repositories,
            factory,
            ml: self.ml.unwrap_or_else(MlClient::disabled),
            notifier: self.notifier.unwrap_or_else(NotificationService::disabled),
            executors: self.executors,
            registry: self.registry,
            schedules: self.schedules,
            scheduler: self.scheduler,
        })
    }
}

/// Configuration for a [`ControlPlaneRuntime`].
pub struct ControlPlaneRuntimeConfig {
    repositories: Repositories,
    factory: ProviderFactory,
    ml: MlClient,
    notifier: NotificationService,
    executors: Vec<Arc<dyn Executor>>,
    registry: ProviderRegistry,
    schedules: JobSchedules,
    scheduler: SchedulerConfig,
}

fn log_report(job: &str, report: JobReport) {
    info!(
        job = %job,
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "Job report"
    );
}

impl ControlPlaneRuntimeConfig {
    /// Register the scheduled jobs and start dispatching them.
    pub async fn start(self) -> Result<ControlPlaneRuntime> {
        let repos = self.repositories;

        let engine = self.executors.into_iter().fold(
            RemediationEngine::new(
                repos.remediations.clone(),
                repos.credentials.clone(),
                self.factory.clone(),
            ),
            |engine, executor| engine.with_executor(executor),
        );

        let cost_sync = CostSync::new(
            repos.credentials.clone(),
            repos.costs.clone(),
            self.factory.clone(),
        );
        let analytics = Analytics::new(
            repos.clone(),
            self.factory,
            Arc::new(self.ml),
            self.notifier,
        );

        let scheduler = Scheduler::new(self.scheduler);
        let schedules = &self.schedules;

        let sync = cost_sync.clone();
        scheduler.register(JOB_COST_SYNC, &schedules.cost_sync, move |_ctx| {
            let sync = sync.clone();
            async move {
                log_report(JOB_COST_SYNC, sync.run().await?);
                Ok::<_, crate::error::Error>(())
            }
        })?;

        let jobs = analytics.clone();
        scheduler.register(JOB_ANOMALY_DETECT, &schedules.anomaly_detect, move |_ctx| {
            let jobs = jobs.clone();
            async move {
                log_report(JOB_ANOMALY_DETECT, jobs.detect_anomalies().await?);
                Ok::<_, crate::error::Error>(())
            }
        })?;

        let jobs = analytics.clone();
        scheduler.register(JOB_FORECAST, &schedules.forecast, move |_ctx| {
            let jobs = jobs.clone();
            async move {
                log_report(JOB_FORECAST, jobs.refresh_forecasts().await?);
                Ok::<_, crate::error::Error>(())
            }
        })?;

        let jobs = analytics.clone();
        scheduler.register(JOB_BUDGET_CHECK, &schedules.budget_check, move |_ctx| {
            let jobs = jobs.clone();
            async move {
                log_report(JOB_BUDGET_CHECK, jobs.check_budgets().await?);
                Ok::<_, crate::error::Error>(())
            }
        })?;

        let jobs = analytics.clone();
        scheduler.register(JOB_RECOMMENDATIONS, &schedules.recommendations, move |_ctx| {
            let jobs = jobs.clone();
            async move {
                log_report(JOB_RECOMMENDATIONS, jobs.refresh_recommendations().await?);
                Ok::<_, crate::error::Error>(())
            }
        })?;

        scheduler.start()?;

        info!(
            jobs = scheduler.job_names().len(),
            providers = ?self.registry.names(),
            "ControlPlaneRuntime started"
        );

        Ok(ControlPlaneRuntime {
            scheduler,
            engine,
            registry: self.registry,
            repositories: repos,
        })
    }
}

/// A running control plane that can be embedded in an application.
///
/// The runtime manages:
/// - the cron scheduler and its five jobs
/// - the remediation engine and its background executions
/// - long-lived providers built from process configuration
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ControlPlaneRuntime {
    scheduler: Scheduler,
    engine: RemediationEngine,
    registry: ProviderRegistry,
    repositories: Repositories,
}

impl ControlPlaneRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ControlPlaneRuntimeBuilder {
        ControlPlaneRuntimeBuilder::new()
    }

    /// The remediation workflow.
    pub fn engine(&self) -> &RemediationEngine {
        &self.engine
    }

    /// The scheduler, for job listing and manual triggers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Long-lived providers.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The repositories the runtime works against.
    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// Run one job immediately and wait for it.
    pub async fn run_job(&self, name: &str) -> Result<RunOutcome> {
        Ok(self.scheduler.run_now(name).await?)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the scheduler (cancelling and draining in-flight runs), waits for
    /// background remediation executions, then closes the registry.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControlPlaneRuntime shutting down...");
        self.scheduler.stop().await;
        self.engine.drain().await;
        self.registry.close_all().await;
        info!("ControlPlaneRuntime shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CostItem, MockProvider};
    use crate::remediation::MockExecutor;
    use chrono::{Duration, Utc};
    use finops_core::CredentialBox;
    use finops_core::model::{
        AwsCredentials, CloudCredentials, CredentialBinding, DateRange, ProviderKind,
    };
    use uuid::Uuid;

    fn runtime_builder(aws: MockProvider) -> (ControlPlaneRuntimeBuilder, Repositories, ProviderFactory) {
        let repos = Repositories::in_memory();
        let factory = ProviderFactory::new(CredentialBox::new("master"))
            .with_aws(move |_| Ok(Box::new(aws.clone()) as Box<dyn CloudProvider>));
        let builder = ControlPlaneRuntime::builder()
            .repositories(repos.clone())
            .factory(factory.clone());
        (builder, repos, factory)
    }

    #[test]
    fn test_build_requires_repositories_and_factory() {
        let err = ControlPlaneRuntime::builder().build().err().unwrap();
        assert!(err.to_string().contains("repositories"));

        let err = ControlPlaneRuntime::builder()
            .repositories(Repositories::in_memory())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("factory"));
    }

    #[tokio::test]
    async fn test_start_registers_jobs_and_rejects_bad_schedule() {
        let (builder, _, _) = runtime_builder(MockProvider::new("aws", ProviderKind::Aws));
        let runtime = builder.build().unwrap().start().await.unwrap();
        let mut names = runtime.scheduler().job_names();
        names.sort();
        assert_eq!(
            names,
            vec![
                JOB_ANOMALY_DETECT,
                JOB_BUDGET_CHECK,
                JOB_COST_SYNC,
                JOB_FORECAST,
                JOB_RECOMMENDATIONS
            ]
        );
        runtime.shutdown().await.unwrap();

        let (builder, _, _) = runtime_builder(MockProvider::new("aws", ProviderKind::Aws));
        let schedules = JobSchedules {
            forecast: "not a cron".into(),
            ..JobSchedules::default()
        };
        assert!(builder.schedules(schedules).build().unwrap().start().await.is_err());
    }

    #[tokio::test]
    async fn test_manual_cost_sync_and_shutdown_closes_registry() {
        let tenant_provider = MockProvider::new("aws", ProviderKind::Aws);
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        tenant_provider
            .set_costs(vec![CostItem {
                date: yesterday,
                amount: 42.0,
                service: Some("EC2".into()),
                account_id: None,
                region: None,
            }])
            .await;
        let (builder, repos, factory) = runtime_builder(tenant_provider);

        let org = Uuid::new_v4();
        let blob = factory
            .seal_credentials(&CloudCredentials::Aws(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
                region: "us-east-1".into(),
                assume_role_arn: None,
                external_id: None,
            }))
            .unwrap();
        repos
            .credentials
            .create(&CredentialBinding::new(org, ProviderKind::Aws, "prod", blob))
            .await
            .unwrap();

        let static_provider = MockProvider::new("aws-static", ProviderKind::Aws);
        let runtime = builder
            .provider(Arc::new(static_provider.clone()))
            .executor(Arc::new(MockExecutor::new(ProviderKind::Aws)))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert_eq!(runtime.run_job(JOB_COST_SYNC).await.unwrap(), RunOutcome::Completed);
        let range = DateRange::new(yesterday, yesterday + Duration::days(1)).unwrap();
        let rows = repos.costs.list(org, range).await.unwrap();
        assert_eq!(rows.len(), 1);

        // ML disabled: analytics jobs complete without doing anything.
        assert_eq!(
            runtime.run_job(JOB_ANOMALY_DETECT).await.unwrap(),
            RunOutcome::Completed
        );
        assert!(runtime.run_job("nope").await.is_err());

        runtime.shutdown().await.unwrap();
        assert!(static_provider.is_closed());
    }
}
