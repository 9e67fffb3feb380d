// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FinOps Control Plane - Scheduler and Remediation Server
//!
//! A background service responsible for:
//! - Cost ingestion from every bound cloud account
//! - Anomaly detection and forecasting through the ML sidecar
//! - Budget evaluation and alerting
//! - Remediation execution

use std::sync::Arc;

use finops_control_plane::cloud::aws::AwsEndpoints;
use finops_control_plane::cloud::azure::AzureEndpoints;
use finops_control_plane::config::Config;
use finops_control_plane::jobs::Repositories;
use finops_control_plane::ml::MlClient;
use finops_control_plane::notification::NotificationService;
use finops_control_plane::provider::ProviderFactory;
use finops_control_plane::provider::aws::AwsProvider;
use finops_control_plane::provider::azure::AzureProvider;
use finops_control_plane::remediation::{AwsExecutor, AzureExecutor};
use finops_control_plane::runtime::ControlPlaneRuntime;
use finops_core::CredentialBox;
use finops_core::model::CloudCredentials;
use tracing::{info, warn};

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finops_control_plane=info,finops_core=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        host = %config.server_host,
        port = config.server_port,
        ml_enabled = config.ml.enabled,
        aws_enabled = config.aws.enabled,
        azure_enabled = config.azure.enabled,
        "Starting FinOps control plane"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .max_lifetime(config.database.max_lifetime)
        .connect(&config.database.connection_url())
        .await?;

    info!("Connected to database");

    finops_core::migrations::run_postgres(&pool).await?;

    info!("Database migrations applied");

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let factory = ProviderFactory::new(CredentialBox::new(config.encryption_key.clone()))
        .with_aws(AwsProvider::constructor(http.clone(), AwsEndpoints::default()))
        .with_azure(AzureProvider::constructor(http.clone(), AzureEndpoints::default()));

    let ml = MlClient::new(config.ml.clone())?;
    let notifier = NotificationService::new(config.notifications.clone())?;
    info!(channels = ?notifier.channels(), "Notification channels configured");

    let mut builder = ControlPlaneRuntime::builder()
        .repositories(Repositories::postgres(pool))
        .factory(factory.clone())
        .ml(ml)
        .notifier(notifier)
        .executor(Arc::new(AwsExecutor::new(http.clone(), AwsEndpoints::default())))
        .executor(Arc::new(AzureExecutor::new()))
        .schedules(config.schedules.clone());

    // Static providers from process configuration
    if config.aws.enabled {
        match config.aws.credentials() {
            Some(creds) => match factory.from_credentials(CloudCredentials::Aws(creds)) {
                Ok(provider) => builder = builder.provider(Arc::from(provider)),
                Err(e) => warn!(error = %e, "AWS provider not registered"),
            },
            None => warn!("AWS enabled but AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY are not set"),
        }
    }
    if config.azure.enabled {
        match factory.from_credentials(CloudCredentials::Azure(config.azure.credentials())) {
            Ok(provider) => builder = builder.provider(Arc::from(provider)),
            Err(e) => warn!(error = %e, "Azure provider not registered"),
        }
    }

    // Start the runtime
    let runtime = builder.build()?.start().await?;

    for job in runtime.scheduler().jobs() {
        info!(job = %job.name, schedule = %job.schedule, next_run = ?job.next_run, "Job scheduled");
    }
    info!("FinOps control plane ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("FinOps control plane shut down");

    Ok(())
}
