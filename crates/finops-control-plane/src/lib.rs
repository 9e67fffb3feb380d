// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FinOps Control Plane - Ingestion, Analytics and Remediation
//!
//! This crate runs the moving parts of the control plane on top of
//! `finops-core`: it pulls costs from cloud providers on a schedule, feeds
//! history to the ML sidecar, evaluates budgets, and drives remediation
//! actions through an audited approval workflow.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     ControlPlaneRuntime                          │
//! │   scheduler ── cost-sync ── anomaly-detect ── forecast ──        │
//! │   budget-check ── recommendations ── RemediationEngine           │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                    │                      │
//!        ▼                    ▼                      ▼
//! ┌──────────────┐   ┌────────────────┐   ┌─────────────────────┐
//! │ AWS / Azure  │   │  ML sidecar    │   │ Slack / SMTP /      │
//! │ (providers,  │   │  (breaker +    │   │ webhooks            │
//! │  executors)  │   │   cache)       │   │                     │
//! └──────────────┘   └────────────────┘   └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Top-level error type
//! - [`cloud`]: Signed HTTP clients for AWS and Azure APIs
//! - [`provider`]: Cost and recommendation providers, factory and registry
//! - [`ml`]: ML sidecar client with circuit breaker and forecast cache
//! - [`scheduler`]: Cron-driven job scheduler
//! - [`ingestion`]: The cost-sync job
//! - [`jobs`]: Anomaly, forecast, budget and recommendation jobs
//! - [`remediation`]: Remediation engine and per-provider executors
//! - [`notification`]: Slack, email and webhook delivery
//! - [`runtime`]: Embeddable runtime wiring it all together

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for control plane operations.
pub mod error;

/// HTTP clients for cloud provider APIs.
pub mod cloud;

/// Provider abstraction over cloud billing APIs.
pub mod provider;

/// ML sidecar client.
pub mod ml;

/// Cron scheduler for background jobs.
pub mod scheduler;

/// Cost ingestion.
pub mod ingestion;

/// Scheduled analytics jobs.
pub mod jobs;

/// Remediation workflow.
pub mod remediation;

/// Outbound notifications.
pub mod notification;

/// Embeddable runtime.
pub mod runtime;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::ControlPlaneRuntime;
