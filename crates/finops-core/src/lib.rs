// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FinOps Core - Canonical Model and Persistence
//!
//! This crate holds everything the control plane agrees on independent of any
//! cloud provider: the tenant-scoped data model, the credential box that seals
//! provider secrets at rest, and the repositories that store it all.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    finops-control-plane                          │
//! │   (providers, scheduler, ML client, remediation, notifications)  │
//! └──────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      finops-core (this crate)                    │
//! │   model ── crypto ── persistence::{postgres, memory}             │
//! └──────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │ PostgreSQL  │
//!                        └─────────────┘
//! ```
//!
//! # Tenancy
//!
//! Every entity except [`model::Organization`] belongs to exactly one
//! organization. Repository calls take the organization id explicitly and a
//! nil id fails with [`CoreError::MissingTenant`] before any query runs.
//!
//! # Cost Records
//!
//! A [`model::CostRecord`] is identified by its natural key
//! `(organization, date, provider, service, account, region, resource)`.
//! Re-ingesting a record with the same key updates its amount in place, so
//! repeated syncs of the same window are idempotent.
//!
//! # Remediation State Machine
//!
//! ```text
//! pending_approval ──► approved ──► executing ──► completed ──► rolled_back
//!        │                │              │
//!        ├──► rejected    └──► cancelled └──► failed
//!        └──► cancelled
//! ```
//!
//! Every transition appends an audit entry whose action is the new status.
//!
//! # Credentials
//!
//! Provider secrets are serialized to JSON and sealed with AES-256-GCM under a
//! key derived from the master key (see [`crypto`]). Sealed blobs are only
//! loaded on the paths that build provider clients and are never serialized.
//!
//! # Modules
//!
//! - [`model`] - Entities, enumerations and pure aggregation helpers
//! - [`crypto`] - Credential sealing
//! - [`persistence`] - Repository traits with PostgreSQL and in-memory backends
//! - [`migrations`] - Embedded schema
//! - [`error`] - Error type and kinds

#![deny(missing_docs)]

/// Credential sealing with AES-256-GCM.
pub mod crypto;

/// Error types.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Canonical data model.
pub mod model;

/// Repository traits and backends.
pub mod persistence;

pub use crypto::{CredentialBox, CryptoError};
pub use error::{CoreError, ErrorKind, Result};
