// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remediation workflow: propose, approve, execute and roll back cloud
//! mutations under an audited state machine.
//!
//! The [`engine::RemediationEngine`] owns the state machine and persistence.
//! Provider-specific work is delegated to an [`Executor`] per provider kind;
//! executors receive decrypted credentials for the duration of one call and
//! never see the sealed blob.

pub mod aws;
pub mod azure;
pub mod engine;
pub mod mock;

use async_trait::async_trait;
use finops_core::model::{CloudCredentials, JsonMap, ProviderKind, RemediationAction};
use finops_core::{CoreError, ErrorKind};
use thiserror::Error;
use uuid::Uuid;

use crate::cloud::CloudError;
use crate::provider::ProviderError;

pub use aws::AwsExecutor;
pub use azure::AzureExecutor;
pub use engine::RemediationEngine;
pub use mock::MockExecutor;

/// Remediation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemediationError {
    /// No action or rule with this id for the tenant.
    #[error("Remediation {entity} not found: {id}")]
    NotFound {
        /// "action" or "rule".
        entity: &'static str,
        /// The id looked up.
        id: Uuid,
    },

    /// The requested status change is not an edge of the graph.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The action kind or its rollback is not implemented for the provider.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A cloud call failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Credentials are missing, unreadable or rejected.
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Persistence or validation failure.
    #[error(transparent)]
    Core(CoreError),
}

impl RemediationError {
    /// Taxonomy kind. Credential problems, including corrupt blobs, surface
    /// as upstream failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Upstream(_) | Self::Credentials(_) => ErrorKind::Upstream,
            Self::Core(e) => e.kind(),
        }
    }

    /// Shorthand for [`RemediationError::Unsupported`].
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }
}

impl From<CoreError> for RemediationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            other => Self::Core(other),
        }
    }
}

impl From<CloudError> for RemediationError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::Auth(message) => Self::Credentials(message),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<ProviderError> for RemediationError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnsupportedProvider(kind) => {
                Self::Unsupported(format!("no provider implementation for {}", kind))
            }
            ProviderError::Credentials(message) => Self::Credentials(message),
            ProviderError::Corrupt(message) => Self::Credentials(message),
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// Result type for remediation operations.
pub type Result<T> = std::result::Result<T, RemediationError>;

/// Performs remediation actions against one cloud.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Provider kind this executor handles.
    fn provider(&self) -> ProviderKind;

    /// Perform the action. Returns rollback data to merge into the action.
    async fn execute(
        &self,
        action: &RemediationAction,
        credentials: &CloudCredentials,
    ) -> Result<JsonMap>;

    /// Reverse a completed action using its rollback data.
    async fn rollback(
        &self,
        action: &RemediationAction,
        credentials: &CloudCredentials,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: RemediationError = CoreError::InvalidTransition {
            from: "completed".into(),
            to: "approved".into(),
        }
        .into();
        assert!(matches!(err, RemediationError::InvalidTransition { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: RemediationError = ProviderError::Corrupt("bad blob".into()).into();
        assert_eq!(err.kind(), ErrorKind::Upstream);

        let err: RemediationError = CloudError::Auth("expired".into()).into();
        assert!(matches!(err, RemediationError::Credentials(_)));

        let err = RemediationError::unsupported("rollback of terminate_instance");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
