// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the control plane.

use finops_core::{CoreError, ErrorKind};
use thiserror::Error;

use crate::cloud::CloudError;
use crate::ml::MlError;
use crate::notification::NotificationError;
use crate::provider::ProviderError;
use crate::remediation::RemediationError;
use crate::scheduler::SchedulerError;

/// Control plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Persistence, validation or crypto failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Provider construction or call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Cloud API call failed.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// ML sidecar call failed.
    #[error(transparent)]
    Ml(#[from] MlError),

    /// Remediation workflow failed.
    #[error(transparent)]
    Remediation(#[from] RemediationError),

    /// One or more notification channels failed.
    #[error(transparent)]
    Notification(#[from] NotificationError),

    /// Scheduler registration or dispatch failed.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Taxonomy kind of the underlying failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Validation,
            Self::Core(e) => e.kind(),
            Self::Provider(e) => e.kind(),
            Self::Cloud(e) => e.kind(),
            Self::Ml(e) => e.kind(),
            Self::Remediation(e) => e.kind(),
            Self::Notification(e) => e.kind(),
            Self::Scheduler(e) => e.kind(),
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Result type using the control plane [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_delegates() {
        let err: Error = MlError::CircuitOpen.into();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);

        let err: Error = CoreError::validation("bad").into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = Error::Other("boom".into());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
