// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for finops-core.
//!
//! [`ErrorKind`] is the taxonomy every layer of the control plane maps onto.
//! Higher layers wrap [`CoreError`] and report the same kinds.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Error kinds shared across the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-supplied input violates a constraint. Never retried.
    Validation,
    /// Lookup by id returned no row.
    NotFound,
    /// Uniqueness violation.
    Duplicate,
    /// A cloud or ML call failed.
    Upstream,
    /// The ML client short-circuited.
    CircuitOpen,
    /// The action kind or rollback is not implemented for the provider.
    Unsupported,
    /// Crypto open failure or malformed stored blob.
    Corrupt,
    /// Catch-all.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Duplicate => "duplicate",
            Self::Upstream => "upstream",
            Self::CircuitOpen => "circuit_open",
            Self::Unsupported => "unsupported",
            Self::Corrupt => "corrupt",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors raised by the model, crypto box and repositories.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Input violates a constraint.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity lookup by id found nothing.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name (e.g. "remediation action").
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Uniqueness constraint violated.
    #[error("Duplicate {entity}: {detail}")]
    Duplicate {
        /// Entity name.
        entity: &'static str,
        /// Which key collided.
        detail: String,
    },

    /// A status change outside the allowed transition graph.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A stored blob or JSON column could not be decoded.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Sealing or opening a credential blob failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A query was issued without a tenant scope.
    #[error("Query issued without tenant scope: {0}")]
    MissingTenant(&'static str),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for [`CoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`CoreError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::Corrupt(_) | Self::Crypto(CryptoError::Corrupt) => ErrorKind::Corrupt,
            Self::Crypto(_) | Self::MissingTenant(_) | Self::Database(_) | Self::Json(_) => {
                ErrorKind::Internal
            }
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
