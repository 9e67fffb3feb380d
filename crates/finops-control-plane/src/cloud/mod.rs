// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Thin HTTP clients for the cloud APIs the control plane consumes.
//!
//! These clients speak the wire protocols directly (SigV4-signed AWS JSON,
//! query and REST protocols; Azure Resource Manager with OAuth2 client
//! credentials). The provider and remediation layers translate their results
//! into the canonical model.

pub mod aws;
pub mod azure;

use finops_core::ErrorKind;
use thiserror::Error;

/// Errors raised by the cloud API clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CloudError {
    /// The request could not be sent or timed out.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with an error.
    #[error("{service} returned {status} {code}: {message}")]
    Service {
        /// Service name (e.g. "ec2").
        service: &'static str,
        /// HTTP status.
        status: u16,
        /// Service error code.
        code: String,
        /// Service error message.
        message: String,
    },

    /// Token acquisition or role assumption failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// A bounded wait gave up.
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl CloudError {
    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Upstream
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Result type using CloudError.
pub type Result<T> = std::result::Result<T, CloudError>;

/// Shorten a response body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(256).collect()
}
