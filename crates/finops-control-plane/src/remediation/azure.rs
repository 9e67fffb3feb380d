// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure remediation executor. No Azure mutations are implemented; every
//! action fails as unsupported and the engine records it as failed.

use async_trait::async_trait;
use finops_core::model::{CloudCredentials, JsonMap, ProviderKind, RemediationAction};

use super::{Executor, RemediationError, Result};

/// Placeholder executor for Azure actions.
#[derive(Debug, Clone, Default)]
pub struct AzureExecutor;

impl AzureExecutor {
    /// Create the executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for AzureExecutor {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn execute(
        &self,
        action: &RemediationAction,
        _credentials: &CloudCredentials,
    ) -> Result<JsonMap> {
        Err(RemediationError::unsupported(format!(
            "Azure remediation kind {}",
            action.kind
        )))
    }

    async fn rollback(
        &self,
        action: &RemediationAction,
        _credentials: &CloudCredentials,
    ) -> Result<()> {
        Err(RemediationError::unsupported(format!(
            "rollback of {} on Azure",
            action.kind
        )))
    }
}
