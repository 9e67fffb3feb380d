// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock executor for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use finops_core::model::{CloudCredentials, JsonMap, ProviderKind, RemediationAction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Executor, RemediationError, Result};

/// Records calls and returns canned results.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    provider: ProviderKind,
    rollback_data: JsonMap,
    executed: Arc<Mutex<Vec<Uuid>>>,
    rolled_back: Arc<Mutex<Vec<Uuid>>>,
    latency: Duration,
    /// Fail every call.
    pub fail_by_default: bool,
}

impl MockExecutor {
    /// Executor that succeeds with empty rollback data.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            rollback_data: JsonMap::new(),
            executed: Arc::new(Mutex::new(Vec::new())),
            rolled_back: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            fail_by_default: false,
        }
    }

    /// Executor whose calls all fail.
    pub fn failing(provider: ProviderKind) -> Self {
        Self {
            fail_by_default: true,
            ..Self::new(provider)
        }
    }

    /// Return this rollback data from `execute`.
    pub fn with_rollback_data(mut self, data: JsonMap) -> Self {
        self.rollback_data = data;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Ids of executed actions, in call order.
    pub async fn executed(&self) -> Vec<Uuid> {
        self.executed.lock().await.clone()
    }

    /// Ids of rolled back actions, in call order.
    pub async fn rolled_back(&self) -> Vec<Uuid> {
        self.rolled_back.lock().await.clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn execute(
        &self,
        action: &RemediationAction,
        _credentials: &CloudCredentials,
    ) -> Result<JsonMap> {
        self.executed.lock().await.push(action.id);
        tokio::time::sleep(self.latency).await;
        if self.fail_by_default {
            return Err(RemediationError::Upstream("Mock failure".to_string()));
        }
        Ok(self.rollback_data.clone())
    }

    async fn rollback(
        &self,
        action: &RemediationAction,
        _credentials: &CloudCredentials,
    ) -> Result<()> {
        self.rolled_back.lock().await.push(action.id);
        tokio::time::sleep(self.latency).await;
        if self.fail_by_default {
            return Err(RemediationError::Upstream("Mock rollback failure".to_string()));
        }
        Ok(())
    }
}
