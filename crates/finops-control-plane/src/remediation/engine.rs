// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remediation state machine.
//!
//! Transitions on one action are serialized by a mutex keyed on the action
//! id. The mutex covers the transition and its persistence write only; cloud
//! calls run with it released. A rollback is claimed under the mutex before
//! its cloud call, so at most one rollback per action reaches the executor.
//! Approved actions execute on background tasks
//! tracked by the engine so shutdown can drain them.
//!
//! ```rust,ignore
//! let engine = RemediationEngine::new(repo, credentials, factory)
//!     .with_executor(Arc::new(AwsExecutor::new(http, AwsEndpoints::default())));
//!
//! let action = engine.propose(org_id, request, "alice").await?;
//! let action = engine.approve(org_id, action.id, "bob").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use finops_core::CoreError;
use finops_core::model::{
    AutoApprovalRule, JsonMap, Page, Pagination, ProviderKind, RemediationAction,
    RemediationFilter, RemediationRequest, RemediationStatus, RemediationSummary, RuleConditions,
};
use finops_core::persistence::{CredentialRepository, RemediationRepository};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Executor, RemediationError, Result};
use crate::provider::ProviderFactory;

const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy)]
enum Call {
    Execute,
    Rollback,
}

/// Proposes, approves and executes remediation actions.
#[derive(Clone)]
pub struct RemediationEngine {
    repo: Arc<dyn RemediationRepository>,
    credentials: Arc<dyn CredentialRepository>,
    factory: ProviderFactory,
    executors: Arc<HashMap<ProviderKind, Arc<dyn Executor>>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    rolling_back: Arc<DashSet<Uuid>>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for RemediationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationEngine")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("locked_actions", &self.locks.len())
            .field("rolling_back", &self.rolling_back.len())
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

impl RemediationEngine {
    /// Create an engine with no executors.
    pub fn new(
        repo: Arc<dyn RemediationRepository>,
        credentials: Arc<dyn CredentialRepository>,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            repo,
            credentials,
            factory,
            executors: Arc::new(HashMap::new()),
            locks: Arc::new(DashMap::new()),
            rolling_back: Arc::new(DashSet::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Register the executor for its provider kind, replacing any previous one.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        Arc::make_mut(&mut self.executors).insert(executor.provider(), executor);
        self
    }

    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    fn unlock(&self, id: Uuid, guard: OwnedMutexGuard<()>) {
        drop(guard);
        // Only the map holds the mutex once no guard or waiter is left.
        self.locks.remove_if(&id, |_, m| Arc::strong_count(m) == 1);
    }

    async fn load(&self, organization_id: Uuid, id: Uuid) -> Result<RemediationAction> {
        self.repo
            .get(organization_id, id)
            .await?
            .ok_or(RemediationError::NotFound { entity: "action", id })
    }

    /// Apply one transition under the action's lock and persist it.
    async fn transition<F>(
        &self,
        organization_id: Uuid,
        id: Uuid,
        next: RemediationStatus,
        actor: &str,
        details: &str,
        prepare: F,
    ) -> Result<RemediationAction>
    where
        F: FnOnce(&mut RemediationAction),
    {
        let guard = self.lock(id).await;
        let result = async {
            let mut action = self.load(organization_id, id).await?;
            action.transition(next, actor, details)?;
            prepare(&mut action);
            self.repo.update(&action).await?;
            Ok::<_, RemediationError>(action)
        }
        .await;
        self.unlock(id, guard);
        result
    }

    /// Create an action. The first enabled rule that matches approves it and
    /// schedules execution.
    pub async fn propose(
        &self,
        organization_id: Uuid,
        request: RemediationRequest,
        requested_by: &str,
    ) -> Result<RemediationAction> {
        let mut action = RemediationAction::propose(organization_id, request, requested_by)?;

        let rules = self.repo.active_rules(organization_id).await?;
        if let Some(rule) = rules.iter().find(|r| r.matches(&action)) {
            action.auto_approved = true;
            action.approval_rule = Some(rule.name.clone());
            action.transition(
                RemediationStatus::Approved,
                format!("auto:{}", rule.name),
                format!("matched rule {}", rule.name),
            )?;
        }

        self.repo.create(&action).await?;
        info!(
            tenant_id = %organization_id,
            action_id = %action.id,
            kind = %action.kind,
            status = %action.status,
            auto_approved = action.auto_approved,
            "Remediation proposed"
        );

        if action.status == RemediationStatus::Approved {
            self.spawn_execution(organization_id, action.id);
        }
        Ok(action)
    }

    /// Approve a pending action and schedule execution.
    pub async fn approve(
        &self,
        organization_id: Uuid,
        id: Uuid,
        approved_by: &str,
    ) -> Result<RemediationAction> {
        let action = self
            .transition(organization_id, id, RemediationStatus::Approved, approved_by, "", |_| {})
            .await?;
        info!(tenant_id = %organization_id, action_id = %id, approved_by = %approved_by, "Remediation approved");
        self.spawn_execution(organization_id, id);
        Ok(action)
    }

    /// Reject a pending action, keeping the reason.
    pub async fn reject(
        &self,
        organization_id: Uuid,
        id: Uuid,
        rejected_by: &str,
        reason: &str,
    ) -> Result<RemediationAction> {
        let action = self
            .transition(organization_id, id, RemediationStatus::Rejected, rejected_by, reason, |a| {
                a.failure_reason = Some(reason.to_string());
            })
            .await?;
        info!(tenant_id = %organization_id, action_id = %id, "Remediation rejected");
        Ok(action)
    }

    /// Withdraw a pending or approved action.
    pub async fn cancel(
        &self,
        organization_id: Uuid,
        id: Uuid,
        cancelled_by: &str,
    ) -> Result<RemediationAction> {
        let action = self
            .transition(organization_id, id, RemediationStatus::Cancelled, cancelled_by, "", |_| {})
            .await?;
        info!(tenant_id = %organization_id, action_id = %id, "Remediation cancelled");
        Ok(action)
    }

    /// Run an approved action to completion or failure.
    ///
    /// Executor errors are recorded on the action, which is returned with
    /// status `failed`; only state-machine and persistence errors are
    /// returned as `Err`.
    pub async fn execute(&self, organization_id: Uuid, id: Uuid) -> Result<RemediationAction> {
        let action = self
            .transition(
                organization_id,
                id,
                RemediationStatus::Executing,
                SYSTEM_ACTOR,
                "",
                |_| {},
            )
            .await?;

        let outcome = self.run(&action, Call::Execute).await;

        let guard = self.lock(id).await;
        let result = async {
            let mut action = self.load(organization_id, id).await?;
            match outcome {
                Ok(rollback_data) => {
                    action.rollback_data.extend(rollback_data);
                    action.transition(RemediationStatus::Completed, SYSTEM_ACTOR, "")?;
                }
                Err(e) => {
                    let reason = e.to_string();
                    action.failure_reason = Some(reason.clone());
                    action.transition(RemediationStatus::Failed, SYSTEM_ACTOR, reason)?;
                }
            }
            self.repo.update(&action).await?;
            Ok::<_, RemediationError>(action)
        }
        .await;
        self.unlock(id, guard);
        result
    }

    /// Reverse a completed action. A failed rollback leaves the action
    /// `completed` with a `rollback_failed` audit entry and returns the error.
    pub async fn rollback(
        &self,
        organization_id: Uuid,
        id: Uuid,
        requested_by: &str,
    ) -> Result<RemediationAction> {
        let guard = self.lock(id).await;
        let claimed = self.claim_rollback(organization_id, id).await;
        self.unlock(id, guard);
        let action = claimed?;

        let outcome = self.run(&action, Call::Rollback).await;
        let result = self.finish_rollback(organization_id, id, requested_by, outcome).await;
        self.rolling_back.remove(&id);
        result
    }

    /// Check rollback preconditions and mark the action as rolling back.
    /// Must be called with the action's lock held.
    async fn claim_rollback(&self, organization_id: Uuid, id: Uuid) -> Result<RemediationAction> {
        let action = self.load(organization_id, id).await?;
        if action.status != RemediationStatus::Completed || self.rolling_back.contains(&id) {
            let from = if action.status == RemediationStatus::Completed {
                "rolling_back".to_string()
            } else {
                action.status.to_string()
            };
            return Err(RemediationError::InvalidTransition {
                from,
                to: RemediationStatus::RolledBack.to_string(),
            });
        }
        if action.rollback_data.is_empty() {
            return Err(RemediationError::unsupported(format!(
                "{} action {} has no rollback data",
                action.kind, id
            )));
        }
        self.rolling_back.insert(id);
        Ok(action)
    }

    async fn finish_rollback(
        &self,
        organization_id: Uuid,
        id: Uuid,
        requested_by: &str,
        outcome: Result<JsonMap>,
    ) -> Result<RemediationAction> {
        let guard = self.lock(id).await;
        let result = async {
            let mut action = self.load(organization_id, id).await?;
            match outcome {
                Ok(_) => {
                    action.transition(RemediationStatus::RolledBack, requested_by, "")?;
                    self.repo.update(&action).await?;
                    info!(tenant_id = %organization_id, action_id = %id, "Remediation rolled back");
                    Ok(action)
                }
                Err(e) => {
                    action.add_audit_entry(requested_by, "rollback_failed", e.to_string());
                    self.repo.update(&action).await?;
                    warn!(tenant_id = %organization_id, action_id = %id, error = %e, "Rollback failed");
                    Err::<RemediationAction, _>(e)
                }
            }
        }
        .await;
        self.unlock(id, guard);
        result
    }

    /// Resolve the executor and credentials, then run `call`. Decrypted
    /// credentials live only for the duration of the call.
    async fn run(&self, action: &RemediationAction, call: Call) -> Result<JsonMap> {
        let executor = self.executors.get(&action.provider).ok_or_else(|| {
            RemediationError::unsupported(format!("no executor for provider {}", action.provider))
        })?;
        let binding = self
            .credentials
            .get_by_tenant_and_kind(action.organization_id, action.provider)
            .await?
            .ok_or_else(|| {
                RemediationError::Credentials(format!(
                    "no {} credentials bound for tenant",
                    action.provider
                ))
            })?;
        let credentials = self
            .factory
            .open_credentials(action.provider, &binding.sealed_credentials)?;

        match call {
            Call::Execute => executor.execute(action, &credentials).await,
            Call::Rollback => executor
                .rollback(action, &credentials)
                .await
                .map(|()| JsonMap::new()),
        }
    }

    fn spawn_execution(&self, organization_id: Uuid, id: Uuid) {
        let engine = self.clone();
        self.tracker.spawn(async move {
            match engine.execute(organization_id, id).await {
                Ok(action) if action.status == RemediationStatus::Failed => warn!(
                    tenant_id = %organization_id,
                    action_id = %id,
                    reason = action.failure_reason.as_deref().unwrap_or_default(),
                    "Remediation failed"
                ),
                Ok(_) => info!(tenant_id = %organization_id, action_id = %id, "Remediation completed"),
                Err(e) => error!(tenant_id = %organization_id, action_id = %id, error = %e, "Remediation execution aborted"),
            }
        });
    }

    /// Wait for every background execution scheduled so far.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Look up an action.
    pub async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<RemediationAction> {
        self.load(organization_id, id).await
    }

    /// Filtered page of actions, newest first.
    pub async fn list(
        &self,
        organization_id: Uuid,
        filter: &RemediationFilter,
        page: Pagination,
    ) -> Result<Page<RemediationAction>> {
        Ok(self.repo.list(organization_id, filter, page).await?)
    }

    /// Counts and savings totals.
    pub async fn summary(&self, organization_id: Uuid) -> Result<RemediationSummary> {
        Ok(self.repo.summary(organization_id).await?)
    }

    /// Create an enabled auto-approval rule.
    pub async fn create_rule(
        &self,
        organization_id: Uuid,
        name: &str,
        conditions: RuleConditions,
        created_by: Option<String>,
    ) -> Result<AutoApprovalRule> {
        if name.trim().is_empty() {
            return Err(CoreError::validation("rule name is required").into());
        }
        let mut rule = AutoApprovalRule::new(organization_id, name, conditions);
        rule.created_by = created_by;
        self.repo.create_rule(&rule).await?;
        Ok(rule)
    }

    /// A tenant's rules in creation order.
    pub async fn list_rules(&self, organization_id: Uuid) -> Result<Vec<AutoApprovalRule>> {
        Ok(self.repo.list_rules(organization_id).await?)
    }

    /// Look up a rule.
    pub async fn get_rule(&self, organization_id: Uuid, id: Uuid) -> Result<AutoApprovalRule> {
        self.repo
            .get_rule(organization_id, id)
            .await?
            .ok_or(RemediationError::NotFound { entity: "rule", id })
    }

    /// Replace a rule's name, enabled flag and conditions.
    pub async fn update_rule(&self, rule: &AutoApprovalRule) -> Result<AutoApprovalRule> {
        self.repo.update_rule(rule).await?;
        self.get_rule(rule.organization_id, rule.id).await
    }

    /// Delete a rule.
    pub async fn delete_rule(&self, organization_id: Uuid, id: Uuid) -> Result<()> {
        Ok(self.repo.delete_rule(organization_id, id).await?)
    }
}
