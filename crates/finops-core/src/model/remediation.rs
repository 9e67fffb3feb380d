// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remediation actions, their status graph, audit trail and auto-approval
//! rules.
//!
//! ```text
//!                  +-------- reject -------> rejected
//!                  |
//! (proposed) --> pending_approval --approve--> approved --execute--> executing
//!                  |                              |                     |
//!                  +----cancel---> cancelled      +--cancel--> cancelled|
//!                                                                       +--ok---> completed --rollback--> rolled_back
//!                                                                       +--err--> failed
//! ```
//!
//! [`RemediationAction::transition`] is the only way the status changes, and it
//! appends exactly one [`AuditEntry`] per change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, ProviderKind};
use crate::error::CoreError;

/// JSON object used for state snapshots and rollback data.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

text_enum! {
    /// Cloud mutation a remediation action performs.
    pub enum RemediationKind {
        /// Change an instance type.
        ResizeInstance => "resize_instance",
        /// Stop an instance.
        StopInstance => "stop_instance",
        /// Terminate an instance. Not reversible.
        TerminateInstance => "terminate_instance",
        /// Snapshot then delete a volume. Not reversible.
        DeleteVolume => "delete_volume",
        /// Move a volume to a cheaper storage type.
        UpgradeStorage => "upgrade_storage",
        /// Release an unattached elastic IP.
        ReleaseElasticIp => "release_elastic_ip",
        /// Delete a snapshot. Not reversible.
        DeleteSnapshot => "delete_snapshot",
        /// Put a bucket lifecycle configuration.
        ApplyLifecyclePolicy => "apply_lifecycle_policy",
        /// Generic rightsizing follow-up.
        Rightsizing => "rightsizing",
        /// Generic cleanup follow-up.
        Cleanup => "cleanup",
    }
}

text_enum! {
    /// Risk of executing an action.
    pub enum Risk {
        /// Safe to automate.
        Low => "low",
        /// Needs a look.
        Medium => "medium",
        /// Likely user-visible.
        High => "high",
        /// Destructive.
        Critical => "critical",
    }
}

text_enum! {
    /// Lifecycle status of a remediation action.
    pub enum RemediationStatus {
        /// Waiting for a human or rule.
        PendingApproval => "pending_approval",
        /// Approved, execution scheduled.
        Approved => "approved",
        /// Rejected by a reviewer.
        Rejected => "rejected",
        /// Executor running.
        Executing => "executing",
        /// Executor succeeded.
        Completed => "completed",
        /// Executor failed.
        Failed => "failed",
        /// Reverted after completion.
        RolledBack => "rolled_back",
        /// Withdrawn before execution.
        Cancelled => "cancelled",
    }
}

impl RemediationStatus {
    /// Whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(self, next: RemediationStatus) -> bool {
        use RemediationStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Cancelled)
                | (Approved, Executing)
                | (Approved, Cancelled)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, RolledBack)
        )
    }

    /// No outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Failed | Self::RolledBack | Self::Cancelled
        )
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened (UTC).
    pub timestamp: DateTime<Utc>,
    /// Who did it: a user, `system`, or `auto:<rule>`.
    pub actor: String,
    /// Verb, e.g. `approved`.
    pub action: String,
    /// Free-form details.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// Input for proposing a remediation action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationRequest {
    /// Source recommendation, if any.
    pub recommendation_id: Option<Uuid>,
    /// What to do. Required.
    pub kind: Option<RemediationKind>,
    /// Which cloud. Required.
    pub provider: Option<ProviderKind>,
    /// Target account.
    pub account_id: String,
    /// Target region.
    pub region: String,
    /// Target resource. Required.
    pub resource_id: String,
    /// Target resource type.
    pub resource_type: String,
    /// Human description.
    pub description: String,
    /// Snapshot of the current configuration.
    pub current_state: JsonMap,
    /// Parameters for the executor.
    pub desired_state: JsonMap,
    /// Estimated monthly savings.
    pub estimated_savings: f64,
    /// Currency of the savings.
    pub currency: Currency,
    /// Risk level. Defaults to medium.
    pub risk: Option<Risk>,
}

/// A proposed mutation of cloud state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Weak reference to the source recommendation.
    pub recommendation_id: Option<Uuid>,
    /// What to do.
    pub kind: RemediationKind,
    /// Current status.
    pub status: RemediationStatus,
    /// Which cloud.
    pub provider: ProviderKind,
    /// Target account.
    pub account_id: String,
    /// Target region.
    pub region: String,
    /// Target resource.
    pub resource_id: String,
    /// Target resource type.
    pub resource_type: String,
    /// Human description.
    pub description: String,
    /// Snapshot of the current configuration.
    pub current_state: JsonMap,
    /// Parameters for the executor.
    pub desired_state: JsonMap,
    /// Estimated monthly savings.
    pub estimated_savings: f64,
    /// Currency of the savings.
    pub currency: Currency,
    /// Risk level.
    pub risk: Risk,
    /// Approved by a rule rather than a person.
    pub auto_approved: bool,
    /// Name of the approving rule.
    pub approval_rule: Option<String>,
    /// Who proposed it.
    pub requested_by: String,
    /// Who approved it.
    pub approved_by: Option<String>,
    /// When it was approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// When execution started.
    pub executed_at: Option<DateTime<Utc>>,
    /// When execution completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When it was rolled back.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// First error that stopped it, or the rejection reason.
    pub failure_reason: Option<String>,
    /// Information needed to reverse the action.
    pub rollback_data: JsonMap,
    /// Audit trail, oldest first.
    pub audit_log: Vec<AuditEntry>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl RemediationAction {
    /// Build a `pending_approval` action from a request, recording the
    /// `proposed` audit entry.
    pub fn propose(
        organization_id: Uuid,
        request: RemediationRequest,
        requested_by: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let kind = request
            .kind
            .ok_or_else(|| CoreError::validation("kind is required"))?;
        let provider = request
            .provider
            .ok_or_else(|| CoreError::validation("provider is required"))?;
        if request.resource_id.trim().is_empty() {
            return Err(CoreError::validation("resource_id is required"));
        }
        if !request.estimated_savings.is_finite() || request.estimated_savings < 0.0 {
            return Err(CoreError::validation(
                "estimated_savings must be a non-negative number",
            ));
        }

        let requested_by = requested_by.into();
        let now = Utc::now();
        let mut action = Self {
            id: Uuid::new_v4(),
            organization_id,
            recommendation_id: request.recommendation_id,
            kind,
            status: RemediationStatus::PendingApproval,
            provider,
            account_id: request.account_id,
            region: request.region,
            resource_id: request.resource_id,
            resource_type: request.resource_type,
            description: request.description,
            current_state: request.current_state,
            desired_state: request.desired_state,
            estimated_savings: request.estimated_savings,
            currency: request.currency,
            risk: request.risk.unwrap_or(Risk::Medium),
            auto_approved: false,
            approval_rule: None,
            requested_by: requested_by.clone(),
            approved_by: None,
            approved_at: None,
            executed_at: None,
            completed_at: None,
            rolled_back_at: None,
            failure_reason: None,
            rollback_data: JsonMap::new(),
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        action.add_audit_entry(requested_by, "proposed", "");
        Ok(action)
    }

    /// Append an audit entry without changing status.
    pub fn add_audit_entry(
        &mut self,
        actor: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) {
        let timestamp = Utc::now();
        self.audit_log.push(AuditEntry {
            timestamp,
            actor: actor.into(),
            action: action.into(),
            details: details.into(),
        });
        self.updated_at = timestamp;
    }

    /// Move to `next`, stamping the matching timestamp and appending one audit
    /// entry whose verb is the new status.
    pub fn transition(
        &mut self,
        next: RemediationStatus,
        actor: impl Into<String>,
        details: impl Into<String>,
    ) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let actor = actor.into();
        let now = Utc::now();
        match next {
            RemediationStatus::Approved => {
                self.approved_by = Some(actor.clone());
                self.approved_at = Some(now);
            }
            RemediationStatus::Executing => self.executed_at = Some(now),
            RemediationStatus::Completed | RemediationStatus::Failed => {
                self.completed_at = Some(now)
            }
            RemediationStatus::RolledBack => self.rolled_back_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.add_audit_entry(actor, next.as_str(), details);
        Ok(())
    }

    /// Lower-cased `account_id + resource_id`, matched against environment
    /// tokens.
    pub fn environment_haystack(&self) -> String {
        format!("{}{}", self.account_id, self.resource_id).to_lowercase()
    }
}

/// Conditions of an auto-approval rule. Empty conditions are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConditions {
    /// Savings cap; ignored when `<= 0`.
    pub max_savings: f64,
    /// Allowed action kinds.
    pub allowed_kinds: Vec<RemediationKind>,
    /// Allowed risk levels.
    pub allowed_risks: Vec<Risk>,
    /// Case-insensitive substrings of `account_id + resource_id`.
    pub allowed_environments: Vec<String>,
}

impl RuleConditions {
    /// Conjunction of every non-empty condition.
    pub fn matches(&self, action: &RemediationAction) -> bool {
        if self.max_savings > 0.0 && action.estimated_savings > self.max_savings {
            return false;
        }
        if !self.allowed_kinds.is_empty() && !self.allowed_kinds.contains(&action.kind) {
            return false;
        }
        if !self.allowed_risks.is_empty() && !self.allowed_risks.contains(&action.risk) {
            return false;
        }
        if !self.allowed_environments.is_empty() {
            let haystack = action.environment_haystack();
            let found = self
                .allowed_environments
                .iter()
                .any(|token| haystack.contains(&token.to_lowercase()));
            if !found {
                return false;
            }
        }
        true
    }
}

/// A tenant's auto-approval predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApprovalRule {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Unique name; recorded on approved actions.
    pub name: String,
    /// Disabled rules never match.
    pub enabled: bool,
    /// Conjunctive conditions.
    pub conditions: RuleConditions,
    /// Who created the rule.
    pub created_by: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AutoApprovalRule {
    /// An enabled rule.
    pub fn new(organization_id: Uuid, name: impl Into<String>, conditions: RuleConditions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            enabled: true,
            conditions,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enabled and every condition satisfied.
    pub fn matches(&self, action: &RemediationAction) -> bool {
        self.enabled && self.conditions.matches(action)
    }
}

/// List filter for remediation actions. Empty vectors match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationFilter {
    /// Restrict to these kinds.
    pub kinds: Vec<RemediationKind>,
    /// Restrict to these statuses.
    pub statuses: Vec<RemediationStatus>,
    /// Restrict to these risks.
    pub risks: Vec<Risk>,
    /// Restrict to these providers.
    pub providers: Vec<ProviderKind>,
}

impl RemediationFilter {
    /// In-memory evaluation of the filter.
    pub fn accepts(&self, action: &RemediationAction) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&action.kind))
            && (self.statuses.is_empty() || self.statuses.contains(&action.status))
            && (self.risks.is_empty() || self.risks.contains(&action.risk))
            && (self.providers.is_empty() || self.providers.contains(&action.provider))
    }
}

/// Aggregate view of a tenant's remediation actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemediationSummary {
    /// All actions.
    pub total: i64,
    /// In `pending_approval`.
    pub pending: i64,
    /// In `approved`.
    pub approved: i64,
    /// In `completed`.
    pub completed: i64,
    /// In `failed`.
    pub failed: i64,
    /// Savings of completed actions.
    pub total_savings_realized: f64,
    /// Savings of pending or approved actions.
    pub total_savings_pending: f64,
    /// Counts per kind.
    pub by_kind: BTreeMap<RemediationKind, i64>,
    /// Counts per status.
    pub by_status: BTreeMap<RemediationStatus, i64>,
    /// Counts per risk.
    pub by_risk: BTreeMap<Risk, i64>,
    /// Currency of the savings totals.
    pub currency: Currency,
}

impl RemediationSummary {
    /// Fold a set of actions into a summary.
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a RemediationAction>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            summary.record(action.kind, action.status, action.risk, action.estimated_savings, 1);
        }
        summary
    }

    /// Add `count` actions sharing the given attributes.
    pub fn record(
        &mut self,
        kind: RemediationKind,
        status: RemediationStatus,
        risk: Risk,
        savings: f64,
        count: i64,
    ) {
        self.total += count;
        *self.by_kind.entry(kind).or_default() += count;
        *self.by_status.entry(status).or_default() += count;
        *self.by_risk.entry(risk).or_default() += count;
        match status {
            RemediationStatus::PendingApproval => {
                self.pending += count;
                self.total_savings_pending += savings;
            }
            RemediationStatus::Approved => {
                self.approved += count;
                self.total_savings_pending += savings;
            }
            RemediationStatus::Completed => {
                self.completed += count;
                self.total_savings_realized += savings;
            }
            RemediationStatus::Failed => self.failed += count,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: RemediationKind, risk: Risk, savings: f64) -> RemediationRequest {
        RemediationRequest {
            kind: Some(kind),
            provider: Some(ProviderKind::Aws),
            account_id: "123456789012".into(),
            region: "eu-west-2".into(),
            resource_id: "i-0abc".into(),
            estimated_savings: savings,
            risk: Some(risk),
            ..Default::default()
        }
    }

    fn action(kind: RemediationKind, risk: Risk, savings: f64) -> RemediationAction {
        RemediationAction::propose(Uuid::new_v4(), request(kind, risk, savings), "alice").unwrap()
    }

    #[test]
    fn test_transition_graph() {
        use RemediationStatus::*;
        let allowed = [
            (PendingApproval, Approved),
            (PendingApproval, Rejected),
            (PendingApproval, Cancelled),
            (Approved, Executing),
            (Approved, Cancelled),
            (Executing, Completed),
            (Executing, Failed),
            (Completed, RolledBack),
        ];
        for from in RemediationStatus::ALL {
            for to in RemediationStatus::ALL {
                assert_eq!(
                    from.can_transition_to(*to),
                    allowed.contains(&(*from, *to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for from in RemediationStatus::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(RemediationStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_propose_validates() {
        let mut req = request(RemediationKind::StopInstance, Risk::Low, 1.0);
        req.resource_id = "  ".into();
        assert!(RemediationAction::propose(Uuid::new_v4(), req, "a").is_err());

        let mut req = request(RemediationKind::StopInstance, Risk::Low, 1.0);
        req.kind = None;
        assert!(RemediationAction::propose(Uuid::new_v4(), req, "a").is_err());

        let req = request(RemediationKind::StopInstance, Risk::Low, -1.0);
        assert!(RemediationAction::propose(Uuid::new_v4(), req, "a").is_err());
    }

    #[test]
    fn test_transitions_append_one_audit_entry_each() {
        let mut a = action(RemediationKind::ResizeInstance, Risk::Low, 40.0);
        assert_eq!(a.status, RemediationStatus::PendingApproval);
        assert_eq!(a.audit_log.len(), 1);

        a.transition(RemediationStatus::Approved, "alice", "").unwrap();
        a.transition(RemediationStatus::Executing, "system", "").unwrap();
        a.transition(RemediationStatus::Completed, "system", "").unwrap();
        a.transition(RemediationStatus::RolledBack, "bob", "").unwrap();

        let verbs: Vec<_> = a.audit_log.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            verbs,
            vec!["proposed", "approved", "executing", "completed", "rolled_back"]
        );
        assert_eq!(a.approved_by.as_deref(), Some("alice"));
        assert!(a.executed_at.is_some());
        assert!(a.completed_at.is_some());
        assert!(a.rolled_back_at.is_some());
    }

    #[test]
    fn test_invalid_transition_leaves_action_untouched() {
        let mut a = action(RemediationKind::ResizeInstance, Risk::Low, 40.0);
        let err = a
            .transition(RemediationStatus::Completed, "x", "")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(a.status, RemediationStatus::PendingApproval);
        assert_eq!(a.audit_log.len(), 1);
    }

    #[test]
    fn test_rule_conjunctivity() {
        let rule = AutoApprovalRule::new(
            Uuid::new_v4(),
            "small-resizes",
            RuleConditions {
                max_savings: 50.0,
                allowed_kinds: vec![RemediationKind::ResizeInstance],
                allowed_risks: vec![Risk::Low],
                allowed_environments: vec![],
            },
        );
        assert!(rule.matches(&action(RemediationKind::ResizeInstance, Risk::Low, 40.0)));
        assert!(rule.matches(&action(RemediationKind::ResizeInstance, Risk::Low, 50.0)));
        assert!(!rule.matches(&action(RemediationKind::ResizeInstance, Risk::Low, 60.0)));
        assert!(!rule.matches(&action(RemediationKind::ResizeInstance, Risk::Medium, 40.0)));
        assert!(!rule.matches(&action(RemediationKind::StopInstance, Risk::Low, 40.0)));
    }

    #[test]
    fn test_empty_conditions_are_wildcards() {
        let mut rule = AutoApprovalRule::new(Uuid::new_v4(), "any", RuleConditions::default());
        assert!(rule.matches(&action(RemediationKind::TerminateInstance, Risk::Critical, 1e6)));
        rule.enabled = false;
        assert!(!rule.matches(&action(RemediationKind::TerminateInstance, Risk::Critical, 1.0)));
    }

    #[test]
    fn test_environment_tokens_case_insensitive() {
        let conditions = RuleConditions {
            allowed_environments: vec!["DEV".into(), "staging".into()],
            ..Default::default()
        };
        let mut a = action(RemediationKind::StopInstance, Risk::Low, 1.0);
        assert!(!conditions.matches(&a));
        a.resource_id = "i-dev-0abc".into();
        assert!(conditions.matches(&a));
        a.resource_id = "i-0abc".into();
        a.account_id = "Staging-Account".into();
        assert!(conditions.matches(&a));
    }

    #[test]
    fn test_filter_and_summary() {
        let mut done = action(RemediationKind::ResizeInstance, Risk::Low, 40.0);
        done.transition(RemediationStatus::Approved, "a", "").unwrap();
        done.transition(RemediationStatus::Executing, "s", "").unwrap();
        done.transition(RemediationStatus::Completed, "s", "").unwrap();
        let pending = action(RemediationKind::DeleteVolume, Risk::High, 15.0);

        let filter = RemediationFilter {
            statuses: vec![RemediationStatus::Completed],
            ..Default::default()
        };
        assert!(filter.accepts(&done));
        assert!(!filter.accepts(&pending));

        let summary = RemediationSummary::from_actions([&done, &pending]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.total_savings_realized, 40.0);
        assert_eq!(summary.total_savings_pending, 15.0);
        assert_eq!(summary.by_kind[&RemediationKind::DeleteVolume], 1);
        assert_eq!(summary.by_risk[&Risk::Low], 1);
    }
}
