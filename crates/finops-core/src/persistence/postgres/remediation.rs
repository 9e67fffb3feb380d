// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remediation actions and auto-approval rules.
//!
//! `rollback_data` and `audit_log` are JSONB. The audit log is rewritten as a
//! whole on every update; the engine only ever appends to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{expect_row, map_unique, parse_column};
use crate::error::CoreError;
use crate::model::{
    AuditEntry, AutoApprovalRule, JsonMap, Page, Pagination, RemediationAction,
    RemediationFilter, RemediationSummary, RuleConditions,
};
use crate::persistence::{RemediationRepository, require_tenant};

/// PostgreSQL-backed [`RemediationRepository`].
#[derive(Clone)]
pub struct PostgresRemediationRepository {
    pool: PgPool,
}

impl PostgresRemediationRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    organization_id: Uuid,
    recommendation_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    kind: String,
    status: String,
    provider: String,
    account_id: String,
    region: String,
    resource_id: String,
    resource_type: String,
    description: String,
    current_state: Json<JsonMap>,
    desired_state: Json<JsonMap>,
    estimated_savings: f64,
    currency: String,
    risk: String,
    auto_approved: bool,
    approval_rule: Option<String>,
    requested_by: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    executed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    rolled_back_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    rollback_data: Json<JsonMap>,
    audit_log: Json<Vec<AuditEntry>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for RemediationAction {
    type Error = CoreError;

    fn try_from(row: ActionRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            recommendation_id: row.recommendation_id,
            kind: parse_column("type", &row.kind)?,
            status: parse_column("status", &row.status)?,
            provider: parse_column("provider", &row.provider)?,
            account_id: row.account_id,
            region: row.region,
            resource_id: row.resource_id,
            resource_type: row.resource_type,
            description: row.description,
            current_state: row.current_state.0,
            desired_state: row.desired_state.0,
            estimated_savings: row.estimated_savings,
            currency: parse_column("currency", &row.currency)?,
            risk: parse_column("risk", &row.risk)?,
            auto_approved: row.auto_approved,
            approval_rule: row.approval_rule,
            requested_by: row.requested_by,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            executed_at: row.executed_at,
            completed_at: row.completed_at,
            rolled_back_at: row.rolled_back_at,
            failure_reason: row.failure_reason,
            rollback_data: row.rollback_data.0,
            audit_log: row.audit_log.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    enabled: bool,
    conditions: Json<RuleConditions>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RuleRow> for AutoApprovalRule {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            enabled: row.enabled,
            conditions: row.conditions.0,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const ACTION_COLUMNS: &str = "id, organization_id, recommendation_id, type, status, provider, \
     account_id, region, resource_id, resource_type, description, current_state, desired_state, \
     estimated_savings, currency, risk, auto_approved, approval_rule, requested_by, approved_by, \
     approved_at, executed_at, completed_at, rolled_back_at, failure_reason, rollback_data, \
     audit_log, created_at, updated_at";

const RULE_COLUMNS: &str =
    "id, organization_id, name, enabled, conditions, created_by, created_at, updated_at";

const FILTER_PREDICATE: &str = "organization_id = $1 \
     AND (cardinality($2::text[]) = 0 OR type = ANY($2)) \
     AND (cardinality($3::text[]) = 0 OR status = ANY($3)) \
     AND (cardinality($4::text[]) = 0 OR risk = ANY($4)) \
     AND (cardinality($5::text[]) = 0 OR provider = ANY($5))";

fn texts<T: Copy>(values: &[T], f: impl Fn(T) -> &'static str) -> Vec<&'static str> {
    values.iter().map(|v| f(*v)).collect()
}

#[async_trait]
impl RemediationRepository for PostgresRemediationRepository {
    async fn create(&self, a: &RemediationAction) -> Result<(), CoreError> {
        require_tenant(a.organization_id, "remediation_actions")?;
        sqlx::query(
            r#"
            INSERT INTO remediation_actions
                (id, organization_id, recommendation_id, type, status, provider, account_id,
                 region, resource_id, resource_type, description, current_state, desired_state,
                 estimated_savings, currency, risk, auto_approved, approval_rule, requested_by,
                 approved_by, approved_at, executed_at, completed_at, rolled_back_at,
                 failure_reason, rollback_data, audit_log, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)
            "#,
        )
        .bind(a.id)
        .bind(a.organization_id)
        .bind(a.recommendation_id)
        .bind(a.kind.as_str())
        .bind(a.status.as_str())
        .bind(a.provider.as_str())
        .bind(&a.account_id)
        .bind(&a.region)
        .bind(&a.resource_id)
        .bind(&a.resource_type)
        .bind(&a.description)
        .bind(Json(&a.current_state))
        .bind(Json(&a.desired_state))
        .bind(a.estimated_savings)
        .bind(a.currency.as_str())
        .bind(a.risk.as_str())
        .bind(a.auto_approved)
        .bind(&a.approval_rule)
        .bind(&a.requested_by)
        .bind(&a.approved_by)
        .bind(a.approved_at)
        .bind(a.executed_at)
        .bind(a.completed_at)
        .bind(a.rolled_back_at)
        .bind(&a.failure_reason)
        .bind(Json(&a.rollback_data))
        .bind(Json(&a.audit_log))
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RemediationAction>, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        let sql = format!(
            "SELECT {ACTION_COLUMNS} FROM remediation_actions WHERE organization_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RemediationAction::try_from).transpose()
    }

    async fn list(
        &self,
        organization_id: Uuid,
        filter: &RemediationFilter,
        page: Pagination,
    ) -> Result<Page<RemediationAction>, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        let kinds = texts(&filter.kinds, |k| k.as_str());
        let statuses = texts(&filter.statuses, |s| s.as_str());
        let risks = texts(&filter.risks, |r| r.as_str());
        let providers = texts(&filter.providers, |p| p.as_str());

        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM remediation_actions WHERE {FILTER_PREDICATE}"
        ))
        .bind(organization_id)
        .bind(&kinds)
        .bind(&statuses)
        .bind(&risks)
        .bind(&providers)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {ACTION_COLUMNS} FROM remediation_actions WHERE {FILTER_PREDICATE} \
             ORDER BY created_at DESC LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(organization_id)
            .bind(&kinds)
            .bind(&statuses)
            .bind(&risks)
            .bind(&providers)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(RemediationAction::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Page { items, total })
    }

    async fn update(&self, a: &RemediationAction) -> Result<(), CoreError> {
        require_tenant(a.organization_id, "remediation_actions")?;
        let result = sqlx::query(
            r#"
            UPDATE remediation_actions
            SET status = $3, auto_approved = $4, approval_rule = $5, approved_by = $6,
                approved_at = $7, executed_at = $8, completed_at = $9, rolled_back_at = $10,
                failure_reason = $11, rollback_data = $12, audit_log = $13,
                current_state = $14, desired_state = $15, updated_at = $16
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(a.organization_id)
        .bind(a.id)
        .bind(a.status.as_str())
        .bind(a.auto_approved)
        .bind(&a.approval_rule)
        .bind(&a.approved_by)
        .bind(a.approved_at)
        .bind(a.executed_at)
        .bind(a.completed_at)
        .bind(a.rolled_back_at)
        .bind(&a.failure_reason)
        .bind(Json(&a.rollback_data))
        .bind(Json(&a.audit_log))
        .bind(Json(&a.current_state))
        .bind(Json(&a.desired_state))
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "remediation action", a.id)
    }

    async fn summary(&self, organization_id: Uuid) -> Result<RemediationSummary, CoreError> {
        require_tenant(organization_id, "remediation_actions")?;
        let rows: Vec<(String, String, String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT type, status, risk, COUNT(*), COALESCE(SUM(estimated_savings), 0)::float8
            FROM remediation_actions
            WHERE organization_id = $1
            GROUP BY type, status, risk
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = RemediationSummary::default();
        for (kind, status, risk, count, savings) in rows {
            summary.record(
                parse_column("type", &kind)?,
                parse_column("status", &status)?,
                parse_column("risk", &risk)?,
                savings,
                count,
            );
        }
        Ok(summary)
    }

    async fn create_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError> {
        require_tenant(rule.organization_id, "auto_approval_rules")?;
        sqlx::query(
            r#"
            INSERT INTO auto_approval_rules
                (id, organization_id, name, enabled, conditions, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(rule.organization_id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(Json(&rule.conditions))
        .bind(&rule.created_by)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "auto-approval rule", rule.name.clone()))?;
        Ok(())
    }

    async fn list_rules(&self, organization_id: Uuid) -> Result<Vec<AutoApprovalRule>, CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM auto_approval_rules WHERE organization_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AutoApprovalRule::from).collect())
    }

    async fn get_rule(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AutoApprovalRule>, CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM auto_approval_rules WHERE organization_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AutoApprovalRule::from))
    }

    async fn update_rule(&self, rule: &AutoApprovalRule) -> Result<(), CoreError> {
        require_tenant(rule.organization_id, "auto_approval_rules")?;
        let result = sqlx::query(
            r#"
            UPDATE auto_approval_rules
            SET name = $3, enabled = $4, conditions = $5, updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(rule.organization_id)
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(Json(&rule.conditions))
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "auto-approval rule", rule.name.clone()))?;
        expect_row(result.rows_affected(), "auto-approval rule", rule.id)
    }

    async fn delete_rule(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        let result =
            sqlx::query("DELETE FROM auto_approval_rules WHERE organization_id = $1 AND id = $2")
                .bind(organization_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        expect_row(result.rows_affected(), "auto-approval rule", id)
    }

    async fn active_rules(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<AutoApprovalRule>, CoreError> {
        require_tenant(organization_id, "auto_approval_rules")?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM auto_approval_rules \
             WHERE organization_id = $1 AND enabled = TRUE ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AutoApprovalRule::from).collect())
    }
}
