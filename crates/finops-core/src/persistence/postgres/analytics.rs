// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Anomalies, forecasts, budgets and recommendations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{expect_row, parse_column};
use crate::error::CoreError;
use crate::model::{
    Anomaly, AnomalyFilter, AnomalyStatus, AnomalySummary, Budget, BudgetEvaluation,
    BudgetFilters, BudgetStatus, BudgetSummary, BudgetThreshold, BudgetUpdate, Forecast,
    ForecastPoint, Page, Pagination, Recommendation, RecommendationStatus,
};
use crate::persistence::{
    AnomalyRepository, BudgetRepository, ForecastRepository, RecommendationRepository,
    require_tenant,
};

// ============================================================================
// Anomalies
// ============================================================================

/// PostgreSQL-backed [`AnomalyRepository`].
#[derive(Clone)]
pub struct PostgresAnomalyRepository {
    pool: PgPool,
}

impl PostgresAnomalyRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: AnomalyStatus,
        by: Option<&str>,
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let result = sqlx::query(
            r#"
            UPDATE anomalies
            SET status = $3,
                acknowledged_at = CASE WHEN $3 = 'acknowledged' THEN NOW() ELSE acknowledged_at END,
                acknowledged_by = COALESCE($4, acknowledged_by),
                resolved_at = CASE WHEN $3 = 'resolved' THEN NOW() ELSE resolved_at END,
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .bind(status.as_str())
        .bind(by)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "anomaly", id)
    }
}

#[derive(sqlx::FromRow)]
struct AnomalyRow {
    id: Uuid,
    organization_id: Uuid,
    date: NaiveDate,
    expected_amount: f64,
    actual_amount: f64,
    deviation: f64,
    deviation_pct: f64,
    score: f64,
    severity: String,
    status: String,
    service: Option<String>,
    account_id: Option<String>,
    region: Option<String>,
    root_cause: Option<String>,
    detected_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AnomalyRow> for Anomaly {
    type Error = CoreError;

    fn try_from(row: AnomalyRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            date: row.date,
            expected_amount: row.expected_amount,
            actual_amount: row.actual_amount,
            deviation: row.deviation,
            deviation_pct: row.deviation_pct,
            score: row.score,
            severity: parse_column("severity", &row.severity)?,
            status: parse_column("status", &row.status)?,
            service: row.service,
            account_id: row.account_id,
            region: row.region,
            root_cause: row.root_cause,
            detected_at: row.detected_at,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ANOMALY_COLUMNS: &str = "id, organization_id, date, expected_amount, actual_amount, \
     deviation, deviation_pct, score, severity, status, service, account_id, region, root_cause, \
     detected_at, acknowledged_at, acknowledged_by, resolved_at, created_at, updated_at";

#[async_trait]
impl AnomalyRepository for PostgresAnomalyRepository {
    async fn create(&self, a: &Anomaly) -> Result<(), CoreError> {
        require_tenant(a.organization_id, "anomalies")?;
        sqlx::query(
            r#"
            INSERT INTO anomalies
                (id, organization_id, date, expected_amount, actual_amount, deviation,
                 deviation_pct, score, severity, status, service, account_id, region, root_cause,
                 detected_at, acknowledged_at, acknowledged_by, resolved_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20)
            "#,
        )
        .bind(a.id)
        .bind(a.organization_id)
        .bind(a.date)
        .bind(a.expected_amount)
        .bind(a.actual_amount)
        .bind(a.deviation)
        .bind(a.deviation_pct)
        .bind(a.score)
        .bind(a.severity.as_str())
        .bind(a.status.as_str())
        .bind(&a.service)
        .bind(&a.account_id)
        .bind(&a.region)
        .bind(&a.root_cause)
        .bind(a.detected_at)
        .bind(a.acknowledged_at)
        .bind(&a.acknowledged_by)
        .bind(a.resolved_at)
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Anomaly>, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let sql =
            format!("SELECT {ANOMALY_COLUMNS} FROM anomalies WHERE organization_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, AnomalyRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Anomaly::try_from).transpose()
    }

    async fn list(
        &self,
        organization_id: Uuid,
        filter: &AnomalyFilter,
        page: Pagination,
    ) -> Result<Page<Anomaly>, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        let severities: Vec<&str> = filter.severities.iter().map(|s| s.as_str()).collect();
        let predicate = "organization_id = $1 \
             AND (cardinality($2::text[]) = 0 OR status = ANY($2)) \
             AND (cardinality($3::text[]) = 0 OR severity = ANY($3))";

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM anomalies WHERE {predicate}"))
                .bind(organization_id)
                .bind(&statuses)
                .bind(&severities)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomalies WHERE {predicate} \
             ORDER BY detected_at DESC, date DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query_as::<_, AnomalyRow>(&sql)
            .bind(organization_id)
            .bind(&statuses)
            .bind(&severities)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(Anomaly::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Page { items, total })
    }

    async fn acknowledge(&self, organization_id: Uuid, id: Uuid, by: &str) -> Result<(), CoreError> {
        self.set_status(organization_id, id, AnomalyStatus::Acknowledged, Some(by))
            .await
    }

    async fn resolve(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        self.set_status(organization_id, id, AnomalyStatus::Resolved, None)
            .await
    }

    async fn dismiss(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        self.set_status(organization_id, id, AnomalyStatus::Dismissed, None)
            .await
    }

    async fn summary(&self, organization_id: Uuid) -> Result<AnomalySummary, CoreError> {
        require_tenant(organization_id, "anomalies")?;
        let rows: Vec<(String, String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT severity, status, COUNT(*), COALESCE(SUM(ABS(deviation)), 0)::float8
            FROM anomalies
            WHERE organization_id = $1
            GROUP BY severity, status
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = AnomalySummary::default();
        for (severity, status, count, deviation) in rows {
            let severity = parse_column("severity", &severity)?;
            let status: AnomalyStatus = parse_column("status", &status)?;
            summary.total += count;
            if status == AnomalyStatus::Open {
                summary.open += count;
            }
            *summary.by_severity.entry(severity).or_default() += count;
            summary.total_deviation += deviation;
        }
        if summary.total > 0 {
            summary.avg_deviation = summary.total_deviation / summary.total as f64;
        }
        Ok(summary)
    }
}

// ============================================================================
// Forecasts
// ============================================================================

/// PostgreSQL-backed [`ForecastRepository`].
#[derive(Clone)]
pub struct PostgresForecastRepository {
    pool: PgPool,
}

impl PostgresForecastRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ForecastRow {
    id: Uuid,
    organization_id: Uuid,
    generated_at: DateTime<Utc>,
    model_version: String,
    granularity: String,
    predictions: Json<Vec<ForecastPoint>>,
    total_forecasted: f64,
    confidence_level: f64,
    currency: String,
    service_filter: Option<String>,
    account_filter: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ForecastRow> for Forecast {
    type Error = CoreError;

    fn try_from(row: ForecastRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            generated_at: row.generated_at,
            model_version: row.model_version,
            granularity: parse_column("granularity", &row.granularity)?,
            predictions: row.predictions.0,
            total_forecasted: row.total_forecasted,
            confidence_level: row.confidence_level,
            currency: parse_column("currency", &row.currency)?,
            service_filter: row.service_filter,
            account_filter: row.account_filter,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const FORECAST_COLUMNS: &str = "id, organization_id, generated_at, model_version, granularity, \
     predictions, total_forecasted, confidence_level, currency, service_filter, account_filter, \
     created_at, updated_at";

#[async_trait]
impl ForecastRepository for PostgresForecastRepository {
    async fn create(&self, f: &Forecast) -> Result<(), CoreError> {
        require_tenant(f.organization_id, "forecasts")?;
        sqlx::query(
            r#"
            INSERT INTO forecasts
                (id, organization_id, generated_at, model_version, granularity, predictions,
                 total_forecasted, confidence_level, currency, service_filter, account_filter,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(f.id)
        .bind(f.organization_id)
        .bind(f.generated_at)
        .bind(&f.model_version)
        .bind(f.granularity.as_str())
        .bind(Json(&f.predictions))
        .bind(f.total_forecasted)
        .bind(f.confidence_level)
        .bind(f.currency.as_str())
        .bind(&f.service_filter)
        .bind(&f.account_filter)
        .bind(f.created_at)
        .bind(f.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Forecast>, CoreError> {
        require_tenant(organization_id, "forecasts")?;
        let sql =
            format!("SELECT {FORECAST_COLUMNS} FROM forecasts WHERE organization_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, ForecastRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Forecast::try_from).transpose()
    }

    async fn latest(&self, organization_id: Uuid) -> Result<Option<Forecast>, CoreError> {
        Ok(self.list(organization_id, 1).await?.into_iter().next())
    }

    async fn list(&self, organization_id: Uuid, limit: i64) -> Result<Vec<Forecast>, CoreError> {
        require_tenant(organization_id, "forecasts")?;
        let sql = format!(
            "SELECT {FORECAST_COLUMNS} FROM forecasts WHERE organization_id = $1 \
             ORDER BY generated_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, ForecastRow>(&sql)
            .bind(organization_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Forecast::try_from).collect()
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "forecasts")?;
        let result = sqlx::query("DELETE FROM forecasts WHERE organization_id = $1 AND id = $2")
            .bind(organization_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_row(result.rows_affected(), "forecast", id)
    }
}

// ============================================================================
// Budgets
// ============================================================================

/// PostgreSQL-backed [`BudgetRepository`].
#[derive(Clone)]
pub struct PostgresBudgetRepository {
    pool: PgPool,
}

impl PostgresBudgetRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BudgetRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    amount: f64,
    currency: String,
    period: String,
    filters: Json<BudgetFilters>,
    thresholds: Json<Vec<BudgetThreshold>>,
    current_spend: f64,
    forecasted_spend: f64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BudgetRow> for Budget {
    type Error = CoreError;

    fn try_from(row: BudgetRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            amount: row.amount,
            currency: parse_column("currency", &row.currency)?,
            period: parse_column("period", &row.period)?,
            filters: row.filters.0,
            thresholds: row.thresholds.0,
            current_spend: row.current_spend,
            forecasted_spend: row.forecasted_spend,
            status: parse_column("status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const BUDGET_COLUMNS: &str = "id, organization_id, name, amount, currency, period, filters, \
     thresholds, current_spend, forecasted_spend, status, created_at, updated_at";

/// Write every mutable budget column.
async fn save_budget<'e, E>(executor: E, b: &Budget) -> Result<(), CoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE budgets
        SET name = $3, amount = $4, filters = $5, thresholds = $6, current_spend = $7,
            forecasted_spend = $8, status = $9, updated_at = $10
        WHERE organization_id = $1 AND id = $2
        "#,
    )
    .bind(b.organization_id)
    .bind(b.id)
    .bind(&b.name)
    .bind(b.amount)
    .bind(Json(&b.filters))
    .bind(Json(&b.thresholds))
    .bind(b.current_spend)
    .bind(b.forecasted_spend)
    .bind(b.status.as_str())
    .bind(b.updated_at)
    .execute(executor)
    .await?;
    expect_row(result.rows_affected(), "budget", b.id)
}

#[async_trait]
impl BudgetRepository for PostgresBudgetRepository {
    async fn create(&self, b: &Budget) -> Result<(), CoreError> {
        require_tenant(b.organization_id, "budgets")?;
        sqlx::query(
            r#"
            INSERT INTO budgets
                (id, organization_id, name, amount, currency, period, filters, thresholds,
                 current_spend, forecasted_spend, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(b.id)
        .bind(b.organization_id)
        .bind(&b.name)
        .bind(b.amount)
        .bind(b.currency.as_str())
        .bind(b.period.as_str())
        .bind(Json(&b.filters))
        .bind(Json(&b.thresholds))
        .bind(b.current_spend)
        .bind(b.forecasted_spend)
        .bind(b.status.as_str())
        .bind(b.created_at)
        .bind(b.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Budget>, CoreError> {
        require_tenant(organization_id, "budgets")?;
        let sql =
            format!("SELECT {BUDGET_COLUMNS} FROM budgets WHERE organization_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, BudgetRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Budget::try_from).transpose()
    }

    async fn list(&self, organization_id: Uuid) -> Result<Vec<Budget>, CoreError> {
        require_tenant(organization_id, "budgets")?;
        let sql =
            format!("SELECT {BUDGET_COLUMNS} FROM budgets WHERE organization_id = $1 ORDER BY name");
        let rows = sqlx::query_as::<_, BudgetRow>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Budget::try_from).collect()
    }

    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BudgetUpdate,
    ) -> Result<Budget, CoreError> {
        let mut budget = self
            .get(organization_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("budget", id))?;
        budget.apply(update)?;
        save_budget(&self.pool, &budget).await?;
        Ok(budget)
    }

    async fn update_spend(
        &self,
        organization_id: Uuid,
        id: Uuid,
        spend: f64,
    ) -> Result<(Budget, BudgetEvaluation), CoreError> {
        require_tenant(organization_id, "budgets")?;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets WHERE organization_id = $1 AND id = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, BudgetRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found("budget", id))?;
        let mut budget = Budget::try_from(row)?;
        let evaluation = budget.evaluate(spend);
        save_budget(&mut *tx, &budget).await?;
        tx.commit().await?;
        Ok((budget, evaluation))
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "budgets")?;
        let result = sqlx::query("DELETE FROM budgets WHERE organization_id = $1 AND id = $2")
            .bind(organization_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_row(result.rows_affected(), "budget", id)
    }

    async fn summary(&self, organization_id: Uuid) -> Result<BudgetSummary, CoreError> {
        let budgets = self.list(organization_id).await?;
        Ok(BudgetSummary::from_budgets(&budgets))
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// PostgreSQL-backed [`RecommendationRepository`].
#[derive(Clone)]
pub struct PostgresRecommendationRepository {
    pool: PgPool,
}

impl PostgresRecommendationRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    organization_id: Uuid,
    external_id: String,
    #[sqlx(rename = "type")]
    kind: String,
    provider: String,
    account_id: String,
    region: String,
    resource_id: String,
    resource_type: String,
    current_config: String,
    recommended_config: String,
    estimated_savings: f64,
    currency: String,
    impact: String,
    effort: Option<String>,
    risk: Option<String>,
    status: String,
    details: Json<HashMap<String, serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = CoreError;

    fn try_from(row: RecommendationRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            external_id: row.external_id,
            kind: parse_column("type", &row.kind)?,
            provider: parse_column("provider", &row.provider)?,
            account_id: row.account_id,
            region: row.region,
            resource_id: row.resource_id,
            resource_type: row.resource_type,
            current_config: row.current_config,
            recommended_config: row.recommended_config,
            estimated_savings: row.estimated_savings,
            currency: parse_column("currency", &row.currency)?,
            impact: parse_column("impact", &row.impact)?,
            effort: row.effort,
            risk: row.risk,
            status: parse_column("status", &row.status)?,
            details: row.details.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RECOMMENDATION_COLUMNS: &str = "id, organization_id, external_id, type, provider, \
     account_id, region, resource_id, resource_type, current_config, recommended_config, \
     estimated_savings, currency, impact, effort, risk, status, details, created_at, updated_at";

#[async_trait]
impl RecommendationRepository for PostgresRecommendationRepository {
    async fn upsert(&self, r: &Recommendation) -> Result<(), CoreError> {
        require_tenant(r.organization_id, "recommendations")?;
        sqlx::query(
            r#"
            INSERT INTO recommendations
                (id, organization_id, external_id, type, provider, account_id, region,
                 resource_id, resource_type, current_config, recommended_config,
                 estimated_savings, currency, impact, effort, risk, status, details,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20)
            ON CONFLICT (organization_id, provider, external_id) DO UPDATE SET
                type = EXCLUDED.type,
                account_id = EXCLUDED.account_id,
                region = EXCLUDED.region,
                resource_id = EXCLUDED.resource_id,
                resource_type = EXCLUDED.resource_type,
                current_config = EXCLUDED.current_config,
                recommended_config = EXCLUDED.recommended_config,
                estimated_savings = EXCLUDED.estimated_savings,
                currency = EXCLUDED.currency,
                impact = EXCLUDED.impact,
                effort = EXCLUDED.effort,
                risk = EXCLUDED.risk,
                details = EXCLUDED.details,
                updated_at = NOW()
            "#,
        )
        .bind(r.id)
        .bind(r.organization_id)
        .bind(&r.external_id)
        .bind(r.kind.as_str())
        .bind(r.provider.as_str())
        .bind(&r.account_id)
        .bind(&r.region)
        .bind(&r.resource_id)
        .bind(&r.resource_type)
        .bind(&r.current_config)
        .bind(&r.recommended_config)
        .bind(r.estimated_savings)
        .bind(r.currency.as_str())
        .bind(r.impact.as_str())
        .bind(&r.effort)
        .bind(&r.risk)
        .bind(r.status.as_str())
        .bind(Json(&r.details))
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Recommendation>, CoreError> {
        require_tenant(organization_id, "recommendations")?;
        let sql = format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
             WHERE organization_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, RecommendationRow>(&sql)
            .bind(organization_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Recommendation::try_from).transpose()
    }

    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<RecommendationStatus>,
        page: Pagination,
    ) -> Result<Page<Recommendation>, CoreError> {
        require_tenant(organization_id, "recommendations")?;
        let status = status.map(|s| s.as_str());
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM recommendations
            WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(organization_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
             WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY estimated_savings DESC, created_at DESC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, RecommendationRow>(&sql)
            .bind(organization_id)
            .bind(status)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(Recommendation::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Page { items, total })
    }

    async fn update_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: RecommendationStatus,
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "recommendations")?;
        let result = sqlx::query(
            r#"
            UPDATE recommendations SET status = $3, updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "recommendation", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BudgetPeriod, Organization, Severity};
    use crate::persistence::OrganizationRepository;
    use crate::persistence::postgres::{PostgresOrganizationRepository, test_pool};

    #[tokio::test]
    async fn test_anomaly_lifecycle_and_isolation() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let orgs = PostgresOrganizationRepository::new(pool.clone());
        let repo = PostgresAnomalyRepository::new(pool);
        let a_org = Organization::new("a");
        let b_org = Organization::new("b");
        orgs.create(&a_org).await.unwrap();
        orgs.create(&b_org).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let anomaly = Anomaly::detected(a_org.id, day, 100.0, 250.0, 0.9);
        repo.create(&anomaly).await.unwrap();

        assert!(repo.get(b_org.id, anomaly.id).await.unwrap().is_none());
        let page = repo
            .list(b_org.id, &AnomalyFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        repo.acknowledge(a_org.id, anomaly.id, "carol").await.unwrap();
        let got = repo.get(a_org.id, anomaly.id).await.unwrap().unwrap();
        assert_eq!(got.status, AnomalyStatus::Acknowledged);
        assert_eq!(got.acknowledged_by.as_deref(), Some("carol"));
        assert_eq!(got.severity, Severity::Critical);

        let summary = repo.summary(a_org.id).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.open, 0);

        orgs.delete(a_org.id).await.unwrap();
        orgs.delete(b_org.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_budget_update_spend_round_trip() {
        let Some(pool) = test_pool().await else {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        };
        let orgs = PostgresOrganizationRepository::new(pool.clone());
        let repo = PostgresBudgetRepository::new(pool);
        let org = Organization::new("budgets");
        orgs.create(&org).await.unwrap();

        let budget = Budget::new(org.id, "team", 100.0, BudgetPeriod::Monthly, [80.0]).unwrap();
        repo.create(&budget).await.unwrap();

        let (updated, evaluation) = repo.update_spend(org.id, budget.id, 85.0).await.unwrap();
        assert_eq!(updated.status, BudgetStatus::Warning);
        assert_eq!(evaluation.newly_crossed, vec![80.0]);

        let stored = repo.get(org.id, budget.id).await.unwrap().unwrap();
        assert!(stored.thresholds[0].notified);
        assert_eq!(stored.current_spend, 85.0);

        orgs.delete(org.id).await.unwrap();
    }
}
