// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost records: idempotent batch upsert and aggregate queries.
//!
//! Aggregations run in SQL. Column names that vary per call come from closed
//! enums ([`CostDimension::column`], [`TrendAxis`]) and never from caller text.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use super::parse_column;
use crate::error::CoreError;
use crate::model::{
    ALLOCATION_TAG_KEYS, BudgetFilters, CostAllocation, CostBreakdown, CostDimension, CostRecord,
    CostSummary, CostTrend, Currency, DateRange, Granularity, TrendAxis, TrendPoint, UNALLOCATED,
    UNTAGGED_LIMIT, UntaggedResource,
};
use crate::persistence::{CostRepository, require_tenant};

/// PostgreSQL-backed [`CostRepository`].
#[derive(Clone)]
pub struct PostgresCostRepository {
    pool: PgPool,
}

impl PostgresCostRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Currency carrying most of the spend in range; USD when empty.
    async fn dominant_currency(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Currency, CoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT currency
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            GROUP BY currency
            ORDER BY SUM(amount) DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((text,)) => parse_column("currency", &text),
            None => Ok(Currency::default()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CostRow {
    id: Uuid,
    organization_id: Uuid,
    date: NaiveDate,
    amount: f64,
    currency: String,
    provider: String,
    service: String,
    account_id: String,
    region: String,
    resource_id: String,
    tags: Json<HashMap<String, String>>,
    estimated: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CostRow> for CostRecord {
    type Error = CoreError;

    fn try_from(row: CostRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            date: row.date,
            amount: row.amount,
            currency: parse_column("currency", &row.currency)?,
            provider: parse_column("provider", &row.provider)?,
            service: row.service,
            account_id: row.account_id,
            region: row.region,
            resource_id: row.resource_id,
            tags: row.tags.0,
            estimated: row.estimated,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UntaggedRow {
    resource_id: String,
    service: String,
    provider: String,
    region: String,
    cost: f64,
    missing_tags: Vec<String>,
}

impl TryFrom<UntaggedRow> for UntaggedResource {
    type Error = CoreError;

    fn try_from(row: UntaggedRow) -> Result<Self, CoreError> {
        Ok(Self {
            resource_id: row.resource_id,
            resource_type: row.service,
            provider: parse_column("provider", &row.provider)?,
            region: row.region,
            cost: row.cost,
            missing_tags: row.missing_tags,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrendRow {
    bucket: NaiveDate,
    provider: Option<String>,
    service: Option<String>,
    total: f64,
    record_count: i64,
}

/// SQL expression bucketing `date` at the requested granularity.
fn bucket_expr(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Hourly | Granularity::Daily => "date",
        Granularity::Weekly => "date_trunc('week', date)::date",
        Granularity::Monthly => "date_trunc('month', date)::date",
    }
}

#[async_trait]
impl CostRepository for PostgresCostRepository {
    async fn upsert_batch(&self, records: &[CostRecord]) -> Result<u64, CoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        for record in records {
            require_tenant(record.organization_id, "costs")?;
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO costs
                    (id, organization_id, date, amount, currency, provider, service,
                     account_id, region, resource_id, tags, estimated, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
                ON CONFLICT (organization_id, date, provider, service, account_id, region, resource_id)
                DO UPDATE SET
                    amount = EXCLUDED.amount,
                    estimated = EXCLUDED.estimated,
                    updated_at = NOW()
                "#,
            )
            .bind(record.id)
            .bind(record.organization_id)
            .bind(record.date)
            .bind(record.amount)
            .bind(record.currency.as_str())
            .bind(record.provider.as_str())
            .bind(&record.service)
            .bind(&record.account_id)
            .bind(&record.region)
            .bind(&record.resource_id)
            .bind(Json(&record.tags))
            .bind(record.estimated)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;

        debug!(count = written, "Upserted cost records");
        Ok(written)
    }

    async fn summary(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<CostSummary, CoreError> {
        require_tenant(organization_id, "costs")?;
        let groups: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT service, SUM(amount)::float8 AS amount
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            GROUP BY service
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;
        let currency = self.dominant_currency(organization_id, range).await?;
        Ok(CostSummary::from_groups(range, currency, groups))
    }

    async fn trend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        granularity: Granularity,
        axes: &[TrendAxis],
    ) -> Result<CostTrend, CoreError> {
        require_tenant(organization_id, "costs")?;
        let by_provider = axes.contains(&TrendAxis::Provider);
        let by_service = axes.contains(&TrendAxis::Service);
        let provider_col = if by_provider { "provider" } else { "NULL::text" };
        let service_col = if by_service { "service" } else { "NULL::text" };
        let bucket = bucket_expr(granularity);

        let sql = format!(
            r#"
            SELECT {bucket} AS bucket,
                   {provider_col} AS provider,
                   {service_col} AS service,
                   SUM(amount)::float8 AS total,
                   COUNT(*) AS record_count
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            GROUP BY 1, 2, 3
            ORDER BY 1, 2, 3
            "#
        );
        let rows = sqlx::query_as::<_, TrendRow>(&sql)
            .bind(organization_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await?;

        let points = rows
            .into_iter()
            .map(|row| {
                Ok(TrendPoint {
                    date: row.bucket,
                    total: row.total,
                    provider: row
                        .provider
                        .as_deref()
                        .map(|p| parse_column("provider", p))
                        .transpose()?,
                    service: row.service,
                    record_count: row.record_count,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(CostTrend::from_points(range, granularity, points))
    }

    async fn breakdown(
        &self,
        organization_id: Uuid,
        range: DateRange,
        dimension: CostDimension,
    ) -> Result<CostBreakdown, CoreError> {
        require_tenant(organization_id, "costs")?;
        let column = dimension.column();
        let sql = format!(
            r#"
            SELECT {column} AS name, SUM(amount)::float8 AS amount
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            GROUP BY {column}
            "#
        );
        let groups: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(organization_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await?;
        let currency = self.dominant_currency(organization_id, range).await?;
        Ok(CostBreakdown::from_groups(dimension, currency, groups))
    }

    async fn daily_totals(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let rows = sqlx::query_as(
            r#"
            SELECT date, SUM(amount)::float8 AS total
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            GROUP BY date
            ORDER BY date
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn spend(
        &self,
        organization_id: Uuid,
        range: DateRange,
        filters: &BudgetFilters,
    ) -> Result<f64, CoreError> {
        require_tenant(organization_id, "costs")?;
        let providers: Vec<&str> = filters.providers.iter().map(|p| p.as_str()).collect();
        let row: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT SUM(amount)::float8
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
              AND (cardinality($4::text[]) = 0 OR provider = ANY($4))
              AND (cardinality($5::text[]) = 0 OR service = ANY($5))
              AND (cardinality($6::text[]) = 0 OR account_id = ANY($6))
              AND (cardinality($7::text[]) = 0 OR region = ANY($7))
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .bind(&providers)
        .bind(&filters.services)
        .bind(&filters.accounts)
        .bind(&filters.regions)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0.0))
    }

    async fn list(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostRecord>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let rows = sqlx::query_as::<_, CostRow>(
            r#"
            SELECT id, organization_id, date, amount, currency, provider, service, account_id,
                   region, resource_id, tags, estimated, created_at, updated_at
            FROM costs
            WHERE organization_id = $1 AND date >= $2 AND date < $3
            ORDER BY date, provider, service, account_id, region, resource_id
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CostRecord::try_from).collect()
    }

    async fn allocations(
        &self,
        organization_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<CostAllocation>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let keys: Vec<&str> = ALLOCATION_TAG_KEYS.to_vec();
        let groups: Vec<(String, String, f64)> = sqlx::query_as(
            r#"
            SELECT target, service, SUM(amount)::float8 AS amount
            FROM (
                SELECT COALESCE(
                           (SELECT tags->>k.key
                            FROM unnest($4::text[]) WITH ORDINALITY AS k(key, ord)
                            WHERE COALESCE(tags->>k.key, '') <> ''
                            ORDER BY k.ord
                            LIMIT 1),
                           $5::text
                       ) AS target,
                       service,
                       amount
                FROM costs
                WHERE organization_id = $1 AND date >= $2 AND date < $3
            ) AS attributed
            GROUP BY target, service
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .bind(&keys)
        .bind(UNALLOCATED)
        .fetch_all(&self.pool)
        .await?;
        let currency = self.dominant_currency(organization_id, range).await?;
        Ok(CostAllocation::from_groups(range, currency, groups))
    }

    async fn untagged_resources(
        &self,
        organization_id: Uuid,
        range: DateRange,
        required: &[String],
    ) -> Result<Vec<UntaggedResource>, CoreError> {
        require_tenant(organization_id, "costs")?;
        let rows = sqlx::query_as::<_, UntaggedRow>(
            r#"
            WITH resources AS (
                SELECT resource_id, service, provider, region,
                       SUM(amount)::float8 AS cost,
                       (array_agg(tags ORDER BY date DESC))[1] AS tags
                FROM costs
                WHERE organization_id = $1 AND date >= $2 AND date < $3 AND resource_id <> ''
                GROUP BY resource_id, service, provider, region
            ),
            checked AS (
                SELECT resource_id, service, provider, region, cost,
                       ARRAY(
                           SELECT k.key
                           FROM unnest($4::text[]) WITH ORDINALITY AS k(key, ord)
                           WHERE COALESCE(tags->>k.key, '') = ''
                           ORDER BY k.ord
                       ) AS missing_tags
                FROM resources
            )
            SELECT resource_id, service, provider, region, cost, missing_tags
            FROM checked
            WHERE cardinality(missing_tags) > 0
            ORDER BY cost DESC, resource_id
            LIMIT $5
            "#,
        )
        .bind(organization_id)
        .bind(range.start)
        .bind(range.end)
        .bind(required)
        .bind(UNTAGGED_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UntaggedResource::try_from).collect()
    }
}
