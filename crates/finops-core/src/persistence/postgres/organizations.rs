// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Organizations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::expect_row;
use crate::error::CoreError;
use crate::model::{Organization, OrganizationSettings};
use crate::persistence::OrganizationRepository;

/// PostgreSQL-backed [`OrganizationRepository`].
#[derive(Clone)]
pub struct PostgresOrganizationRepository {
    pool: PgPool,
}

impl PostgresOrganizationRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    settings: Json<OrganizationSettings>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            settings: row.settings.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
    async fn create(&self, organization: &Organization) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(organization.id)
        .bind(&organization.name)
        .bind(Json(&organization.settings))
        .bind(organization.created_at)
        .bind(organization.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Organization>, CoreError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, settings, created_at, updated_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Organization::from))
    }

    async fn list(&self) -> Result<Vec<Organization>, CoreError> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, settings, created_at, updated_at
            FROM organizations
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET settings = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(settings))
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "organization", id)
    }

    async fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_row(result.rows_affected(), "organization", id)
    }
}
