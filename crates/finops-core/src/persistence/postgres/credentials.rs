// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential bindings (`cloud_providers` table).
//!
//! Only the factory paths select the `credentials` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{expect_row, map_unique, parse_column};
use crate::error::CoreError;
use crate::model::{BindingStatus, BindingUpdate, CredentialBinding, ProviderKind, SealedBlob};
use crate::persistence::{CredentialRepository, require_tenant};

/// PostgreSQL-backed [`CredentialRepository`].
#[derive(Clone)]
pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BindingRow {
    id: Uuid,
    organization_id: Uuid,
    provider: String,
    name: String,
    #[sqlx(default)]
    credentials: Option<Vec<u8>>,
    enabled: bool,
    status: String,
    status_message: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BindingRow> for CredentialBinding {
    type Error = CoreError;

    fn try_from(row: BindingRow) -> Result<Self, CoreError> {
        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            provider: parse_column("provider", &row.provider)?,
            name: row.name,
            sealed_credentials: row.credentials.map(SealedBlob::new).unwrap_or_default(),
            enabled: row.enabled,
            status: parse_column("status", &row.status)?,
            status_message: row.status_message,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert(rows: Vec<BindingRow>) -> Result<Vec<CredentialBinding>, CoreError> {
    rows.into_iter().map(CredentialBinding::try_from).collect()
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn create(&self, binding: &CredentialBinding) -> Result<(), CoreError> {
        require_tenant(binding.organization_id, "cloud_providers")?;
        sqlx::query(
            r#"
            INSERT INTO cloud_providers
                (id, organization_id, provider, name, credentials, enabled, status,
                 status_message, last_sync_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(binding.id)
        .bind(binding.organization_id)
        .bind(binding.provider.as_str())
        .bind(&binding.name)
        .bind(binding.sealed_credentials.as_bytes())
        .bind(binding.enabled)
        .bind(binding.status.as_str())
        .bind(&binding.status_message)
        .bind(binding.last_sync_at)
        .bind(binding.created_at)
        .bind(binding.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique(
                e,
                "credential binding",
                format!("{} already bound for tenant", binding.provider),
            )
        })?;
        Ok(())
    }

    async fn get_by_id(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT id, organization_id, provider, name, enabled, status, status_message,
                   last_sync_at, created_at, updated_at
            FROM cloud_providers
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CredentialBinding::try_from).transpose()
    }

    async fn get_by_tenant(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let rows = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT id, organization_id, provider, name, enabled, status, status_message,
                   last_sync_at, created_at, updated_at
            FROM cloud_providers
            WHERE organization_id = $1
            ORDER BY provider
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn get_by_tenant_and_kind(
        &self,
        organization_id: Uuid,
        kind: ProviderKind,
    ) -> Result<Option<CredentialBinding>, CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let row = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT id, organization_id, provider, name, credentials, enabled, status,
                   status_message, last_sync_at, created_at, updated_at
            FROM cloud_providers
            WHERE organization_id = $1 AND provider = $2
            "#,
        )
        .bind(organization_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(CredentialBinding::try_from).transpose()
    }

    async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        update: &BindingUpdate,
    ) -> Result<(), CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let result = sqlx::query(
            r#"
            UPDATE cloud_providers
            SET name = COALESCE($3, name),
                enabled = COALESCE($4, enabled),
                credentials = COALESCE($5, credentials),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            "#,
        )
        .bind(organization_id)
        .bind(id)
        .bind(&update.name)
        .bind(update.enabled)
        .bind(update.sealed_credentials.as_ref().map(|b| b.as_bytes()))
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "credential binding", id)
    }

    async fn list_enabled(&self) -> Result<Vec<CredentialBinding>, CoreError> {
        let rows = sqlx::query_as::<_, BindingRow>(
            r#"
            SELECT id, organization_id, provider, name, credentials, enabled, status,
                   status_message, last_sync_at, created_at, updated_at
            FROM cloud_providers
            WHERE enabled = TRUE
            ORDER BY organization_id, provider
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BindingStatus,
        message: &str,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cloud_providers
            SET status = $2, status_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "credential binding", id)
    }

    async fn update_last_sync(&self, id: Uuid) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cloud_providers
            SET last_sync_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "credential binding", id)
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<(), CoreError> {
        require_tenant(organization_id, "cloud_providers")?;
        let result =
            sqlx::query("DELETE FROM cloud_providers WHERE organization_id = $1 AND id = $2")
                .bind(organization_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        expect_row(result.rows_affected(), "credential binding", id)
    }
}
