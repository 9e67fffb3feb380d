// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL repositories.
//!
//! Queries are runtime-checked (`sqlx::query`/`query_as`). Enumerations are
//! stored as text and JSON-shaped fields as JSONB. Rows are read into
//! `*Row` structs and converted into model types, so a malformed stored value
//! surfaces as [`CoreError::Corrupt`] instead of a panic.

mod analytics;
mod costs;
mod credentials;
mod organizations;
mod remediation;

pub use analytics::{
    PostgresAnomalyRepository, PostgresBudgetRepository, PostgresForecastRepository,
    PostgresRecommendationRepository,
};
pub use costs::PostgresCostRepository;
pub use credentials::PostgresCredentialRepository;
pub use organizations::PostgresOrganizationRepository;
pub use remediation::PostgresRemediationRepository;

use std::str::FromStr;

use crate::error::CoreError;

/// Parse a stored text enum, reporting bad values as corrupt data.
pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    value
        .parse()
        .map_err(|_| CoreError::Corrupt(format!("unexpected {column} value: {value}")))
}

/// Map a unique-constraint violation onto [`CoreError::Duplicate`].
pub(crate) fn map_unique(err: sqlx::Error, entity: &'static str, detail: String) -> CoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CoreError::Duplicate { entity, detail }
        }
        _ => CoreError::Database(err),
    }
}

/// Turn a zero-row write into [`CoreError::NotFound`].
pub(crate) fn expect_row(
    rows_affected: u64,
    entity: &'static str,
    id: uuid::Uuid,
) -> Result<(), CoreError> {
    if rows_affected == 0 {
        return Err(CoreError::not_found(entity, id));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Option<sqlx::PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = sqlx::PgPool::connect(&url).await.ok()?;
    crate::migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;

    #[test]
    fn test_parse_column() {
        let kind: ProviderKind = parse_column("provider", "azure").unwrap();
        assert_eq!(kind, ProviderKind::Azure);
        let err = parse_column::<ProviderKind>("provider", "ibm").unwrap_err();
        assert!(matches!(err, CoreError::Corrupt(_)));
    }

    #[test]
    fn test_expect_row() {
        assert!(expect_row(1, "budget", uuid::Uuid::nil()).is_ok());
        let err = expect_row(0, "budget", uuid::Uuid::nil()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "budget", .. }));
    }
}
