// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for finops-core integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use finops_core::model::{CostRecord, Organization, ProviderKind};
use finops_core::persistence::OrganizationRepository;
use finops_core::persistence::postgres::PostgresOrganizationRepository;

/// Skip the test when no database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Connect to TEST_DATABASE_URL and apply migrations.
pub async fn pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    finops_core::migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

/// Insert a fresh organization so foreign keys hold.
pub async fn organization(pool: &PgPool) -> Uuid {
    let org = Organization::new(format!("it-{}", Uuid::new_v4()));
    PostgresOrganizationRepository::new(pool.clone())
        .create(&org)
        .await
        .expect("create organization");
    org.id
}

/// 2025-01-`d`.
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).expect("valid day")
}

/// One AWS record per `(service, amount)` on `date`.
pub fn aws_records(org: Uuid, date: NaiveDate, rows: &[(&str, f64)]) -> Vec<CostRecord> {
    rows.iter()
        .map(|(service, amount)| {
            CostRecord::new(org, date, ProviderKind::Aws, *service, *amount)
                .with_account("123456789012")
                .with_region("us-east-1")
        })
        .collect()
}
