// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost ingestion against PostgreSQL: natural-key idempotence and aggregate
//! consistency between summary, breakdown, trend and spend, plus tag-based
//! allocation.

mod common;

use finops_core::model::{
    BudgetFilters, CostDimension, CostRecord, DateRange, Granularity, ProviderKind, REQUIRED_TAGS,
    UNALLOCATED,
};
use finops_core::persistence::CostRepository;
use finops_core::persistence::postgres::PostgresCostRepository;

use common::{aws_records, day};

#[tokio::test]
async fn test_reingesting_same_window_is_idempotent() {
    skip_if_no_db!();
    let Some(pool) = common::pool().await else {
        return;
    };
    let org = common::organization(&pool).await;
    let repo = PostgresCostRepository::new(pool);
    let range = DateRange::new(day(1), day(2)).unwrap();

    let first = aws_records(org, day(1), &[("EC2", 10.0), ("S3", 2.5), ("RDS", 7.5)]);
    assert_eq!(repo.upsert_batch(&first).await.unwrap(), 3);
    repo.upsert_batch(&first).await.unwrap();
    assert_eq!(repo.list(org, range).await.unwrap().len(), 3);

    let revised = aws_records(org, day(1), &[("EC2", 12.0), ("S3", 2.5), ("RDS", 7.5)]);
    repo.upsert_batch(&revised).await.unwrap();

    let stored = repo.list(org, range).await.unwrap();
    assert_eq!(stored.len(), 3);
    let ec2 = stored.iter().find(|r| r.service == "EC2").unwrap();
    assert_eq!(ec2.amount, 12.0);
    let original = first.iter().find(|r| r.service == "EC2").unwrap();
    assert_eq!(ec2.id, original.id);
}

#[tokio::test]
async fn test_aggregates_agree() {
    skip_if_no_db!();
    let Some(pool) = common::pool().await else {
        return;
    };
    let org = common::organization(&pool).await;
    let repo = PostgresCostRepository::new(pool);

    let mut records = aws_records(org, day(1), &[("EC2", 40.0), ("S3", 10.0)]);
    records.extend(aws_records(org, day(2), &[("EC2", 30.0), ("S3", 20.0)]));
    repo.upsert_batch(&records).await.unwrap();

    let range = DateRange::new(day(1), day(3)).unwrap();
    let summary = repo.summary(org, range).await.unwrap();
    assert_eq!(summary.total_cost, 100.0);
    assert_eq!(summary.by_service[0].service, "EC2");
    assert_eq!(summary.by_service[0].percentage, 70.0);

    let breakdown = repo
        .breakdown(org, range, CostDimension::Service)
        .await
        .unwrap();
    assert_eq!(breakdown.total, summary.total_cost);

    let trend = repo
        .trend(org, range, Granularity::Daily, &[])
        .await
        .unwrap();
    assert_eq!(trend.points.len(), 2);
    assert_eq!(trend.total_cost, 100.0);
    assert_eq!(trend.avg_daily_cost, 50.0);

    let daily = repo.daily_totals(org, range).await.unwrap();
    assert_eq!(daily, vec![(day(1), 50.0), (day(2), 50.0)]);

    let only_s3 = BudgetFilters {
        providers: vec![ProviderKind::Aws],
        services: vec!["S3".to_string()],
        ..Default::default()
    };
    assert_eq!(repo.spend(org, range, &only_s3).await.unwrap(), 30.0);
    assert_eq!(
        repo.spend(org, range, &BudgetFilters::default()).await.unwrap(),
        100.0
    );
}

#[tokio::test]
async fn test_costs_do_not_leak_across_tenants() {
    skip_if_no_db!();
    let Some(pool) = common::pool().await else {
        return;
    };
    let mine = common::organization(&pool).await;
    let theirs = common::organization(&pool).await;
    let repo = PostgresCostRepository::new(pool);

    repo.upsert_batch(&aws_records(theirs, day(5), &[("EC2", 999.0)]))
        .await
        .unwrap();
    let range = DateRange::new(day(1), day(10)).unwrap();
    let summary = repo.summary(mine, range).await.unwrap();
    assert_eq!(summary.total_cost, 0.0);
    assert!(summary.by_service.is_empty());
}

fn tagged(record: CostRecord, resource: &str, tags: &[(&str, &str)]) -> CostRecord {
    let mut record = record.with_resource(resource);
    record.tags = tags
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    record
}

#[tokio::test]
async fn test_allocations_by_owner_tag() {
    skip_if_no_db!();
    let Some(pool) = common::pool().await else {
        return;
    };
    let mine = common::organization(&pool).await;
    let theirs = common::organization(&pool).await;
    let repo = PostgresCostRepository::new(pool);

    let mut records = aws_records(mine, day(1), &[("EC2", 60.0), ("S3", 20.0), ("RDS", 15.0)]);
    records.extend(aws_records(mine, day(1), &[("Lambda", 5.0)]));
    let records = vec![
        tagged(records[0].clone(), "i-1", &[("team", "platform"), ("project", "atlas")]),
        tagged(records[1].clone(), "bucket-1", &[("team", "platform")]),
        tagged(records[2].clone(), "db-1", &[("team", ""), ("project", "atlas")]),
        tagged(records[3].clone(), "fn-1", &[]),
    ];
    repo.upsert_batch(&records).await.unwrap();
    let foreign = aws_records(theirs, day(1), &[("EC2", 999.0)]);
    repo.upsert_batch(&[tagged(foreign[0].clone(), "i-9", &[("team", "platform")])])
        .await
        .unwrap();

    let range = DateRange::new(day(1), day(2)).unwrap();
    let allocations = repo.allocations(mine, range).await.unwrap();
    let targets: Vec<(&str, f64)> = allocations
        .iter()
        .map(|a| (a.target.as_str(), a.total_cost))
        .collect();
    assert_eq!(targets, [("platform", 80.0), ("atlas", 15.0), (UNALLOCATED, 5.0)]);
    assert_eq!(allocations[0].by_service[0].percentage, 75.0);

    let required: Vec<String> = REQUIRED_TAGS.iter().map(|t| t.to_string()).collect();
    let untagged = repo.untagged_resources(mine, range, &required).await.unwrap();
    assert_eq!(untagged.len(), 4);
    assert_eq!(untagged[0].resource_id, "i-1");
    assert_eq!(untagged[0].missing_tags, ["environment", "cost-center"]);
    assert_eq!(untagged[2].resource_id, "db-1");
    assert_eq!(untagged[2].missing_tags, ["team", "environment", "cost-center"]);
    assert!(untagged.iter().all(|r| r.resource_id != "i-9"));
}
