// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost observations and the aggregate views computed over them.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, Granularity, ProviderKind};
use crate::error::CoreError;

/// One cost observation.
///
/// The natural key is (organization, date, provider, service, account, region,
/// resource). `resource_id` is empty when the record is not resource-scoped, so
/// that empty ids compare equal across rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// UTC day of the observation.
    pub date: NaiveDate,
    /// Amount in `currency`.
    pub amount: f64,
    /// Currency of `amount`.
    pub currency: Currency,
    /// Source cloud.
    pub provider: ProviderKind,
    /// Cloud service name.
    pub service: String,
    /// Cloud account / subscription.
    pub account_id: String,
    /// Cloud region.
    pub region: String,
    /// Resource identifier, empty when not resource-scoped.
    pub resource_id: String,
    /// Resource tags.
    pub tags: HashMap<String, String>,
    /// Whether the amount is an estimate.
    pub estimated: bool,
    /// When the row was first written.
    pub created_at: DateTime<Utc>,
    /// When the row was last overwritten.
    pub updated_at: DateTime<Utc>,
}

impl CostRecord {
    /// Create a record with a fresh id and timestamps.
    pub fn new(
        organization_id: Uuid,
        date: NaiveDate,
        provider: ProviderKind,
        service: impl Into<String>,
        amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            date,
            amount,
            currency: Currency::Usd,
            provider,
            service: service.into(),
            account_id: String::new(),
            region: String::new(),
            resource_id: String::new(),
            tags: HashMap::new(),
            estimated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the account.
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the resource.
    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }

    /// The natural key of this record.
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            organization_id: self.organization_id,
            date: self.date,
            provider: self.provider,
            service: self.service.clone(),
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

/// Business identity of a cost observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    /// Tenant.
    pub organization_id: Uuid,
    /// Day.
    pub date: NaiveDate,
    /// Cloud.
    pub provider: ProviderKind,
    /// Service.
    pub service: String,
    /// Account.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Resource, empty when not resource-scoped.
    pub resource_id: String,
}

/// Half-open day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day included.
    pub start: NaiveDate,
    /// First day excluded.
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        if end < start {
            return Err(CoreError::validation(format!(
                "date range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending with (and excluding) `end`.
    pub fn last_days(end: NaiveDate, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }

    /// Whether `date` falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

text_enum! {
    /// Dimension accepted by breakdown queries.
    pub enum CostDimension {
        /// Group by service.
        Service => "service",
        /// Group by provider.
        Provider => "provider",
        /// Group by account.
        Account => "account",
        /// Group by region.
        Region => "region",
    }
}

impl CostDimension {
    /// Column backing this dimension. Only these literals ever reach SQL.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Provider => "provider",
            Self::Account => "account_id",
            Self::Region => "region",
        }
    }

    /// Extract this dimension's value from a record.
    pub fn value_of<'a>(&self, record: &'a CostRecord) -> &'a str {
        match self {
            Self::Service => &record.service,
            Self::Provider => record.provider.as_str(),
            Self::Account => &record.account_id,
            Self::Region => &record.region,
        }
    }
}

text_enum! {
    /// Extra grouping axis for trend queries.
    pub enum TrendAxis {
        /// Split each bucket by provider.
        Provider => "provider",
        /// Split each bucket by service.
        Service => "service",
    }
}

/// One named slice of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownItem {
    /// Dimension value.
    pub name: String,
    /// Summed amount.
    pub amount: f64,
    /// Share of the total, in percent.
    pub percentage: f64,
}

/// Costs grouped by one dimension, largest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Dimension grouped by.
    pub dimension: CostDimension,
    /// Slices, sorted by amount descending.
    pub items: Vec<BreakdownItem>,
    /// Sum of all slices.
    pub total: f64,
    /// Currency of the amounts.
    pub currency: Currency,
}

/// Per-service slice of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    /// Service name.
    pub service: String,
    /// Summed amount.
    pub amount: f64,
    /// Share of the total, in percent.
    pub percentage: f64,
}

/// Total spend for a tenant and range, split by service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Sum over all services.
    pub total_cost: f64,
    /// Currency of the amounts.
    pub currency: Currency,
    /// Range summarized.
    pub range: DateRange,
    /// Per-service amounts, largest first.
    pub by_service: Vec<ServiceCost>,
}

/// One bucket of a trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket start.
    pub date: NaiveDate,
    /// Summed amount.
    pub total: f64,
    /// Provider, when grouped by provider.
    pub provider: Option<ProviderKind>,
    /// Service, when grouped by service.
    pub service: Option<String>,
    /// Rows that fell into the bucket.
    pub record_count: i64,
}

/// Bucketed spend over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTrend {
    /// Range covered.
    pub range: DateRange,
    /// Bucket size.
    pub granularity: Granularity,
    /// Buckets ordered by date (then provider, service).
    pub points: Vec<TrendPoint>,
    /// Sum of all buckets.
    pub total_cost: f64,
    /// `total_cost / range.days()`, 0 for an empty range.
    pub avg_daily_cost: f64,
}

impl CostBreakdown {
    /// Rank `(name, amount)` groups and compute percentages.
    pub fn from_groups(
        dimension: CostDimension,
        currency: Currency,
        groups: Vec<(String, f64)>,
    ) -> Self {
        let (items, total) = rank_with_percentages(groups);
        Self {
            dimension,
            items,
            total,
            currency,
        }
    }
}

impl CostSummary {
    /// Rank per-service groups; percentages sum to 100 when the total is non-zero.
    pub fn from_groups(
        range: DateRange,
        currency: Currency,
        groups: Vec<(String, f64)>,
    ) -> Self {
        let (items, total_cost) = rank_with_percentages(groups);
        Self {
            total_cost,
            currency,
            range,
            by_service: items
                .into_iter()
                .map(|item| ServiceCost {
                    service: item.name,
                    amount: item.amount,
                    percentage: item.percentage,
                })
                .collect(),
        }
    }
}

impl CostTrend {
    /// Order points by bucket and derive the totals.
    pub fn from_points(
        range: DateRange,
        granularity: Granularity,
        mut points: Vec<TrendPoint>,
    ) -> Self {
        points.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.provider.cmp(&b.provider))
                .then_with(|| a.service.cmp(&b.service))
        });
        let total_cost: f64 = points.iter().map(|p| p.total).sum();
        Self {
            avg_daily_cost: average_per_day(total_cost, &range),
            range,
            granularity,
            points,
            total_cost,
        }
    }
}

/// Tag keys consulted, in order, to attribute a cost to an owner.
pub const ALLOCATION_TAG_KEYS: [&str; 2] = ["team", "project"];

/// Owner of costs that carry none of [`ALLOCATION_TAG_KEYS`].
pub const UNALLOCATED: &str = "unallocated";

/// Tags every resource is expected to carry.
pub const REQUIRED_TAGS: [&str; 4] = ["team", "project", "environment", "cost-center"];

/// Most untagged resources returned in one listing.
pub const UNTAGGED_LIMIT: i64 = 100;

/// Days of history scanned for untagged resources.
pub const UNTAGGED_WINDOW_DAYS: i64 = 30;

/// Owner a record's cost is attributed to. Empty tag values count as absent.
pub fn allocation_target(tags: &HashMap<String, String>) -> &str {
    ALLOCATION_TAG_KEYS
        .iter()
        .find_map(|key| tags.get(*key).filter(|v| !v.is_empty()))
        .map_or(UNALLOCATED, String::as_str)
}

/// `required` keys with no non-empty value in `tags`, in `required` order.
pub fn missing_tags(tags: &HashMap<String, String>, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|key| tags.get(key.as_str()).is_none_or(|v| v.is_empty()))
        .cloned()
        .collect()
}

/// Spend attributed to one owner (team or project), split by service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAllocation {
    /// Owner name, or [`UNALLOCATED`].
    pub target: String,
    /// Sum over all services.
    pub total_cost: f64,
    /// Currency of the amounts.
    pub currency: Currency,
    /// Range allocated.
    pub range: DateRange,
    /// Per-service amounts, largest first; percentages are of `total_cost`.
    pub by_service: Vec<ServiceCost>,
}

impl CostAllocation {
    /// Fold `(target, service, amount)` groups into allocations, largest
    /// owner first.
    pub fn from_groups(
        range: DateRange,
        currency: Currency,
        groups: Vec<(String, String, f64)>,
    ) -> Vec<Self> {
        let mut by_target: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        for (target, service, amount) in groups {
            by_target.entry(target).or_default().push((service, amount));
        }
        let mut allocations: Vec<Self> = by_target
            .into_iter()
            .map(|(target, services)| {
                let summary = CostSummary::from_groups(range, currency, services);
                Self {
                    target,
                    total_cost: summary.total_cost,
                    currency,
                    range,
                    by_service: summary.by_service,
                }
            })
            .collect();
        allocations.sort_by(|a, b| {
            b.total_cost
                .total_cmp(&a.total_cost)
                .then_with(|| a.target.cmp(&b.target))
        });
        allocations
    }
}

/// A resource-scoped cost source missing one or more required tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntaggedResource {
    /// Resource identifier.
    pub resource_id: String,
    /// Service the resource belongs to.
    pub resource_type: String,
    /// Source cloud.
    pub provider: ProviderKind,
    /// Cloud region.
    pub region: String,
    /// Spend over the scanned window.
    pub cost: f64,
    /// Required tags absent from the resource's latest record.
    pub missing_tags: Vec<String>,
}

/// First day of the bucket containing `date`.
///
/// Cost rows are day-granular, so hourly buckets collapse to days.
pub fn bucket_start(granularity: Granularity, date: NaiveDate) -> NaiveDate {
    match granularity {
        Granularity::Hourly | Granularity::Daily => date,
        Granularity::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
        Granularity::Monthly => date.with_day(1).unwrap_or(date),
    }
}

/// Sort `(name, amount)` pairs descending and attach percentages of the total.
pub fn rank_with_percentages(mut groups: Vec<(String, f64)>) -> (Vec<BreakdownItem>, f64) {
    groups.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let total: f64 = groups.iter().map(|(_, amount)| amount).sum();
    let items = groups
        .into_iter()
        .map(|(name, amount)| BreakdownItem {
            percentage: if total > 0.0 {
                amount / total * 100.0
            } else {
                0.0
            },
            name,
            amount,
        })
        .collect();
    (items, total)
}

/// Average per day, 0 for an empty range.
pub fn average_per_day(total: f64, range: &DateRange) -> f64 {
    match range.days() {
        0 => 0.0,
        days => total / days as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_natural_key_treats_empty_resource_as_equal() {
        let org = Uuid::new_v4();
        let a = CostRecord::new(org, day("2025-01-01"), ProviderKind::Aws, "EC2", 10.0)
            .with_account("acct-A")
            .with_region("eu-west-2");
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.amount = 20.0;
        assert_eq!(a.natural_key(), b.natural_key());
        assert_ne!(a.natural_key(), b.with_resource("i-123").natural_key());
    }

    #[test]
    fn test_rank_with_percentages() {
        let (items, total) = rank_with_percentages(vec![
            ("S3".into(), 25.0),
            ("EC2".into(), 50.0),
            ("RDS".into(), 25.0),
        ]);
        assert_eq!(total, 100.0);
        assert_eq!(items[0].name, "EC2");
        assert_eq!(items[0].percentage, 50.0);
        let sum: f64 = items.iter().map(|i| i.percentage).sum();
        assert!((sum - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_allocation_target_fallback() {
        let mut tags = HashMap::new();
        assert_eq!(allocation_target(&tags), UNALLOCATED);
        tags.insert("project".to_string(), "atlas".to_string());
        assert_eq!(allocation_target(&tags), "atlas");
        tags.insert("team".to_string(), String::new());
        assert_eq!(allocation_target(&tags), "atlas");
        tags.insert("team".to_string(), "platform".to_string());
        assert_eq!(allocation_target(&tags), "platform");
    }

    #[test]
    fn test_allocations_rank_owners_and_services() {
        let range = DateRange::new(day("2025-01-01"), day("2025-02-01")).unwrap();
        let allocations = CostAllocation::from_groups(
            range,
            Currency::Usd,
            vec![
                ("data".into(), "S3".into(), 30.0),
                ("platform".into(), "EC2".into(), 75.0),
                ("platform".into(), "RDS".into(), 25.0),
            ],
        );
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].target, "platform");
        assert_eq!(allocations[0].total_cost, 100.0);
        assert_eq!(allocations[0].by_service[0].service, "EC2");
        assert_eq!(allocations[0].by_service[0].percentage, 75.0);
        assert_eq!(allocations[1].by_service[0].percentage, 100.0);
    }

    #[test]
    fn test_missing_tags_keeps_required_order() {
        let tags = HashMap::from([("project".to_string(), "atlas".to_string())]);
        let required: Vec<String> = REQUIRED_TAGS.iter().map(|t| t.to_string()).collect();
        assert_eq!(missing_tags(&tags, &required), ["team", "environment", "cost-center"]);
    }

    #[test]
    fn test_rank_zero_total() {
        let (items, total) = rank_with_percentages(vec![("EC2".into(), 0.0)]);
        assert_eq!(total, 0.0);
        assert_eq!(items[0].percentage, 0.0);
    }

    #[test]
    fn test_bucket_start() {
        let d = day("2025-01-15"); // Wednesday
        assert_eq!(bucket_start(Granularity::Daily, d), d);
        assert_eq!(bucket_start(Granularity::Weekly, d), day("2025-01-13"));
        assert_eq!(bucket_start(Granularity::Monthly, d), day("2025-01-01"));
    }

    #[test]
    fn test_average_per_day() {
        let range = DateRange::new(day("2025-01-01"), day("2025-01-11")).unwrap();
        assert_eq!(average_per_day(100.0, &range), 10.0);
        let empty = DateRange::new(day("2025-01-01"), day("2025-01-01")).unwrap();
        assert_eq!(average_per_day(100.0, &empty), 0.0);
        assert!(DateRange::new(day("2025-01-02"), day("2025-01-01")).is_err());
    }

    #[test]
    fn test_summary_from_groups_is_consistent() {
        let range = DateRange::new(day("2025-01-01"), day("2025-02-01")).unwrap();
        let summary = CostSummary::from_groups(
            range,
            Currency::Usd,
            vec![("EC2".into(), 33.33), ("S3".into(), 33.33), ("RDS".into(), 33.34)],
        );
        let sum: f64 = summary.by_service.iter().map(|s| s.amount).sum();
        assert!((sum - summary.total_cost).abs() < 0.01);
        let pct: f64 = summary.by_service.iter().map(|s| s.percentage).sum();
        assert!((pct - 100.0).abs() < 0.1);
        assert_eq!(summary.by_service[0].service, "RDS");
    }

    #[test]
    fn test_trend_from_points_orders_and_averages() {
        let range = DateRange::new(day("2025-01-01"), day("2025-01-05")).unwrap();
        let point = |d: &str, total| TrendPoint {
            date: day(d),
            total,
            provider: None,
            service: None,
            record_count: 1,
        };
        let trend = CostTrend::from_points(
            range,
            Granularity::Daily,
            vec![point("2025-01-02", 30.0), point("2025-01-01", 10.0)],
        );
        assert_eq!(trend.points[0].date, day("2025-01-01"));
        assert_eq!(trend.total_cost, 40.0);
        assert_eq!(trend.avg_daily_cost, 10.0);
    }

    #[test]
    fn test_dimension_columns_are_whitelisted() {
        use std::str::FromStr;
        assert_eq!(CostDimension::Account.column(), "account_id");
        assert!(CostDimension::from_str("service; DROP TABLE costs").is_err());
    }
}
