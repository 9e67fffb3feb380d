// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost anomalies.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// Anomaly severity, derived from the absolute deviation percentage.
    pub enum Severity {
        /// Under 25%.
        Low => "low",
        /// 25% up to 50%.
        Medium => "medium",
        /// 50% up to 100%.
        High => "high",
        /// 100% or more.
        Critical => "critical",
    }
}

text_enum! {
    /// Anomaly triage status.
    pub enum AnomalyStatus {
        /// Newly detected.
        Open => "open",
        /// Someone has seen it.
        Acknowledged => "acknowledged",
        /// Root cause addressed.
        Resolved => "resolved",
        /// Not a real anomaly.
        Dismissed => "dismissed",
    }
}

/// Classify an anomaly by `|deviation_pct|`.
pub fn classify_severity(deviation_pct: f64) -> Severity {
    let pct = deviation_pct.abs();
    if pct >= 100.0 {
        Severity::Critical
    } else if pct >= 50.0 {
        Severity::High
    } else if pct >= 25.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A detected deviation between expected and actual spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Day the anomaly occurred.
    pub date: NaiveDate,
    /// Spend the model expected.
    pub expected_amount: f64,
    /// Spend observed.
    pub actual_amount: f64,
    /// `actual - expected`.
    pub deviation: f64,
    /// Deviation as a percentage of expected.
    pub deviation_pct: f64,
    /// Model score in `[0, 1]`.
    pub score: f64,
    /// Severity derived from `deviation_pct`.
    pub severity: Severity,
    /// Triage status.
    pub status: AnomalyStatus,
    /// Attributed service.
    pub service: Option<String>,
    /// Attributed account.
    pub account_id: Option<String>,
    /// Attributed region.
    pub region: Option<String>,
    /// Free-form root cause.
    pub root_cause: Option<String>,
    /// When detection ran.
    pub detected_at: DateTime<Utc>,
    /// When it was acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged it.
    pub acknowledged_by: Option<String>,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Anomaly {
    /// Build an open anomaly, deriving deviation and severity.
    pub fn detected(
        organization_id: Uuid,
        date: NaiveDate,
        expected_amount: f64,
        actual_amount: f64,
        score: f64,
    ) -> Self {
        let deviation = actual_amount - expected_amount;
        let deviation_pct = if expected_amount != 0.0 {
            deviation / expected_amount * 100.0
        } else {
            0.0
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            date,
            expected_amount,
            actual_amount,
            deviation,
            deviation_pct,
            score: score.clamp(0.0, 1.0),
            severity: classify_severity(deviation_pct),
            status: AnomalyStatus::Open,
            service: None,
            account_id: None,
            region: None,
            root_cause: None,
            detected_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// List filter for anomalies.
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    /// Restrict to these statuses.
    pub statuses: Vec<AnomalyStatus>,
    /// Restrict to these severities.
    pub severities: Vec<Severity>,
}

/// Aggregate view of a tenant's anomalies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    /// All anomalies.
    pub total: i64,
    /// Anomalies still open.
    pub open: i64,
    /// Counts per severity.
    pub by_severity: BTreeMap<Severity, i64>,
    /// Sum of absolute deviations.
    pub total_deviation: f64,
    /// Mean absolute deviation.
    pub avg_deviation: f64,
}

impl AnomalySummary {
    /// Fold a set of anomalies into a summary.
    pub fn from_anomalies<'a>(anomalies: impl IntoIterator<Item = &'a Anomaly>) -> Self {
        let mut summary = Self::default();
        for anomaly in anomalies {
            summary.total += 1;
            if anomaly.status == AnomalyStatus::Open {
                summary.open += 1;
            }
            *summary.by_severity.entry(anomaly.severity).or_default() += 1;
            summary.total_deviation += anomaly.deviation.abs();
        }
        if summary.total > 0 {
            summary.avg_deviation = summary.total_deviation / summary.total as f64;
        }
        summary
    }
}
