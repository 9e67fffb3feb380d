// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spend forecasts produced by the ML sidecar.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, Granularity};

/// One predicted bucket with its confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Bucket start.
    pub date: NaiveDate,
    /// Point prediction.
    pub predicted: f64,
    /// Lower bound of the interval.
    pub lower_bound: f64,
    /// Upper bound of the interval.
    pub upper_bound: f64,
}

/// A stored forecast. The most recent one per tenant is canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// When the model produced it.
    pub generated_at: DateTime<Utc>,
    /// Model version reported by the sidecar.
    pub model_version: String,
    /// Bucket size of `predictions`.
    pub granularity: Granularity,
    /// Predictions ordered by date.
    pub predictions: Vec<ForecastPoint>,
    /// Sum of predicted values.
    pub total_forecasted: f64,
    /// Confidence level of the intervals, e.g. `0.95`.
    pub confidence_level: f64,
    /// Currency of the amounts.
    pub currency: Currency,
    /// Service the forecast was restricted to.
    pub service_filter: Option<String>,
    /// Account the forecast was restricted to.
    pub account_filter: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Forecast {
    /// Build a forecast from model output, sorting points by date.
    pub fn new(
        organization_id: Uuid,
        model_version: impl Into<String>,
        granularity: Granularity,
        mut predictions: Vec<ForecastPoint>,
        confidence_level: f64,
    ) -> Self {
        predictions.sort_by_key(|p| p.date);
        let total_forecasted = predictions.iter().map(|p| p.predicted).sum();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            generated_at: now,
            model_version: model_version.into(),
            granularity,
            predictions,
            total_forecasted,
            confidence_level,
            currency: Currency::default(),
            service_filter: None,
            account_filter: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_orders_points_and_totals() {
        let day = |d| NaiveDate::from_ymd_opt(2025, 2, d).unwrap();
        let point = |d, v| ForecastPoint {
            date: day(d),
            predicted: v,
            lower_bound: v - 1.0,
            upper_bound: v + 1.0,
        };
        let f = Forecast::new(
            Uuid::new_v4(),
            "prophet-1",
            Granularity::Daily,
            vec![point(3, 30.0), point(1, 10.0), point(2, 20.0)],
            0.95,
        );
        let dates: Vec<_> = f.predictions.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(f.total_forecasted, 60.0);
    }
}
