// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types exchanged with the ML sidecar.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use finops_core::model::{Anomaly, ForecastPoint, Granularity, classify_severity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observed daily total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Day.
    pub date: NaiveDate,
    /// Spend on that day.
    pub amount: f64,
}

impl From<(NaiveDate, f64)> for DataPoint {
    fn from((date, amount): (NaiveDate, f64)) -> Self {
        Self { date, amount }
    }
}

/// Body of `POST /api/v1/forecast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    /// Tenant.
    pub organization_id: Uuid,
    /// Days of history contained in `data`.
    pub historical_days: u32,
    /// Periods to predict; also the cache horizon.
    pub forecast_days: u32,
    /// Output granularity.
    pub granularity: Granularity,
    /// Restrict to one service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_filter: Option<String>,
    /// Restrict to one account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_filter: Option<String>,
    /// Observed history.
    pub data: Vec<DataPoint>,
}

/// Body returned by the forecast endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    /// Tenant.
    pub organization_id: Uuid,
    /// When the model produced the forecast.
    pub generated_at: DateTime<Utc>,
    /// Model identifier.
    pub model_version: String,
    /// Predicted points in date order.
    pub forecasts: Vec<ForecastPoint>,
    /// Sum of predictions.
    pub total_forecasted: f64,
    /// Confidence level of the bounds.
    pub confidence_level: f64,
    /// Set when the response was served from the local cache.
    #[serde(default)]
    pub cached: bool,
}

/// Body of `POST /api/v1/anomalies/detect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRequest {
    /// Tenant.
    pub organization_id: Uuid,
    /// Observed history.
    pub data: Vec<DataPoint>,
    /// Detection sensitivity, lower is stricter.
    pub sensitivity: f64,
}

/// A point the sidecar flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedAnomaly {
    /// Day.
    pub date: NaiveDate,
    /// Observed spend.
    pub actual_amount: f64,
    /// Model expectation.
    pub expected_amount: f64,
    /// `actual - expected`.
    pub deviation: f64,
    /// Deviation as a percentage of expected.
    pub deviation_pct: f64,
    /// Anomaly score in `[0, 1]`.
    pub score: f64,
    /// The sidecar's own label; ignored in favour of the local classification.
    #[serde(default)]
    pub severity: String,
}

impl DetectedAnomaly {
    /// Convert into a stored anomaly. Severity is always recomputed from the
    /// deviation percentage.
    pub fn into_anomaly(self, organization_id: Uuid) -> Anomaly {
        let mut anomaly = Anomaly::detected(
            organization_id,
            self.date,
            self.expected_amount,
            self.actual_amount,
            self.score,
        );
        anomaly.deviation = self.deviation;
        anomaly.deviation_pct = self.deviation_pct;
        anomaly.severity = classify_severity(self.deviation_pct);
        anomaly
    }
}

/// Body returned by the anomaly endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResponse {
    /// Tenant.
    pub organization_id: Uuid,
    /// When the analysis ran.
    pub analyzed_at: DateTime<Utc>,
    /// Model identifier.
    pub model_version: String,
    /// Flagged points.
    pub anomalies: Vec<DetectedAnomaly>,
    /// Points analyzed.
    pub total_analyzed: u32,
    /// Points flagged.
    pub anomaly_count: u32,
    /// Threshold the model applied.
    pub threshold: f64,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    /// `healthy`, `disabled`, or whatever the sidecar reports.
    pub status: String,
    /// Sidecar version.
    #[serde(default)]
    pub version: String,
    /// Which models are loaded.
    #[serde(default)]
    pub models: HashMap<String, bool>,
}

impl HealthInfo {
    /// The value reported when the client is disabled.
    pub fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            version: String::new(),
            models: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finops_core::model::Severity;

    #[test]
    fn test_detected_anomaly_severity_is_local() {
        let detected = DetectedAnomaly {
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            actual_amount: 366.0,
            expected_amount: 100.0,
            deviation: 266.0,
            deviation_pct: 266.0,
            score: 0.97,
            severity: "low".into(),
        };
        let anomaly = detected.into_anomaly(Uuid::new_v4());
        assert_eq!(anomaly.severity, Severity::Critical);
        assert_eq!(anomaly.deviation, 266.0);
    }

    #[test]
    fn test_forecast_request_omits_empty_filters() {
        let req = ForecastRequest {
            organization_id: Uuid::nil(),
            historical_days: 90,
            forecast_days: 30,
            granularity: Granularity::Daily,
            service_filter: None,
            account_filter: None,
            data: vec![DataPoint::from((
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                12.5,
            ))],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("service_filter").is_none());
        assert_eq!(json["granularity"], "daily");
        assert_eq!(json["data"][0]["date"], "2025-01-01");
    }

    #[test]
    fn test_health_info_defaults() {
        let info: HealthInfo = serde_json::from_str(r#"{"status":"healthy"}"#).unwrap();
        assert_eq!(info.status, "healthy");
        assert!(info.models.is_empty());
        assert_eq!(HealthInfo::disabled().status, "disabled");
    }
}
