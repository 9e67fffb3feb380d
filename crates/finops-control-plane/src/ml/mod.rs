// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client for the out-of-process ML sidecar.
//!
//! Every call passes through a [`CircuitBreaker`]; forecasts are additionally
//! served from a [`ForecastCache`] keyed by tenant and horizon. A disabled
//! client never touches the network.
//!
//! Endpoints consumed:
//! - `GET /health`
//! - `POST /api/v1/forecast`
//! - `POST /api/v1/anomalies/detect`

pub mod breaker;
pub mod cache;
pub mod types;

use std::time::Duration;

use finops_core::ErrorKind;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cache::ForecastCache;
pub use types::*;

/// ML client errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MlError {
    /// The client is configured disabled.
    #[error("ML sidecar is disabled")]
    Disabled,

    /// The breaker is open; the call was not attempted.
    #[error("ML sidecar circuit is open")]
    CircuitOpen,

    /// Transport failure or timeout.
    #[error("ML sidecar request failed: {0}")]
    Upstream(String),

    /// The sidecar answered with a non-success status.
    #[error("ML sidecar returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("ML sidecar response could not be decoded: {0}")]
    Decode(String),
}

impl MlError {
    /// Map onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Disabled => ErrorKind::Unsupported,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Upstream(_) | Self::Status { .. } | Self::Decode(_) => ErrorKind::Upstream,
        }
    }
}

/// ML client settings.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Sidecar base URL, without trailing slash.
    pub base_url: String,
    /// When false every call except health returns [`MlError::Disabled`].
    pub enabled: bool,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Breaker parameters.
    pub breaker: CircuitBreakerConfig,
    /// Forecast cache lifetime.
    pub cache_ttl: Duration,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            enabled: true,
            timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
            cache_ttl: cache::DEFAULT_TTL,
        }
    }
}

/// Releases a breaker admission. Dropping it unresolved (the caller's future
/// was cancelled) counts as a failure so half-open probes are never leaked.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            resolved: false,
        }
    }

    fn resolve(mut self, ok: bool) {
        self.resolved = true;
        if ok {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.record_failure();
        }
    }
}

/// Resilient ML sidecar client.
#[derive(Debug)]
pub struct MlClient {
    base_url: String,
    enabled: bool,
    http: reqwest::Client,
    breaker: CircuitBreaker,
    cache: ForecastCache,
}

impl MlClient {
    /// Build a client.
    pub fn new(config: MlClientConfig) -> Result<Self, MlError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MlError::Upstream(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            enabled: config.enabled,
            http,
            breaker: CircuitBreaker::new(config.breaker),
            cache: ForecastCache::new(config.cache_ttl),
        })
    }

    /// A client that never calls out.
    pub fn disabled() -> Self {
        Self {
            base_url: String::new(),
            enabled: false,
            http: reqwest::Client::new(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            cache: ForecastCache::default(),
        }
    }

    /// Whether the client calls the sidecar.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Breaker state, for health reporting.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// The forecast cache.
    pub fn cache(&self) -> &ForecastCache {
        &self.cache
    }

    /// Sidecar health. Reports `disabled` without a network call when disabled.
    pub async fn health(&self) -> Result<HealthInfo, MlError> {
        if !self.enabled {
            return Ok(HealthInfo::disabled());
        }
        let url = format!("{}/health", self.base_url);
        self.guarded(self.http.get(url)).await
    }

    /// Forecast spend, serving fresh cached responses first.
    pub async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse, MlError> {
        if !self.enabled {
            return Err(MlError::Disabled);
        }
        if let Some(hit) = self
            .cache
            .get(request.organization_id, request.forecast_days)
        {
            debug!(organization_id = %request.organization_id, "Forecast served from cache");
            return Ok(hit);
        }

        let mut response: ForecastResponse = self.post("/api/v1/forecast", request).await?;
        response.cached = false;
        self.cache.put(
            request.organization_id,
            request.forecast_days,
            response.clone(),
        );
        Ok(response)
    }

    /// Detect anomalies in a series.
    pub async fn detect_anomalies(
        &self,
        request: &AnomalyRequest,
    ) -> Result<AnomalyResponse, MlError> {
        if !self.enabled {
            return Err(MlError::Disabled);
        }
        self.post("/api/v1/anomalies/detect", request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, MlError> {
        let url = format!("{}{}", self.base_url, path);
        self.guarded(self.http.post(url).json(body)).await
    }

    async fn guarded<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MlError> {
        if !self.breaker.allow() {
            return Err(MlError::CircuitOpen);
        }
        let admission = Admission::new(&self.breaker);
        let result = Self::send(request).await;
        admission.resolve(result.is_ok());
        result
    }

    async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, MlError> {
        let response = request
            .send()
            .await
            .map_err(|e| MlError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MlError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MlError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use finops_core::model::Granularity;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_failures: u32) -> MlClient {
        MlClient::new(MlClientConfig {
            base_url: server.uri(),
            breaker: CircuitBreakerConfig {
                max_failures,
                reset_timeout: Duration::from_secs(10),
                half_open_limit: 1,
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn forecast_request(org: Uuid) -> ForecastRequest {
        ForecastRequest {
            organization_id: org,
            historical_days: 90,
            forecast_days: 30,
            granularity: Granularity::Daily,
            service_filter: None,
            account_filter: None,
            data: (1..=14)
                .map(|d| DataPoint {
                    date: NaiveDate::from_ymd_opt(2025, 1, d).unwrap(),
                    amount: 100.0,
                })
                .collect(),
        }
    }

    fn forecast_body(org: Uuid) -> serde_json::Value {
        json!({
            "organization_id": org,
            "generated_at": Utc::now(),
            "model_version": "prophet-1.1",
            "forecasts": [
                {"date": "2025-01-15", "predicted": 101.0, "lower_bound": 90.0, "upper_bound": 110.0}
            ],
            "total_forecasted": 101.0,
            "confidence_level": 0.95
        })
    }

    #[tokio::test]
    async fn test_disabled_client() {
        let client = MlClient::disabled();
        assert_eq!(client.health().await.unwrap().status, "disabled");
        assert!(matches!(
            client.forecast(&forecast_request(Uuid::new_v4())).await,
            Err(MlError::Disabled)
        ));
        let req = AnomalyRequest {
            organization_id: Uuid::new_v4(),
            data: Vec::new(),
            sensitivity: 0.1,
        };
        assert!(matches!(
            client.detect_anomalies(&req).await,
            Err(MlError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_forecast_is_cached() {
        let server = MockServer::start().await;
        let org = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/v1/forecast"))
            .and(body_partial_json(json!({"forecast_days": 30})))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(org)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let first = client.forecast(&forecast_request(org)).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.forecasts.len(), 1);

        let second = client.forecast(&forecast_request(org)).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.total_forecasted, 101.0);
    }

    #[tokio::test]
    async fn test_detect_anomalies() {
        let server = MockServer::start().await;
        let org = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/v1/anomalies/detect"))
            .and(body_partial_json(json!({"sensitivity": 0.1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organization_id": org,
                "analyzed_at": Utc::now(),
                "model_version": "iforest-2",
                "anomalies": [{
                    "date": "2025-01-05",
                    "actual_amount": 192.0,
                    "expected_amount": 100.0,
                    "deviation": 92.0,
                    "deviation_pct": 92.0,
                    "score": 0.8,
                    "severity": "high"
                }],
                "total_analyzed": 30,
                "anomaly_count": 1,
                "threshold": 0.1
            })))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let response = client
            .detect_anomalies(&AnomalyRequest {
                organization_id: org,
                data: Vec::new(),
                sensitivity: 0.1,
            })
            .await
            .unwrap();
        assert_eq!(response.anomaly_count, 1);
        assert_eq!(response.anomalies[0].deviation_pct, 92.0);
    }

    #[tokio::test]
    async fn test_failures_open_the_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/forecast"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let org = Uuid::new_v4();
        for _ in 0..3 {
            let err = client.forecast(&forecast_request(org)).await.unwrap_err();
            assert!(matches!(err, MlError::Status { status: 503, .. }));
        }
        assert_eq!(client.breaker_state(), CircuitState::Open);

        let err = client.forecast(&forecast_request(org)).await.unwrap_err();
        assert!(matches!(err, MlError::CircuitOpen));
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn test_decode_failure_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client(&server, 1);
        assert!(matches!(client.health().await, Err(MlError::Decode(_))));
        assert_eq!(client.breaker_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "healthy",
                "version": "0.3.0",
                "models": {"prophet": true, "isolation_forest": true}
            })))
            .mount(&server)
            .await;

        let info = client(&server, 3).health().await.unwrap();
        assert_eq!(info.status, "healthy");
        assert_eq!(info.models.get("prophet"), Some(&true));
    }
}
