// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure provider backed by Cost Management and Advisor.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use finops_core::model::{
    AzureCredentials, Currency, Granularity, Impact, ProviderKind, RecommendationKind,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    CloudProvider, CostItem, CostRequest, CostResponse, GroupBy, HealthStatus, ProviderError,
    ProviderRecommendation, RecommendationRequest, RecommendationResponse, Result, normalize,
};
use crate::cloud::azure::{AdvisorRecommendation, AzureClient, AzureEndpoints, QueryResult};

/// Azure provider for one subscription.
#[derive(Debug)]
pub struct AzureProvider {
    name: String,
    client: AzureClient,
}

impl AzureProvider {
    /// Wrap a client.
    pub fn new(name: impl Into<String>, client: AzureClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Build from credentials.
    pub fn from_credentials(
        http: reqwest::Client,
        credentials: AzureCredentials,
        endpoints: AzureEndpoints,
    ) -> Self {
        Self::new("azure", AzureClient::new(http, credentials, endpoints))
    }

    /// Factory constructor sharing one HTTP client.
    pub fn constructor(
        http: reqwest::Client,
        endpoints: AzureEndpoints,
    ) -> impl Fn(AzureCredentials) -> Result<Box<dyn CloudProvider>> + Send + Sync + 'static {
        move |credentials| {
            if credentials.tenant_id.is_empty()
                || credentials.client_id.is_empty()
                || credentials.client_secret.is_empty()
                || credentials.subscription_id.is_empty()
            {
                return Err(ProviderError::Credentials(
                    "tenant_id, client_id, client_secret and subscription_id are required".into(),
                ));
            }
            Ok(Box::new(Self::from_credentials(
                http.clone(),
                credentials,
                endpoints.clone(),
            )) as Box<dyn CloudProvider>)
        }
    }

    fn query_body(request: &CostRequest) -> Value {
        let granularity = match request.granularity {
            Granularity::Monthly => "Monthly",
            _ => "Daily",
        };
        let mut grouping: Vec<Value> = request
            .group_by
            .iter()
            .map(|axis| json!({"type": "Dimension", "name": dimension_name(*axis)}))
            .collect();
        if grouping.is_empty() {
            grouping.push(json!({"type": "Dimension", "name": "ServiceName"}));
        }

        let mut dataset = json!({
            "granularity": granularity,
            "aggregation": {"totalCost": {"name": "Cost", "function": "Sum"}},
            "grouping": grouping,
        });
        let mut dimensions = Vec::new();
        for (name, values) in [
            ("ServiceName", &request.filters.services),
            ("SubscriptionName", &request.filters.account_ids),
            ("ResourceLocation", &request.filters.regions),
        ] {
            if !values.is_empty() {
                dimensions.push(json!({"dimensions": {"name": name, "operator": "In", "values": values}}));
            }
        }
        match dimensions.len() {
            0 => {}
            1 => dataset["filter"] = dimensions.remove(0),
            _ => dataset["filter"] = json!({"and": dimensions}),
        }

        json!({
            "type": "ActualCost",
            "timeframe": "Custom",
            "timePeriod": {
                "from": format!("{}T00:00:00Z", request.start),
                "to": format!("{}T00:00:00Z", request.end),
            },
            "dataset": dataset,
        })
    }
}

fn dimension_name(axis: GroupBy) -> &'static str {
    match axis {
        GroupBy::Service => "ServiceName",
        GroupBy::Account => "SubscriptionName",
        GroupBy::Region => "ResourceLocation",
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()).or_else(|| Some(n.to_string())),
        _ => None,
    }
}

fn cell_amount(value: &Value, context: &str, warnings: &mut Vec<String>) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => normalize::parse_amount(s, context, warnings),
        other => normalize::parse_amount(&other.to_string(), context, warnings),
    }
}

/// Turn a query table into cost items, locating columns by name.
fn parse_rows(result: &QueryResult, request: &CostRequest) -> (Vec<CostItem>, Currency, Vec<String>) {
    let mut warnings = Vec::new();
    let cost_idx = result.column(&["Cost", "PreTaxCost"]);
    let date_idx = result.column(&["UsageDate", "BillingPeriod"]);
    let currency_idx = result.column(&["Currency"]);

    let mut axes: Vec<GroupBy> = request.group_by.clone();
    if axes.is_empty() {
        axes.push(GroupBy::Service);
    }
    let key_idx: Vec<Option<usize>> = axes
        .iter()
        .map(|axis| result.column(&[dimension_name(*axis)]))
        .collect();

    let mut currency = None;
    let mut costs = Vec::with_capacity(result.rows.len());
    for (row_no, row) in result.rows.iter().enumerate() {
        let Some(date) = date_idx
            .and_then(|i| row.get(i))
            .and_then(cell_text)
            .and_then(|raw| normalize::parse_day(&raw))
        else {
            warnings.push(format!("PartialParse: row {}: missing or invalid date", row_no));
            continue;
        };
        let amount = cost_idx
            .and_then(|i| row.get(i))
            .map(|v| cell_amount(v, &format!("row {}", row_no), &mut warnings))
            .unwrap_or(0.0);
        let keys: Vec<String> = key_idx
            .iter()
            .map(|idx| idx.and_then(|i| row.get(i)).and_then(cell_text).unwrap_or_default())
            .collect();
        if currency.is_none() {
            currency = currency_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .and_then(|code| Currency::from_str(code).ok());
        }
        costs.push(normalize::grouped_item(date, amount, &keys, &axes));
    }
    (costs, currency.unwrap_or_default(), warnings)
}

fn savings_amount(rec: &AdvisorRecommendation) -> f64 {
    match rec.properties.extended_properties.get("annualSavingsAmount") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn advisor_to_recommendation(rec: AdvisorRecommendation, subscription_id: &str) -> ProviderRecommendation {
    let estimated_savings = savings_amount(&rec);
    let props = rec.properties;
    let (problem, solution) = props
        .short_description
        .map(|d| (d.problem, d.solution))
        .unwrap_or_default();
    let currency = props
        .extended_properties
        .get("savingsCurrency")
        .and_then(Value::as_str)
        .and_then(|code| Currency::from_str(code).ok())
        .unwrap_or_default();
    let region = props
        .extended_properties
        .get("location")
        .or_else(|| props.extended_properties.get("region"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut details = HashMap::new();
    if !props.impacted_value.is_empty() {
        details.insert("impacted_value".to_string(), json!(props.impacted_value));
    }
    if !props.category.is_empty() {
        details.insert("category".to_string(), json!(props.category));
    }

    ProviderRecommendation {
        id: rec.id,
        kind: RecommendationKind::Rightsizing,
        resource_id: props.resource_metadata.map(|m| m.resource_id).unwrap_or_default(),
        resource_type: props.impacted_field,
        account_id: subscription_id.to_string(),
        region,
        current_config: problem,
        recommended_config: solution,
        estimated_savings,
        currency,
        impact: Impact::from_provider(&props.impact),
        details,
    }
}

#[async_trait]
impl CloudProvider for AzureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn health(&self) -> HealthStatus {
        let status = match self.client.token().await {
            Ok(_) => HealthStatus::healthy("Azure provider healthy"),
            Err(e) => HealthStatus::unhealthy(format!("Azure health check failed: {}", e)),
        };
        status.with_detail("subscription", self.client.subscription_id())
    }

    async fn get_costs(&self, request: &CostRequest) -> Result<CostResponse> {
        request.validate()?;
        if request.granularity == Granularity::Hourly {
            return Err(ProviderError::InvalidRequest(
                "hourly granularity is not supported by Azure Cost Management".into(),
            ));
        }
        info!(start = %request.start, end = %request.end, "Fetching Azure costs");

        let result = self.client.query_costs(&Self::query_body(request)).await?;
        let (costs, currency, warnings) = parse_rows(&result, request);
        Ok(CostResponse {
            total_amount: normalize::total(&costs),
            costs,
            currency,
            start: request.start,
            end: request.end,
            warnings,
        })
    }

    async fn get_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        if !request.wants(RecommendationKind::Rightsizing) {
            return Ok(RecommendationResponse::new(Vec::new(), Currency::Usd));
        }
        info!("Fetching Azure recommendations");
        let subscription_id = self.client.subscription_id().to_string();
        let advisor = self.client.advisor_recommendations().await?;

        let mut recommendations: Vec<ProviderRecommendation> = advisor
            .into_iter()
            .filter(|r| r.properties.category.is_empty() || r.properties.category.eq_ignore_ascii_case("cost"))
            .map(|r| advisor_to_recommendation(r, &subscription_id))
            .collect();
        if !request.regions.is_empty() {
            recommendations.retain(|r| r.region.is_empty() || request.regions.contains(&r.region));
        }
        let mixed = recommendations
            .windows(2)
            .any(|pair| pair[0].currency != pair[1].currency);
        if mixed {
            warn!(subscription_id = %subscription_id, "Advisor savings reported in mixed currencies");
        }
        let currency = recommendations
            .first()
            .map(|r| r.currency)
            .unwrap_or_default();
        Ok(RecommendationResponse::new(recommendations, currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> AzureCredentials {
        AzureCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
            subscription_id: "sub-1".into(),
        }
    }

    async fn server_with_token() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok", "expires_in": 3599
            })))
            .mount(&server)
            .await;
        server
    }

    fn provider(server: &MockServer) -> AzureProvider {
        AzureProvider::from_credentials(
            reqwest::Client::new(),
            credentials(),
            AzureEndpoints::all(server.uri()),
        )
    }

    fn jan(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_query_body_defaults_to_service_grouping() {
        let mut request = CostRequest::daily_by_service(jan(1), jan(8));
        request.group_by.clear();
        let body = AzureProvider::query_body(&request);
        assert_eq!(body["dataset"]["grouping"][0]["name"], "ServiceName");
        assert_eq!(body["timePeriod"]["from"], "2025-01-01T00:00:00Z");
        assert!(body["dataset"].get("filter").is_none());

        request.group_by = vec![GroupBy::Region];
        request.filters.services = vec!["Storage".into()];
        let body = AzureProvider::query_body(&request);
        assert_eq!(body["dataset"]["grouping"][0]["name"], "ResourceLocation");
        assert_eq!(body["dataset"]["filter"]["dimensions"]["name"], "ServiceName");
    }

    #[tokio::test]
    async fn test_get_costs_parses_columns_by_name() {
        let server = server_with_token().await;
        Mock::given(method("POST"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.CostManagement/query"))
            .and(body_partial_json(json!({"type": "ActualCost", "timeframe": "Custom"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "columns": [
                        {"name": "PreTaxCost", "type": "Number"},
                        {"name": "ServiceName", "type": "String"},
                        {"name": "UsageDate", "type": "Number"},
                        {"name": "Currency", "type": "String"}
                    ],
                    "rows": [
                        [12.5, "Virtual Machines", 20250101, "EUR"],
                        ["oops", "Storage", "20250102", "EUR"],
                        [1.0, "Bandwidth", null, "EUR"]
                    ]
                }
            })))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_costs(&CostRequest::daily_by_service(jan(1), jan(3)))
            .await
            .unwrap();

        assert_eq!(response.costs.len(), 2);
        assert_eq!(response.costs[0].date, jan(1));
        assert_eq!(response.costs[0].service.as_deref(), Some("Virtual Machines"));
        assert_eq!(response.costs[1].date, jan(2));
        assert_eq!(response.costs[1].amount, 0.0);
        assert_eq!(response.currency, Currency::Eur);
        assert_eq!(response.total_amount, 12.5);
        assert_eq!(response.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_hourly_is_rejected() {
        let server = MockServer::start().await;
        let mut request = CostRequest::daily_by_service(jan(1), jan(2));
        request.granularity = Granularity::Hourly;
        let err = provider(&server).get_costs(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_advisor_recommendations() {
        let server = server_with_token().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Advisor/recommendations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": "/subscriptions/sub-1/providers/Microsoft.Advisor/recommendations/abc",
                    "name": "abc",
                    "properties": {
                        "category": "Cost",
                        "impact": "High",
                        "impactedField": "Microsoft.Compute/virtualMachines",
                        "impactedValue": "vm-1",
                        "shortDescription": {"problem": "Underutilized VM", "solution": "Resize to D2s_v5"},
                        "resourceMetadata": {"resourceId": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-1"},
                        "extendedProperties": {"annualSavingsAmount": "840.5", "savingsCurrency": "USD"}
                    }
                }]
            })))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_recommendations(&RecommendationRequest::default())
            .await
            .unwrap();
        assert_eq!(response.recommendations.len(), 1);
        let rec = &response.recommendations[0];
        assert_eq!(rec.kind, RecommendationKind::Rightsizing);
        assert_eq!(rec.impact, Impact::High);
        assert_eq!(rec.estimated_savings, 840.5);
        assert_eq!(rec.account_id, "sub-1");
        assert!(rec.resource_id.ends_with("vm-1"));
        assert_eq!(rec.recommended_config, "Resize to D2s_v5");
    }

    #[tokio::test]
    async fn test_health_uses_token() {
        let server = server_with_token().await;
        let health = provider(&server).health().await;
        assert!(health.healthy);
        assert_eq!(health.details["subscription"], "sub-1");
    }
}
