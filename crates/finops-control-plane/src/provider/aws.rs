// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AWS provider backed by Cost Explorer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use finops_core::model::{AwsCredentials, Currency, Granularity, Impact, ProviderKind, RecommendationKind};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    CloudProvider, CostFilters, CostRequest, CostResponse, GroupBy, HealthStatus, ProviderError,
    ProviderRecommendation, RecommendationRequest, RecommendationResponse, Result, normalize,
};
use crate::cloud::aws::ce::{ReservationDetail, RightsizingRecommendation, SavingsPlansDetail};
use crate::cloud::aws::{AwsClient, AwsEndpoints};

const COST_METRIC: &str = "UnblendedCost";
const UNKNOWN: &str = "unknown";

/// Cost Explorer allows at most two grouping dimensions.
const MAX_GROUP_BY: usize = 2;

/// AWS provider for one set of credentials.
#[derive(Debug)]
pub struct AwsProvider {
    name: String,
    client: AwsClient,
}

impl AwsProvider {
    /// Wrap a client.
    pub fn new(name: impl Into<String>, client: AwsClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Build from credentials.
    pub fn from_credentials(
        http: reqwest::Client,
        credentials: AwsCredentials,
        endpoints: AwsEndpoints,
    ) -> Self {
        Self::new("aws", AwsClient::new(http, credentials, endpoints))
    }

    /// Factory constructor sharing one HTTP client.
    pub fn constructor(
        http: reqwest::Client,
        endpoints: AwsEndpoints,
    ) -> impl Fn(AwsCredentials) -> Result<Box<dyn CloudProvider>> + Send + Sync + 'static {
        move |credentials| {
            if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
                return Err(ProviderError::Credentials(
                    "access_key_id and secret_access_key are required".into(),
                ));
            }
            Ok(Box::new(Self::from_credentials(
                http.clone(),
                credentials,
                endpoints.clone(),
            )) as Box<dyn CloudProvider>)
        }
    }

    fn cost_request_body(request: &CostRequest) -> Result<Value> {
        if request.group_by.len() > MAX_GROUP_BY {
            return Err(ProviderError::InvalidRequest(format!(
                "at most {} group-by dimensions are supported",
                MAX_GROUP_BY
            )));
        }
        let (granularity, start, end) = match request.granularity {
            Granularity::Hourly => (
                "HOURLY",
                format!("{}T00:00:00Z", request.start),
                format!("{}T00:00:00Z", request.end),
            ),
            Granularity::Monthly => ("MONTHLY", request.start.to_string(), request.end.to_string()),
            _ => ("DAILY", request.start.to_string(), request.end.to_string()),
        };

        let mut body = json!({
            "TimePeriod": {"Start": start, "End": end},
            "Granularity": granularity,
            "Metrics": [COST_METRIC, "UsageQuantity"],
        });
        if !request.group_by.is_empty() {
            let groups: Vec<Value> = request
                .group_by
                .iter()
                .map(|axis| json!({"Type": "DIMENSION", "Key": dimension_key(*axis)}))
                .collect();
            body["GroupBy"] = Value::Array(groups);
        }
        if let Some(filter) = build_filter(&request.filters) {
            body["Filter"] = filter;
        }
        Ok(body)
    }

    async fn rightsizing(&self) -> Result<Vec<ProviderRecommendation>> {
        let recs = self.client.get_rightsizing_recommendations().await?;
        Ok(recs.into_iter().filter_map(rightsizing_to_recommendation).collect())
    }

    async fn reserved_instances(&self) -> Result<Vec<ProviderRecommendation>> {
        let details = self.client.get_reservation_purchase_recommendations().await?;
        Ok(details.into_iter().map(reservation_to_recommendation).collect())
    }

    async fn savings_plans(&self) -> Result<Vec<ProviderRecommendation>> {
        let details = self.client.get_savings_plans_purchase_recommendations().await?;
        Ok(details.into_iter().map(savings_plan_to_recommendation).collect())
    }
}

fn dimension_key(axis: GroupBy) -> &'static str {
    match axis {
        GroupBy::Service => "SERVICE",
        GroupBy::Account => "LINKED_ACCOUNT",
        GroupBy::Region => "REGION",
    }
}

fn build_filter(filters: &CostFilters) -> Option<Value> {
    let mut expressions = Vec::new();
    for (key, values) in [
        ("SERVICE", &filters.services),
        ("LINKED_ACCOUNT", &filters.account_ids),
        ("REGION", &filters.regions),
    ] {
        if !values.is_empty() {
            expressions.push(json!({"Dimensions": {"Key": key, "Values": values}}));
        }
    }
    let mut tags: Vec<_> = filters.tags.iter().collect();
    tags.sort();
    for (key, value) in tags {
        expressions.push(json!({"Tags": {"Key": key, "Values": [value]}}));
    }

    match expressions.len() {
        0 => None,
        1 => expressions.pop(),
        _ => Some(json!({"And": expressions})),
    }
}

fn parse_optional(raw: Option<&str>, context: &str) -> f64 {
    // Recommendation amounts are advisory; a bad value counts as zero.
    let mut ignored = Vec::new();
    raw.map(|r| normalize::parse_amount(r, context, &mut ignored))
        .unwrap_or(0.0)
}

fn non_empty(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

fn rightsizing_to_recommendation(rec: RightsizingRecommendation) -> Option<ProviderRecommendation> {
    if rec.rightsizing_type != "Modify" {
        return None;
    }
    let detail = rec.modify_recommendation_detail?;
    let target = detail.target_instances.first();
    let savings = parse_optional(
        target.and_then(|t| t.estimated_monthly_savings.as_deref()),
        "rightsizing savings",
    );
    let resource_id = rec
        .current_instance
        .resource_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let recommended = target
        .map(|t| non_empty(&t.resource_details.ec2.instance_type))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let mut details = HashMap::new();
    if let Some(name) = rec.current_instance.instance_name.filter(|n| !n.is_empty()) {
        details.insert("instance_name".to_string(), json!(name));
    }
    if let Some(cost) = rec.current_instance.monthly_cost {
        details.insert("monthly_cost".to_string(), json!(cost));
    }

    Some(ProviderRecommendation {
        id: resource_id.clone(),
        kind: RecommendationKind::Rightsizing,
        resource_id,
        resource_type: "EC2 Instance".to_string(),
        account_id: rec.account_id,
        region: rec.current_instance.resource_details.ec2.region.clone(),
        current_config: non_empty(&rec.current_instance.resource_details.ec2.instance_type),
        recommended_config: recommended,
        estimated_savings: savings,
        currency: Currency::Usd,
        impact: Impact::Medium,
        details,
    })
}

fn reservation_to_recommendation(detail: ReservationDetail) -> ProviderRecommendation {
    let monthly = parse_optional(detail.estimated_monthly_savings_amount.as_deref(), "RI savings");
    let instance_type = non_empty(&detail.instance_details.ec2.instance_type);
    let count = detail
        .recommended_number_of_instances_to_purchase
        .unwrap_or_else(|| "0".to_string());

    let mut details = HashMap::new();
    details.insert("instance_type".to_string(), json!(instance_type));
    details.insert("recommended_count".to_string(), json!(count));

    ProviderRecommendation {
        id: format!("ri-{}", instance_type),
        kind: RecommendationKind::ReservedInstances,
        resource_id: String::new(),
        resource_type: "EC2 Reserved Instance".to_string(),
        account_id: detail.account_id.unwrap_or_default(),
        region: detail.instance_details.ec2.region,
        current_config: String::new(),
        recommended_config: format!("{} RI", instance_type),
        estimated_savings: monthly * 12.0,
        currency: Currency::Usd,
        impact: Impact::High,
        details,
    }
}

fn savings_plan_to_recommendation(detail: SavingsPlansDetail) -> ProviderRecommendation {
    let monthly = parse_optional(detail.estimated_monthly_savings_amount.as_deref(), "SP savings");
    let offering = detail
        .savings_plans_details
        .offering_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let hourly = detail
        .hourly_commitment_to_purchase
        .unwrap_or_else(|| "0".to_string());

    let mut details = HashMap::new();
    details.insert("hourly_commitment".to_string(), json!(hourly));

    ProviderRecommendation {
        id: format!("sp-{}", offering),
        kind: RecommendationKind::SavingsPlans,
        resource_id: String::new(),
        resource_type: "Savings Plan".to_string(),
        account_id: detail.account_id.unwrap_or_default(),
        region: detail.savings_plans_details.region.unwrap_or_default(),
        current_config: String::new(),
        recommended_config: format!("Compute Savings Plan ${}/hr", hourly),
        estimated_savings: monthly * 12.0,
        currency: Currency::Usd,
        impact: Impact::High,
        details,
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    async fn health(&self) -> HealthStatus {
        let today = Utc::now().date_naive();
        let probe = CostRequest {
            start: today - Duration::days(1),
            end: today,
            granularity: Granularity::Daily,
            group_by: Vec::new(),
            filters: CostFilters::default(),
        };
        let body = match Self::cost_request_body(&probe) {
            Ok(body) => body,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };
        let status = match self.client.get_cost_and_usage(body).await {
            Ok(_) => HealthStatus::healthy("AWS provider healthy"),
            Err(e) => HealthStatus::unhealthy(format!("AWS health check failed: {}", e)),
        };
        status.with_detail("region", self.client.region())
    }

    async fn get_costs(&self, request: &CostRequest) -> Result<CostResponse> {
        request.validate()?;
        info!(
            start = %request.start,
            end = %request.end,
            granularity = %request.granularity,
            "Fetching AWS costs"
        );
        let body = Self::cost_request_body(request)?;
        let results = self.client.get_cost_and_usage(body).await?;

        let mut warnings = Vec::new();
        let mut costs = Vec::new();
        for result in results {
            let Some(date) = normalize::parse_day(&result.time_period.start) else {
                warnings.push(format!(
                    "PartialParse: invalid period start {:?}",
                    result.time_period.start
                ));
                continue;
            };
            if result.groups.is_empty() {
                let amount = result
                    .total
                    .get(COST_METRIC)
                    .map(|m| normalize::parse_amount(&m.amount, &date.to_string(), &mut warnings))
                    .unwrap_or(0.0);
                costs.push(normalize::grouped_item(date, amount, &[], &[]));
                continue;
            }
            for group in result.groups {
                let context = group.keys.join("/");
                let amount = group
                    .metrics
                    .get(COST_METRIC)
                    .map(|m| normalize::parse_amount(&m.amount, &context, &mut warnings))
                    .unwrap_or(0.0);
                costs.push(normalize::grouped_item(
                    date,
                    amount,
                    &group.keys,
                    &request.group_by,
                ));
            }
        }

        Ok(CostResponse {
            total_amount: normalize::total(&costs),
            costs,
            currency: Currency::Usd,
            start: request.start,
            end: request.end,
            warnings,
        })
    }

    async fn get_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        info!(kinds = ?request.kinds, "Fetching AWS recommendations");
        let mut recommendations = Vec::new();

        if request.wants(RecommendationKind::Rightsizing) {
            match self.rightsizing().await {
                Ok(recs) => recommendations.extend(recs),
                Err(e) => warn!(error = %e, "Failed to get rightsizing recommendations"),
            }
        }
        if request.wants(RecommendationKind::ReservedInstances) {
            match self.reserved_instances().await {
                Ok(recs) => recommendations.extend(recs),
                Err(e) => warn!(error = %e, "Failed to get RI recommendations"),
            }
        }
        if request.wants(RecommendationKind::SavingsPlans) {
            match self.savings_plans().await {
                Ok(recs) => recommendations.extend(recs),
                Err(e) => warn!(error = %e, "Failed to get Savings Plans recommendations"),
            }
        }

        if !request.account_ids.is_empty() {
            recommendations.retain(|r| r.account_id.is_empty() || request.account_ids.contains(&r.account_id));
        }
        if !request.regions.is_empty() {
            recommendations.retain(|r| r.region.is_empty() || request.regions.contains(&r.region));
        }

        Ok(RecommendationResponse::new(recommendations, Currency::Usd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AwsProvider {
        AwsProvider::from_credentials(
            reqwest::Client::new(),
            AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
                region: "eu-west-1".into(),
                assume_role_arn: None,
                external_id: None,
            },
            AwsEndpoints::all(server.uri()),
        )
    }

    fn jan(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_request_body_and_filter() {
        let mut request = CostRequest::daily_by_service(jan(1), jan(31));
        request.filters.services = vec!["Amazon EC2".into()];
        request.filters.regions = vec!["eu-west-1".into()];
        let body = AwsProvider::cost_request_body(&request).unwrap();

        assert_eq!(body["Granularity"], "DAILY");
        assert_eq!(body["TimePeriod"]["End"], "2025-01-31");
        assert_eq!(body["GroupBy"][0]["Key"], "SERVICE");
        assert_eq!(body["Filter"]["And"].as_array().unwrap().len(), 2);

        request.filters.regions.clear();
        let body = AwsProvider::cost_request_body(&request).unwrap();
        assert_eq!(body["Filter"]["Dimensions"]["Key"], "SERVICE");

        request.group_by = vec![GroupBy::Service, GroupBy::Account, GroupBy::Region];
        assert!(AwsProvider::cost_request_body(&request).is_err());
    }

    #[tokio::test]
    async fn test_get_costs_groups_and_partial_parse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostAndUsage"))
            .and(body_partial_json(json!({"GroupBy": [{"Type": "DIMENSION", "Key": "LINKED_ACCOUNT"}, {"Type": "DIMENSION", "Key": "SERVICE"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResultsByTime": [{
                    "TimePeriod": {"Start": "2025-01-01", "End": "2025-01-02"},
                    "Groups": [
                        {"Keys": ["111", "Amazon EC2"], "Metrics": {"UnblendedCost": {"Amount": "10.5", "Unit": "USD"}}},
                        {"Keys": ["111", "Amazon S3"], "Metrics": {"UnblendedCost": {"Amount": "bogus", "Unit": "USD"}}}
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let mut request = CostRequest::daily_by_service(jan(1), jan(2));
        request.group_by = vec![GroupBy::Account, GroupBy::Service];
        let response = provider(&server).get_costs(&request).await.unwrap();

        assert_eq!(response.costs.len(), 2);
        assert_eq!(response.costs[0].account_id.as_deref(), Some("111"));
        assert_eq!(response.costs[0].service.as_deref(), Some("Amazon EC2"));
        assert_eq!(response.costs[1].amount, 0.0);
        assert_eq!(response.total_amount, 10.5);
        assert_eq!(response.warnings.len(), 1);
        assert_eq!(response.currency, Currency::Usd);
    }

    #[tokio::test]
    async fn test_recommendations_skip_failing_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetReservationPurchaseRecommendation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Recommendations": [{
                    "RecommendationDetails": [{
                        "AccountId": "111",
                        "InstanceDetails": {"EC2InstanceDetails": {"InstanceType": "m5.large", "Region": "eu-west-1"}},
                        "RecommendedNumberOfInstancesToPurchase": "2",
                        "EstimatedMonthlySavingsAmount": "100"
                    }]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetRightsizingRecommendation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "RightsizingRecommendations": [
                    {
                        "AccountId": "111",
                        "RightsizingType": "Modify",
                        "CurrentInstance": {
                            "ResourceId": "i-0abc",
                            "ResourceDetails": {"EC2ResourceDetails": {"InstanceType": "m5.2xlarge", "Region": "eu-west-1"}}
                        },
                        "ModifyRecommendationDetail": {"TargetInstances": [{
                            "EstimatedMonthlySavings": "55.5",
                            "ResourceDetails": {"EC2ResourceDetails": {"InstanceType": "m5.xlarge"}}
                        }]}
                    },
                    {"AccountId": "111", "RightsizingType": "Terminate", "CurrentInstance": {"ResourceId": "i-dead"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetSavingsPlansPurchaseRecommendation"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "DataUnavailableException", "message": "no data"
            })))
            .mount(&server)
            .await;

        let response = provider(&server)
            .get_recommendations(&RecommendationRequest::default())
            .await
            .unwrap();

        assert_eq!(response.recommendations.len(), 2);
        let rs = &response.recommendations[0];
        assert_eq!(rs.kind, RecommendationKind::Rightsizing);
        assert_eq!(rs.resource_id, "i-0abc");
        assert_eq!(rs.current_config, "m5.2xlarge");
        assert_eq!(rs.recommended_config, "m5.xlarge");

        let ri = &response.recommendations[1];
        assert_eq!(ri.id, "ri-m5.large");
        assert_eq!(ri.estimated_savings, 1200.0);
        assert_eq!(ri.details["recommended_count"], "2");
        assert_eq!(response.total_savings, 1255.5);
    }

    #[tokio::test]
    async fn test_health_reports_region() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "__type": "AccessDeniedException", "message": "denied"
            })))
            .mount(&server)
            .await;

        let health = provider(&server).health().await;
        assert!(!health.healthy);
        assert!(health.message.contains("AccessDeniedException"));
        assert_eq!(health.details["region"], "eu-west-1");
    }

    #[test]
    fn test_constructor_rejects_empty_keys() {
        let constructor = AwsProvider::constructor(reqwest::Client::new(), AwsEndpoints::default());
        let err = constructor(AwsCredentials {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            region: "us-east-1".into(),
            assume_role_arn: None,
            external_id: None,
        })
        .err()
        .unwrap();
        assert!(matches!(err, ProviderError::Credentials(_)));
    }
}
