// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cost Explorer (JSON 1.1 protocol).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{AwsClient, GLOBAL_REGION};
use crate::cloud::Result;

const TARGET_PREFIX: &str = "AWSInsightsIndexService";

/// A metric value as Cost Explorer returns it: a decimal string plus unit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetricValue {
    /// Decimal amount, as text.
    pub amount: String,
    /// Unit, usually a currency code.
    pub unit: String,
}

/// Start/end of a result bucket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimePeriod {
    /// First day, `YYYY-MM-DD`.
    pub start: String,
    /// Day after the last, `YYYY-MM-DD`.
    pub end: String,
}

/// One group inside a bucket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Group {
    /// Group key values, positionally matching the request's GroupBy.
    pub keys: Vec<String>,
    /// Metrics by name.
    pub metrics: HashMap<String, MetricValue>,
}

/// One time bucket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResultByTime {
    /// Bucket bounds.
    pub time_period: TimePeriod,
    /// Ungrouped totals.
    pub total: HashMap<String, MetricValue>,
    /// Grouped amounts.
    pub groups: Vec<Group>,
    /// Whether the bucket is still estimated.
    pub estimated: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CostAndUsagePage {
    results_by_time: Vec<ResultByTime>,
    next_page_token: Option<String>,
}

/// Resource details block shared by rightsizing entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResourceDetails {
    /// EC2 details.
    #[serde(rename = "EC2ResourceDetails")]
    pub ec2: Ec2ResourceDetails,
}

/// EC2 instance description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ec2ResourceDetails {
    /// Instance type.
    pub instance_type: String,
    /// Region.
    pub region: String,
}

/// The instance a rightsizing entry is about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CurrentInstance {
    /// Instance id.
    pub resource_id: Option<String>,
    /// Name tag.
    pub instance_name: Option<String>,
    /// Instance details.
    pub resource_details: ResourceDetails,
    /// Current monthly cost, as text.
    pub monthly_cost: Option<String>,
}

/// A suggested target instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetInstance {
    /// Savings per month, as text.
    pub estimated_monthly_savings: Option<String>,
    /// Cost per month on the target, as text.
    pub estimated_monthly_cost: Option<String>,
    /// Currency.
    pub currency_code: Option<String>,
    /// Target details.
    pub resource_details: ResourceDetails,
}

/// Modify-type recommendation body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ModifyRecommendationDetail {
    /// Candidate targets, best first.
    pub target_instances: Vec<TargetInstance>,
}

/// One rightsizing entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RightsizingRecommendation {
    /// Owning account.
    pub account_id: String,
    /// The instance.
    pub current_instance: CurrentInstance,
    /// `Modify` or `Terminate`.
    pub rightsizing_type: String,
    /// Present for `Modify`.
    pub modify_recommendation_detail: Option<ModifyRecommendationDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RightsizingPage {
    rightsizing_recommendations: Vec<RightsizingRecommendation>,
    next_page_token: Option<String>,
}

/// EC2 reservation details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ec2InstanceDetails {
    /// Instance type to reserve.
    pub instance_type: String,
    /// Region (display name).
    pub region: String,
}

/// Instance details wrapper.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceDetails {
    /// EC2 reservation details.
    #[serde(rename = "EC2InstanceDetails")]
    pub ec2: Ec2InstanceDetails,
}

/// One reservation purchase suggestion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReservationDetail {
    /// Account.
    pub account_id: Option<String>,
    /// What to reserve.
    pub instance_details: InstanceDetails,
    /// How many, as text.
    pub recommended_number_of_instances_to_purchase: Option<String>,
    /// Savings per month, as text.
    pub estimated_monthly_savings_amount: Option<String>,
    /// Currency.
    pub currency_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReservationRecommendation {
    recommendation_details: Vec<ReservationDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReservationPage {
    recommendations: Vec<ReservationRecommendation>,
}

/// Savings plan offering details.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SavingsPlansDetails {
    /// Offering id.
    pub offering_id: Option<String>,
    /// Instance family, for EC2 plans.
    pub instance_family: Option<String>,
    /// Region.
    pub region: Option<String>,
}

/// One savings plan purchase suggestion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SavingsPlansDetail {
    /// Account.
    pub account_id: Option<String>,
    /// Offering.
    pub savings_plans_details: SavingsPlansDetails,
    /// Hourly commitment, as text.
    pub hourly_commitment_to_purchase: Option<String>,
    /// Savings per month, as text.
    pub estimated_monthly_savings_amount: Option<String>,
    /// Currency.
    pub currency_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SavingsPlansRecommendation {
    savings_plans_purchase_recommendation_details: Vec<SavingsPlansDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SavingsPlansPage {
    savings_plans_purchase_recommendation: SavingsPlansRecommendation,
}

impl AwsClient {
    async fn ce_call<T: serde::de::DeserializeOwned>(&self, operation: &str, body: &Value) -> Result<T> {
        let url = self.endpoints().cost_explorer_url()?;
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        self.json_call("ce", url, GLOBAL_REGION, &target, body).await
    }

    /// `GetCostAndUsage`, following `NextPageToken` until exhausted.
    ///
    /// `request` is the operation body without the page token.
    pub async fn get_cost_and_usage(&self, request: Value) -> Result<Vec<ResultByTime>> {
        let mut results = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut body = request.clone();
            if let (Some(token), Some(obj)) = (&token, body.as_object_mut()) {
                obj.insert("NextPageToken".into(), json!(token));
            }
            let page: CostAndUsagePage = self.ce_call("GetCostAndUsage", &body).await?;
            results.extend(page.results_by_time);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(results)
    }

    /// EC2 rightsizing entries within the same instance family.
    pub async fn get_rightsizing_recommendations(&self) -> Result<Vec<RightsizingRecommendation>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut body = json!({
                "Service": "AmazonEC2",
                "Configuration": {
                    "RecommendationTarget": "SAME_INSTANCE_FAMILY",
                    "BenefitsConsidered": true
                }
            });
            if let (Some(token), Some(obj)) = (&token, body.as_object_mut()) {
                obj.insert("NextPageToken".into(), json!(token));
            }
            let page: RightsizingPage = self.ce_call("GetRightsizingRecommendation", &body).await?;
            out.extend(page.rightsizing_recommendations);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    /// One-year, no-upfront EC2 reservation suggestions over a 60-day lookback.
    pub async fn get_reservation_purchase_recommendations(&self) -> Result<Vec<ReservationDetail>> {
        let body = json!({
            "Service": "Amazon Elastic Compute Cloud - Compute",
            "LookbackPeriodInDays": "SIXTY_DAYS",
            "TermInYears": "ONE_YEAR",
            "PaymentOption": "NO_UPFRONT"
        });
        let page: ReservationPage = self
            .ce_call("GetReservationPurchaseRecommendation", &body)
            .await?;
        Ok(page
            .recommendations
            .into_iter()
            .flat_map(|r| r.recommendation_details)
            .collect())
    }

    /// One-year, no-upfront Compute Savings Plan suggestions.
    pub async fn get_savings_plans_purchase_recommendations(
        &self,
    ) -> Result<Vec<SavingsPlansDetail>> {
        let body = json!({
            "SavingsPlansType": "COMPUTE_SP",
            "TermInYears": "ONE_YEAR",
            "PaymentOption": "NO_UPFRONT",
            "LookbackPeriodInDays": "SIXTY_DAYS"
        });
        let page: SavingsPlansPage = self
            .ce_call("GetSavingsPlansPurchaseRecommendation", &body)
            .await?;
        Ok(page
            .savings_plans_purchase_recommendation
            .savings_plans_purchase_recommendation_details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudError;
    use crate::cloud::aws::AwsEndpoints;
    use finops_core::model::AwsCredentials;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AwsClient {
        AwsClient::new(
            reqwest::Client::new(),
            AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
                region: "us-east-1".into(),
                assume_role_arn: None,
                external_id: None,
            },
            AwsEndpoints::all(server.uri()),
        )
    }

    #[tokio::test]
    async fn test_cost_and_usage_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostAndUsage"))
            .and(body_partial_json(json!({"NextPageToken": "p2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResultsByTime": [{
                    "TimePeriod": {"Start": "2025-01-02", "End": "2025-01-03"},
                    "Total": {"UnblendedCost": {"Amount": "2.5", "Unit": "USD"}},
                    "Groups": [],
                    "Estimated": true
                }]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AWSInsightsIndexService.GetCostAndUsage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResultsByTime": [{
                    "TimePeriod": {"Start": "2025-01-01", "End": "2025-01-02"},
                    "Total": {"UnblendedCost": {"Amount": "1.25", "Unit": "USD"}},
                    "Groups": [],
                    "Estimated": false
                }],
                "NextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let results = client(&server)
            .get_cost_and_usage(json!({"Granularity": "DAILY"}))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].total["UnblendedCost"].amount, "1.25");
        assert!(results[1].estimated);
    }

    #[tokio::test]
    async fn test_service_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.amazonaws.ce#LimitExceededException",
                "message": "slow down"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_savings_plans_purchase_recommendations()
            .await
            .unwrap_err();
        match err {
            CloudError::Service { service, code, status, .. } => {
                assert_eq!(service, "ce");
                assert_eq!(status, 400);
                assert_eq!(code, "LimitExceededException");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
