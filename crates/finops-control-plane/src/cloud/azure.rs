// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure Resource Manager client (Cost Management and Advisor).

use std::time::Duration;

use finops_core::model::AzureCredentials;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{CloudError, Result, snippet};

const COST_API_VERSION: &str = "2023-11-01";
const ADVISOR_API_VERSION: &str = "2023-01-01";
const TOKEN_SCOPE: &str = "https://management.azure.com/.default";
const TOKEN_SKEW: Duration = Duration::from_secs(60);

/// Endpoint overrides.
#[derive(Debug, Clone)]
pub struct AzureEndpoints {
    /// Entra ID authority.
    pub login: String,
    /// Resource Manager base URL.
    pub management: String,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            login: "https://login.microsoftonline.com".to_string(),
            management: "https://management.azure.com".to_string(),
        }
    }
}

impl AzureEndpoints {
    /// Point both endpoints at one base URL.
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            login: base.clone(),
            management: base,
        }
    }
}

/// Column descriptor of a Cost Management query result.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryColumn {
    /// Column name, e.g. `Cost`, `UsageDate`, `ServiceName`.
    pub name: String,
    /// Column type, e.g. `Number`, `String`.
    #[serde(rename = "type", default)]
    pub column_type: String,
}

/// Tabular Cost Management query result, merged across pages.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column layout.
    pub columns: Vec<QueryColumn>,
    /// Rows, positionally matching `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Index of the first column with one of `names`.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| names.iter().any(|n| c.name.eq_ignore_ascii_case(n)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryProperties {
    #[serde(default)]
    columns: Vec<QueryColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct QueryEnvelope {
    properties: QueryProperties,
}

/// One Advisor recommendation (cost category).
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorRecommendation {
    /// ARM id of the recommendation.
    pub id: String,
    /// Recommendation name (a GUID).
    #[serde(default)]
    pub name: String,
    /// Recommendation body.
    pub properties: AdvisorProperties,
}

/// Properties of an Advisor recommendation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorProperties {
    /// `Cost`, `Performance`, ...
    #[serde(default)]
    pub category: String,
    /// `High`, `Medium` or `Low`.
    #[serde(default)]
    pub impact: String,
    /// Resource type the recommendation applies to.
    #[serde(default)]
    pub impacted_field: String,
    /// Resource name the recommendation applies to.
    #[serde(default)]
    pub impacted_value: String,
    /// Problem and solution text.
    #[serde(default)]
    pub short_description: Option<ShortDescription>,
    /// The resource the recommendation targets.
    #[serde(default)]
    pub resource_metadata: Option<ResourceMetadata>,
    /// Free-form details such as `annualSavingsAmount`.
    #[serde(default)]
    pub extended_properties: serde_json::Map<String, Value>,
}

/// Target resource of an Advisor recommendation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// ARM id of the resource.
    #[serde(default)]
    pub resource_id: String,
}

/// Problem/solution pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ShortDescription {
    /// What is wrong.
    #[serde(default)]
    pub problem: String,
    /// What to do about it.
    #[serde(default)]
    pub solution: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisorPage {
    #[serde(default)]
    value: Vec<AdvisorRecommendation>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Azure client for one service principal and subscription.
pub struct AzureClient {
    http: reqwest::Client,
    credentials: AzureCredentials,
    endpoints: AzureEndpoints,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for AzureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureClient")
            .field("subscription_id", &self.credentials.subscription_id)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl AzureClient {
    /// Create a client. No token is requested until the first call.
    pub fn new(http: reqwest::Client, credentials: AzureCredentials, endpoints: AzureEndpoints) -> Self {
        Self {
            http,
            credentials,
            endpoints,
            token: Mutex::new(None),
        }
    }

    /// Subscription the client is scoped to.
    pub fn subscription_id(&self) -> &str {
        &self.credentials.subscription_id
    }

    /// Bearer token, refreshed a minute before expiry.
    pub async fn token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && Instant::now() < cached.expires_at
        {
            return Ok(cached.value.clone());
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.endpoints.login.trim_end_matches('/'),
            self.credentials.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CloudError::Auth(e.to_string()))?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let (code, message) = parse_error(&text);
            return Err(CloudError::Auth(format!("{} {}: {}", status.as_u16(), code, message)));
        }
        let token: TokenResponse =
            serde_json::from_str(&text).map_err(|e| CloudError::Auth(format!("token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SKEW);
        debug!(tenant_id = %self.credentials.tenant_id, "Acquired Azure token");
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// Run a Cost Management query against the subscription, following
    /// `nextLink` pages.
    pub async fn query_costs(&self, body: &Value) -> Result<QueryResult> {
        let mut url = format!(
            "{}/subscriptions/{}/providers/Microsoft.CostManagement/query?api-version={}",
            self.endpoints.management.trim_end_matches('/'),
            self.credentials.subscription_id,
            COST_API_VERSION
        );
        let mut result = QueryResult::default();
        loop {
            let envelope: QueryEnvelope = self.send(reqwest::Method::POST, &url, Some(body)).await?;
            if result.columns.is_empty() {
                result.columns = envelope.properties.columns;
            }
            result.rows.extend(envelope.properties.rows);
            match envelope.properties.next_link.filter(|l| !l.is_empty()) {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(result)
    }

    /// Cost-category Advisor recommendations for the subscription.
    pub async fn advisor_recommendations(&self) -> Result<Vec<AdvisorRecommendation>> {
        let mut url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Advisor/recommendations?api-version={}&$filter={}",
            self.endpoints.management.trim_end_matches('/'),
            self.credentials.subscription_id,
            ADVISOR_API_VERSION,
            urlencoding::encode("Category eq 'Cost'")
        );
        let mut all = Vec::new();
        loop {
            let page: AdvisorPage = self.send(reqwest::Method::GET, &url, None).await?;
            all.extend(page.value);
            match page.next_link.filter(|l| !l.is_empty()) {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(all)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let token = self.token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let (code, message) = parse_error(&text);
            return Err(CloudError::Service {
                service: "azure",
                status: status.as_u16(),
                code,
                message,
            });
        }
        serde_json::from_str(&text).map_err(|e| CloudError::Decode(e.to_string()))
    }
}

/// ARM errors look like `{"error":{"code":..,"message":..}}`; Entra ID uses
/// `error` / `error_description`.
fn parse_error(body: &str) -> (String, String) {
    let value: Value = serde_json::from_str(body).unwrap_or_default();
    match value.get("error") {
        Some(Value::Object(error)) => (
            error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| snippet(body)),
        ),
        Some(Value::String(code)) => (
            code.clone(),
            value
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| snippet(body)),
        ),
        _ => ("Unknown".to_string(), snippet(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> AzureCredentials {
        AzureCredentials {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
            subscription_id: "sub-1".into(),
        }
    }

    async fn mount_token(server: &MockServer, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "tok-abc"
            })))
            .expect(expect)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_query_costs_follows_next_link() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        let next = format!("{}/page2", server.uri());
        Mock::given(method("POST"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.CostManagement/query"))
            .and(header("authorization", "Bearer tok-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "columns": [
                        {"name": "Cost", "type": "Number"},
                        {"name": "UsageDate", "type": "Number"},
                        {"name": "ServiceName", "type": "String"},
                        {"name": "Currency", "type": "String"}
                    ],
                    "rows": [[12.5, 20250101, "Virtual Machines", "USD"]],
                    "nextLink": next
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "columns": [],
                    "rows": [[3.0, 20250102, "Storage", "USD"]],
                    "nextLink": null
                }
            })))
            .mount(&server)
            .await;

        let client = AzureClient::new(reqwest::Client::new(), credentials(), AzureEndpoints::all(server.uri()));
        let result = client.query_costs(&json!({"type": "ActualCost"})).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.column(&["Cost", "PreTaxCost"]), Some(0));
        assert_eq!(result.column(&["ServiceName"]), Some(2));
    }

    #[tokio::test]
    async fn test_token_failure_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let client = AzureClient::new(reqwest::Client::new(), credentials(), AzureEndpoints::all(server.uri()));
        let err = client.token().await.unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
        assert!(err.to_string().contains("invalid_client"));
        assert!(!err.to_string().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_advisor_service_error() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/subscriptions/sub-1/providers/Microsoft\.Advisor/recommendations$"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": "AuthorizationFailed", "message": "no access"}
            })))
            .mount(&server)
            .await;

        let client = AzureClient::new(reqwest::Client::new(), credentials(), AzureEndpoints::all(server.uri()));
        match client.advisor_recommendations().await.unwrap_err() {
            CloudError::Service { status, code, .. } => {
                assert_eq!(status, 403);
                assert_eq!(code, "AuthorizationFailed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
