// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! STS AssumeRole.

use finops_core::model::AwsCredentials;
use tracing::debug;

use super::{AwsEndpoints, GLOBAL_REGION, query_call_with, xml_text};
use crate::cloud::{CloudError, Result};

const SESSION_NAME: &str = "finops-control-plane";

/// Exchange `base` for session credentials of `role_arn`.
pub async fn assume_role(
    http: &reqwest::Client,
    base: &AwsCredentials,
    endpoints: &AwsEndpoints,
    role_arn: &str,
    external_id: Option<&str>,
) -> Result<AwsCredentials> {
    let mut params = vec![
        ("Action", "AssumeRole".to_string()),
        ("Version", "2011-06-15".to_string()),
        ("RoleArn", role_arn.to_string()),
        ("RoleSessionName", SESSION_NAME.to_string()),
    ];
    if let Some(external_id) = external_id.filter(|id| !id.is_empty()) {
        params.push(("ExternalId", external_id.to_string()));
    }

    let body = query_call_with(
        http,
        base,
        "sts",
        endpoints.sts_url()?,
        GLOBAL_REGION,
        &params,
    )
    .await
    .map_err(|e| CloudError::Auth(format!("assume role {}: {}", role_arn, e)))?;

    let field = |tag: &str| {
        xml_text(&body, tag)
            .ok_or_else(|| CloudError::Auth(format!("AssumeRole response is missing {}", tag)))
    };

    debug!(role_arn = %role_arn, "Assumed role");
    Ok(AwsCredentials {
        access_key_id: field("AccessKeyId")?,
        secret_access_key: field("SecretAccessKey")?,
        session_token: Some(field("SessionToken")?),
        region: base.region.clone(),
        assume_role_arn: None,
        external_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::aws::AwsClient;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESPONSE: &str = r#"<AssumeRoleResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleResult>
    <Credentials>
      <AccessKeyId>ASIATEMP</AccessKeyId>
      <SecretAccessKey>temp-secret</SecretAccessKey>
      <SessionToken>temp-token</SessionToken>
      <Expiration>2030-01-01T00:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleResult>
</AssumeRoleResponse>"#;

    fn base() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDBASE".into(),
            secret_access_key: "base-secret".into(),
            session_token: None,
            region: "eu-west-1".into(),
            assume_role_arn: Some("arn:aws:iam::123456789012:role/finops".into()),
            external_id: Some("ext-42".into()),
        }
    }

    #[tokio::test]
    async fn test_client_assumes_role_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=AssumeRole"))
            .and(body_string_contains("ExternalId=ext-42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESPONSE))
            .expect(1)
            .mount(&server)
            .await;

        let client = AwsClient::new(
            reqwest::Client::new(),
            base(),
            AwsEndpoints::all(server.uri()),
        );
        let creds = client.credentials().await.unwrap();
        assert_eq!(creds.access_key_id, "ASIATEMP");
        assert_eq!(creds.session_token.as_deref(), Some("temp-token"));
        assert_eq!(creds.region, "eu-west-1");

        // Cached for the lifetime of the client.
        client.credentials().await.unwrap();
    }

    #[tokio::test]
    async fn test_access_denied_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<ErrorResponse><Error><Code>AccessDenied</Code><Message>not allowed</Message></Error></ErrorResponse>",
            ))
            .mount(&server)
            .await;

        let client = AwsClient::new(
            reqwest::Client::new(),
            base(),
            AwsEndpoints::all(server.uri()),
        );
        let err = client.credentials().await.unwrap_err();
        assert!(matches!(err, CloudError::Auth(_)));
        assert!(err.to_string().contains("AccessDenied"));
    }

    #[tokio::test]
    async fn test_static_credentials_skip_sts() {
        let mut creds = base();
        creds.assume_role_arn = None;
        let client = AwsClient::new(
            reqwest::Client::new(),
            creds,
            AwsEndpoints::all("http://127.0.0.1:1"),
        );
        assert_eq!(client.credentials().await.unwrap().access_key_id, "AKIDBASE");
    }
}
