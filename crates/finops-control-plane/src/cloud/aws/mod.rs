// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal AWS client: SigV4 signing plus the JSON, query and REST protocols
//! used by Cost Explorer, STS, EC2 and S3.
//!
//! Credentials with an `assume_role_arn` are exchanged for session
//! credentials on first use; the session is kept for the lifetime of the
//! client, which is one sync or one remediation call.

pub mod ce;
pub mod ec2;
pub mod s3;
pub mod sigv4;
pub mod sts;

use chrono::Utc;
use finops_core::model::AwsCredentials;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use url::Url;

use super::{CloudError, Result, snippet};

/// Region Cost Explorer and STS are signed for.
pub const GLOBAL_REGION: &str = "us-east-1";

/// Endpoint overrides, used against local emulators and in tests.
#[derive(Debug, Clone, Default)]
pub struct AwsEndpoints {
    /// Cost Explorer base URL.
    pub cost_explorer: Option<String>,
    /// STS base URL.
    pub sts: Option<String>,
    /// EC2 base URL (all regions).
    pub ec2: Option<String>,
    /// S3 base URL; buckets are addressed path-style when set.
    pub s3: Option<String>,
}

impl AwsEndpoints {
    /// Point every service at one base URL.
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            cost_explorer: Some(base.clone()),
            sts: Some(base.clone()),
            ec2: Some(base.clone()),
            s3: Some(base),
        }
    }

    fn cost_explorer_url(&self) -> Result<Url> {
        parse_url(
            self.cost_explorer
                .as_deref()
                .unwrap_or("https://ce.us-east-1.amazonaws.com/"),
        )
    }

    fn sts_url(&self) -> Result<Url> {
        parse_url(self.sts.as_deref().unwrap_or("https://sts.amazonaws.com/"))
    }

    fn ec2_url(&self, region: &str) -> Result<Url> {
        match &self.ec2 {
            Some(base) => parse_url(base),
            None => parse_url(&format!("https://ec2.{}.amazonaws.com/", region)),
        }
    }

    fn s3_bucket_url(&self, bucket: &str, region: &str) -> Result<Url> {
        match &self.s3 {
            Some(base) => parse_url(&format!(
                "{}/{}",
                base.trim_end_matches('/'),
                sigv4::encode(bucket)
            )),
            None => parse_url(&format!("https://{}.s3.{}.amazonaws.com/", bucket, region)),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CloudError::Http(format!("invalid endpoint {}: {}", raw, e)))
}

/// Signed AWS API client for one set of credentials.
#[derive(Debug)]
pub struct AwsClient {
    http: reqwest::Client,
    base: AwsCredentials,
    endpoints: AwsEndpoints,
    session: OnceCell<AwsCredentials>,
}

impl AwsClient {
    /// Create a client. No request is made until the first call.
    pub fn new(http: reqwest::Client, credentials: AwsCredentials, endpoints: AwsEndpoints) -> Self {
        Self {
            http,
            base: credentials,
            endpoints,
            session: OnceCell::new(),
        }
    }

    /// Home region of the credentials.
    pub fn region(&self) -> &str {
        &self.base.region
    }

    /// Credentials used for signing, assuming the configured role first.
    pub async fn credentials(&self) -> Result<&AwsCredentials> {
        let Some(role_arn) = self.base.assume_role_arn.as_deref() else {
            return Ok(&self.base);
        };
        self.session
            .get_or_try_init(|| {
                sts::assume_role(
                    &self.http,
                    &self.base,
                    &self.endpoints,
                    role_arn,
                    self.base.external_id.as_deref(),
                )
            })
            .await
    }

    /// Call an AWS JSON 1.1 API (`X-Amz-Target` dispatch).
    pub(crate) async fn json_call<T: DeserializeOwned>(
        &self,
        service: &'static str,
        url: Url,
        region: &str,
        target: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let payload = serde_json::to_vec(body).map_err(|e| CloudError::Decode(e.to_string()))?;
        let headers = vec![
            ("content-type", "application/x-amz-json-1.1".to_string()),
            ("x-amz-target", target.to_string()),
        ];
        let credentials = self.credentials().await?;
        let (status, text) = send_signed(
            &self.http,
            credentials,
            SignedRequest {
                service,
                region,
                method: Method::POST,
                url,
                headers,
                body: payload,
            },
        )
        .await?;

        if !(200..300).contains(&status) {
            let (code, message) = parse_json_error(&text);
            return Err(CloudError::Service {
                service,
                status,
                code,
                message,
            });
        }
        serde_json::from_str(&text).map_err(|e| CloudError::Decode(e.to_string()))
    }

    /// Call an AWS query-protocol API and return the XML body.
    pub(crate) async fn query_call(
        &self,
        service: &'static str,
        url: Url,
        region: &str,
        params: &[(&str, String)],
    ) -> Result<String> {
        let credentials = self.credentials().await?;
        query_call_with(&self.http, credentials, service, url, region, params).await
    }

    /// Call a REST-XML API (S3) and return the body.
    pub(crate) async fn rest_call(
        &self,
        service: &'static str,
        method: Method,
        url: Url,
        region: &str,
        headers: Vec<(&str, String)>,
        body: Vec<u8>,
    ) -> Result<String> {
        let credentials = self.credentials().await?;
        let (status, text) = send_signed(
            &self.http,
            credentials,
            SignedRequest {
                service,
                region,
                method,
                url,
                headers,
                body,
            },
        )
        .await?;
        if !(200..300).contains(&status) {
            let (code, message) = parse_xml_error(&text);
            return Err(CloudError::Service {
                service,
                status,
                code,
                message,
            });
        }
        Ok(text)
    }

    pub(crate) fn endpoints(&self) -> &AwsEndpoints {
        &self.endpoints
    }
}

struct SignedRequest<'a> {
    service: &'static str,
    region: &'a str,
    method: Method,
    url: Url,
    headers: Vec<(&'a str, String)>,
    body: Vec<u8>,
}

/// Query protocol call with explicit credentials (STS needs the base pair).
pub(crate) async fn query_call_with(
    http: &reqwest::Client,
    credentials: &AwsCredentials,
    service: &'static str,
    url: Url,
    region: &str,
    params: &[(&str, String)],
) -> Result<String> {
    let body = params
        .iter()
        .map(|(k, v)| format!("{}={}", sigv4::encode(k), sigv4::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let headers = vec![(
        "content-type",
        "application/x-www-form-urlencoded; charset=utf-8".to_string(),
    )];
    let (status, text) = send_signed(
        http,
        credentials,
        SignedRequest {
            service,
            region,
            method: Method::POST,
            url,
            headers,
            body: body.into_bytes(),
        },
    )
    .await?;

    if !(200..300).contains(&status) {
        let (code, message) = parse_xml_error(&text);
        return Err(CloudError::Service {
            service,
            status,
            code,
            message,
        });
    }
    Ok(text)
}

async fn send_signed(
    http: &reqwest::Client,
    credentials: &AwsCredentials,
    request: SignedRequest<'_>,
) -> Result<(u16, String)> {
    let params = sigv4::SigningParams {
        access_key_id: &credentials.access_key_id,
        secret_access_key: &credentials.secret_access_key,
        session_token: credentials.session_token.as_deref(),
        region: request.region,
        service: request.service,
    };
    let signed = sigv4::sign(
        request.method.as_str(),
        &request.url,
        &request.headers,
        &request.body,
        &params,
        Utc::now(),
    );

    let mut builder = http.request(request.method, request.url);
    for (name, value) in signed {
        builder = builder.header(name, value);
    }
    let response = builder.body(request.body).send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    Ok((status, text))
}

fn parse_json_error(body: &str) -> (String, String) {
    let value: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let code = value
        .get("__type")
        .and_then(|v| v.as_str())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = value
        .get("message")
        .or_else(|| value.get("Message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| snippet(body));
    (code, message)
}

fn parse_xml_error(body: &str) -> (String, String) {
    let code = xml_text(body, "Code").unwrap_or_else(|| "Unknown".to_string());
    let message = xml_text(body, "Message").unwrap_or_else(|| snippet(body));
    (code, message)
}

/// Text of the first element named `tag`, anywhere in the document.
pub(crate) fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_error() {
        let (code, message) = parse_json_error(
            r#"{"__type":"com.amazonaws.ce#DataUnavailableException","message":"no data"}"#,
        );
        assert_eq!(code, "DataUnavailableException");
        assert_eq!(message, "no data");

        let (code, message) = parse_json_error("<html>bad gateway</html>");
        assert_eq!(code, "Unknown");
        assert!(message.contains("bad gateway"));
    }

    #[test]
    fn test_parse_xml_error() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Errors><Error><Code>InvalidInstanceID.NotFound</Code><Message>The instance ID 'i-1' does not exist</Message></Error></Errors><RequestID>abc</RequestID></Response>"#;
        let (code, message) = parse_xml_error(body);
        assert_eq!(code, "InvalidInstanceID.NotFound");
        assert!(message.contains("i-1"));
    }

    #[test]
    fn test_endpoint_resolution() {
        let defaults = AwsEndpoints::default();
        assert_eq!(
            defaults.ec2_url("eu-west-2").unwrap().as_str(),
            "https://ec2.eu-west-2.amazonaws.com/"
        );
        assert_eq!(
            defaults.s3_bucket_url("logs", "eu-west-2").unwrap().as_str(),
            "https://logs.s3.eu-west-2.amazonaws.com/"
        );

        let local = AwsEndpoints::all("http://127.0.0.1:4566/");
        assert_eq!(
            local.s3_bucket_url("logs", "eu-west-2").unwrap().as_str(),
            "http://127.0.0.1:4566/logs"
        );
        assert_eq!(
            local.cost_explorer_url().unwrap().as_str(),
            "http://127.0.0.1:4566/"
        );
    }
}
