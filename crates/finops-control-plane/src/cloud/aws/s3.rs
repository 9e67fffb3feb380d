// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! S3 bucket lifecycle configuration.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use sha2::{Digest, Sha256};

use super::{AwsClient, sigv4};
use crate::cloud::Result;

/// One lifecycle rule applied to every object in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRule {
    /// Rule id.
    pub id: String,
    /// Days after creation before transitioning.
    pub transition_days: u32,
    /// Target storage class, e.g. `INTELLIGENT_TIERING`.
    pub storage_class: String,
    /// Days after creation before expiry, if any.
    pub expiration_days: Option<u32>,
}

impl LifecycleRule {
    /// Render the `LifecycleConfiguration` document.
    pub fn to_xml(&self) -> String {
        let expiration = self
            .expiration_days
            .map(|days| format!("<Expiration><Days>{}</Days></Expiration>", days))
            .unwrap_or_default();
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<LifecycleConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
                "<Rule><ID>{}</ID><Filter><Prefix></Prefix></Filter><Status>Enabled</Status>",
                "<Transition><Days>{}</Days><StorageClass>{}</StorageClass></Transition>",
                "{}</Rule></LifecycleConfiguration>"
            ),
            xml_escape(&self.id),
            self.transition_days,
            xml_escape(&self.storage_class),
            expiration
        )
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl AwsClient {
    /// `PutBucketLifecycleConfiguration`, replacing any existing rules.
    pub async fn put_bucket_lifecycle(
        &self,
        bucket: &str,
        region: &str,
        rule: &LifecycleRule,
    ) -> Result<()> {
        let mut url = self.endpoints().s3_bucket_url(bucket, region)?;
        url.set_query(Some("lifecycle"));

        let body = rule.to_xml().into_bytes();
        let headers = vec![
            ("content-type", "application/xml".to_string()),
            ("x-amz-content-sha256", sigv4::payload_hash(&body)),
            ("x-amz-sdk-checksum-algorithm", "SHA256".to_string()),
            ("x-amz-checksum-sha256", STANDARD.encode(Sha256::digest(&body))),
        ];
        self.rest_call("s3", Method::PUT, url, region, headers, body)
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudError;
    use crate::cloud::aws::AwsEndpoints;
    use finops_core::model::AwsCredentials;
    use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rule() -> LifecycleRule {
        LifecycleRule {
            id: "finops-lifecycle".into(),
            transition_days: 30,
            storage_class: "INTELLIGENT_TIERING".into(),
            expiration_days: Some(365),
        }
    }

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

    #[test]
    fn test_lifecycle_xml() {
        let xml = rule().to_xml();
        assert!(xml.contains("<ID>finops-lifecycle</ID>"));
        assert!(xml.contains("<Transition><Days>30</Days><StorageClass>INTELLIGENT_TIERING</StorageClass></Transition>"));
        assert!(xml.contains("<Expiration><Days>365</Days></Expiration>"));

        let mut no_expiry = rule();
        no_expiry.expiration_days = None;
        assert!(!no_expiry.to_xml().contains("Expiration"));
    }

    #[tokio::test]
    async fn test_put_bucket_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/logs-bucket"))
            .and(query_param("lifecycle", ""))
            .and(header_exists("x-amz-checksum-sha256"))
            .and(header_exists("authorization"))
            .and(body_string_contains("INTELLIGENT_TIERING"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .put_bucket_lifecycle("logs-bucket", "us-east-1", &rule())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_such_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
            ))
            .mount(&server)
            .await;

        let err = client(&server)
            .put_bucket_lifecycle("missing", "us-east-1", &rule())
            .await
            .unwrap_err();
        match err {
            CloudError::Service { status, code, .. } => {
                assert_eq!(status, 404);
                assert_eq!(code, "NoSuchBucket");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
