// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AWS remediation executor (EC2 and S3).

use std::time::Duration;

use async_trait::async_trait;
use finops_core::model::{
    AwsCredentials, CloudCredentials, JsonMap, ProviderKind, RemediationAction, RemediationKind,
};
use serde_json::Value;
use tracing::info;

use super::{Executor, RemediationError, Result};
use crate::cloud::aws::s3::LifecycleRule;
use crate::cloud::aws::{AwsClient, AwsEndpoints};

/// Default bound on waiting for an instance to stop.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Executes EC2 and S3 actions with per-call credentials.
#[derive(Debug, Clone)]
pub struct AwsExecutor {
    http: reqwest::Client,
    endpoints: AwsEndpoints,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl AwsExecutor {
    /// Executor against the public AWS endpoints (or overrides).
    pub fn new(http: reqwest::Client, endpoints: AwsEndpoints) -> Self {
        Self {
            http,
            endpoints,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Override the stop wait bound and polling interval.
    pub fn with_wait(mut self, timeout: Duration, poll: Duration) -> Self {
        self.wait_timeout = timeout;
        self.poll_interval = poll;
        self
    }

    fn client(&self, credentials: &CloudCredentials) -> Result<AwsClient> {
        match credentials {
            CloudCredentials::Aws(creds) => Ok(AwsClient::new(
                self.http.clone(),
                creds.clone(),
                self.endpoints.clone(),
            )),
            other => Err(RemediationError::Credentials(format!(
                "AWS executor received {} credentials",
                other.kind()
            ))),
        }
    }

    fn region<'a>(action: &'a RemediationAction, credentials: &'a CloudCredentials) -> &'a str {
        if !action.region.is_empty() {
            return &action.region;
        }
        match credentials {
            CloudCredentials::Aws(AwsCredentials { region, .. }) => region,
            _ => "",
        }
    }

    /// Stop, wait for `stopped`, change type, start. Returns the type the
    /// instance had before.
    async fn resize(
        &self,
        client: &AwsClient,
        region: &str,
        instance_id: &str,
        target_type: &str,
    ) -> Result<String> {
        let before = client
            .describe_instance(region, instance_id)
            .await
            .map_err(|e| step_error("describe instance", e))?;

        info!(instance_id = %instance_id, "Stopping instance for resize");
        client
            .stop_instance(region, instance_id)
            .await
            .map_err(|e| step_error("stop instance", e))?;
        client
            .wait_for_instance_state(region, instance_id, "stopped", self.wait_timeout, self.poll_interval)
            .await
            .map_err(|e| step_error("wait for stopped", e))?;
        client
            .modify_instance_type(region, instance_id, target_type)
            .await
            .map_err(|e| step_error("modify instance type", e))?;
        client
            .start_instance(region, instance_id)
            .await
            .map_err(|e| step_error("start instance after resize", e))?;

        info!(instance_id = %instance_id, new_type = %target_type, "Instance resized");
        Ok(before.instance_type)
    }
}

fn step_error(step: &str, e: crate::cloud::CloudError) -> RemediationError {
    match RemediationError::from(e) {
        RemediationError::Upstream(message) => {
            RemediationError::Upstream(format!("{} failed: {}", step, message))
        }
        other => other,
    }
}

fn desired_str<'a>(action: &'a RemediationAction, key: &str) -> Option<&'a str> {
    action
        .desired_state
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn desired_days(action: &RemediationAction, key: &str, default: u32) -> u32 {
    action
        .desired_state
        .get(key)
        .and_then(Value::as_f64)
        .filter(|d| *d >= 0.0)
        .map(|d| d as u32)
        .unwrap_or(default)
}

#[async_trait]
impl Executor for AwsExecutor {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    async fn execute(
        &self,
        action: &RemediationAction,
        credentials: &CloudCredentials,
    ) -> Result<JsonMap> {
        let client = self.client(credentials)?;
        let region = Self::region(action, credentials);
        let resource = action.resource_id.as_str();
        let mut rollback = JsonMap::new();

        match action.kind {
            RemediationKind::ResizeInstance => {
                let target = desired_str(action, "instance_type").ok_or_else(|| {
                    finops_core::CoreError::validation("desired_state.instance_type is required for resize")
                })?;
                let original = self.resize(&client, region, resource, target).await?;
                rollback.insert("original_instance_type".into(), Value::String(original));
            }
            RemediationKind::StopInstance => {
                let before = client
                    .describe_instance(region, resource)
                    .await
                    .map_err(|e| step_error("describe instance", e))?;
                client
                    .stop_instance(region, resource)
                    .await
                    .map_err(|e| step_error("stop instance", e))?;
                rollback.insert("previous_state".into(), Value::String(before.state));
                info!(instance_id = %resource, "Instance stopped");
            }
            RemediationKind::TerminateInstance => {
                client
                    .terminate_instance(region, resource)
                    .await
                    .map_err(|e| step_error("terminate instance", e))?;
                info!(instance_id = %resource, "Instance terminated");
            }
            RemediationKind::DeleteVolume => {
                let snapshot_id = client
                    .create_snapshot(
                        region,
                        resource,
                        &format!("FinOps backup before delete - action {}", action.id),
                        &[("finops:action", action.id.to_string())],
                    )
                    .await
                    .map_err(|e| step_error("create backup snapshot", e))?;
                info!(volume_id = %resource, snapshot_id = %snapshot_id, "Backup snapshot created");
                client.delete_volume(region, resource).await.map_err(|e| {
                    step_error(&format!("delete volume (backup {})", snapshot_id), e)
                })?;
                rollback.insert("backup_snapshot_id".into(), Value::String(snapshot_id));
                info!(volume_id = %resource, "Volume deleted");
            }
            RemediationKind::UpgradeStorage => {
                let target = desired_str(action, "volume_type").unwrap_or("gp3");
                client
                    .modify_volume_type(region, resource, target)
                    .await
                    .map_err(|e| step_error("modify volume", e))?;
                if let Some(Value::String(previous)) = action.current_state.get("volume_type") {
                    rollback.insert("previous_volume_type".into(), Value::String(previous.clone()));
                }
                info!(volume_id = %resource, new_type = %target, "Volume upgraded");
            }
            RemediationKind::ReleaseElasticIp => {
                client
                    .release_address(region, resource)
                    .await
                    .map_err(|e| step_error("release address", e))?;
                info!(allocation_id = %resource, "Elastic IP released");
            }
            RemediationKind::DeleteSnapshot => {
                client
                    .delete_snapshot(region, resource)
                    .await
                    .map_err(|e| step_error("delete snapshot", e))?;
                info!(snapshot_id = %resource, "Snapshot deleted");
            }
            RemediationKind::ApplyLifecyclePolicy => {
                let rule = LifecycleRule {
                    id: "finops-lifecycle".to_string(),
                    transition_days: desired_days(action, "transition_days", 30),
                    storage_class: "INTELLIGENT_TIERING".to_string(),
                    expiration_days: Some(desired_days(action, "expiration_days", 365)),
                };
                client
                    .put_bucket_lifecycle(resource, region, &rule)
                    .await
                    .map_err(|e| step_error("put bucket lifecycle", e))?;
                info!(bucket = %resource, "Lifecycle policy applied");
            }
            other => {
                return Err(RemediationError::unsupported(format!(
                    "AWS remediation kind {}",
                    other
                )));
            }
        }
        Ok(rollback)
    }

    async fn rollback(
        &self,
        action: &RemediationAction,
        credentials: &CloudCredentials,
    ) -> Result<()> {
        let region = Self::region(action, credentials);
        let resource = action.resource_id.as_str();
        match action.kind {
            RemediationKind::ResizeInstance => {
                let original = action
                    .rollback_data
                    .get("original_instance_type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RemediationError::unsupported("rollback data missing original_instance_type")
                    })?;
                let client = self.client(credentials)?;
                self.resize(&client, region, resource, original).await?;
                Ok(())
            }
            RemediationKind::StopInstance => {
                let client = self.client(credentials)?;
                client
                    .start_instance(region, resource)
                    .await
                    .map_err(|e| step_error("start instance", e))?;
                info!(instance_id = %resource, "Instance started (rollback)");
                Ok(())
            }
            other => Err(RemediationError::unsupported(format!(
                "rollback of {} on AWS",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finops_core::model::{RemediationRequest, Risk};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> CloudCredentials {
        CloudCredentials::Aws(AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "eu-west-1".into(),
            assume_role_arn: None,
            external_id: None,
        })
    }

    fn action(kind: RemediationKind, resource: &str, desired: serde_json::Value) -> RemediationAction {
        RemediationAction::propose(
            Uuid::new_v4(),
            RemediationRequest {
                kind: Some(kind),
                provider: Some(ProviderKind::Aws),
                resource_id: resource.into(),
                region: "eu-west-1".into(),
                desired_state: desired.as_object().cloned().unwrap_or_default(),
                risk: Some(Risk::Low),
                ..Default::default()
            },
            "alice",
        )
        .unwrap()
    }

    fn describe(state: &str, instance_type: &str) -> String {
        format!(
            "<DescribeInstancesResponse><reservationSet><item><instancesSet><item>\
             <instanceState><name>{}</name></instanceState><instanceType>{}</instanceType>\
             </item></instancesSet></item></reservationSet></DescribeInstancesResponse>",
            state, instance_type
        )
    }

    fn executor(server: &MockServer) -> AwsExecutor {
        AwsExecutor::new(reqwest::Client::new(), AwsEndpoints::all(server.uri()))
            .with_wait(Duration::from_secs(1), Duration::from_millis(10))
    }

    async fn ok(server: &MockServer, action_name: &str) {
        Mock::given(method("POST"))
            .and(body_string_contains(format!("Action={}", action_name)))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Response><return>true</return></Response>"))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resize_records_original_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(describe("stopped", "m5.xlarge")))
            .mount(&server)
            .await;
        ok(&server, "StopInstances").await;
        ok(&server, "ModifyInstanceAttribute").await;
        ok(&server, "StartInstances").await;

        let action = action(
            RemediationKind::ResizeInstance,
            "i-0abc",
            json!({"instance_type": "m5.large"}),
        );
        let rollback = executor(&server).execute(&action, &credentials()).await.unwrap();
        assert_eq!(rollback["original_instance_type"], "m5.xlarge");
    }

    #[tokio::test]
    async fn test_resize_requires_target_type() {
        let server = MockServer::start().await;
        let action = action(RemediationKind::ResizeInstance, "i-0abc", json!({}));
        let err = executor(&server).execute(&action, &credentials()).await.unwrap_err();
        assert_eq!(err.kind(), finops_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_volume_snapshots_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=CreateSnapshot"))
            .and(body_string_contains("VolumeId=vol-9"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<CreateSnapshotResponse><snapshotId>snap-42</snapshotId></CreateSnapshotResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;
        ok(&server, "DeleteVolume").await;

        let action = action(RemediationKind::DeleteVolume, "vol-9", json!({}));
        let rollback = executor(&server).execute(&action, &credentials()).await.unwrap();
        assert_eq!(rollback["backup_snapshot_id"], "snap-42");

        let err = executor(&server).rollback(&action, &credentials()).await.unwrap_err();
        assert!(matches!(err, RemediationError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_upgrade_storage_defaults_to_gp3() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=ModifyVolume"))
            .and(body_string_contains("VolumeType=gp3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ModifyVolumeResponse/>"))
            .expect(1)
            .mount(&server)
            .await;

        let action = action(RemediationKind::UpgradeStorage, "vol-1", json!({}));
        executor(&server).execute(&action, &credentials()).await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_policy_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/logs-bucket"))
            .and(query_param("lifecycle", ""))
            .and(body_string_contains("<ID>finops-lifecycle</ID>"))
            .and(body_string_contains("<Days>30</Days>"))
            .and(body_string_contains("<Days>365</Days>"))
            .and(body_string_contains("INTELLIGENT_TIERING"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let action = action(RemediationKind::ApplyLifecyclePolicy, "logs-bucket", json!({}));
        executor(&server).execute(&action, &credentials()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_rollback_start() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(describe("running", "t3.large")))
            .mount(&server)
            .await;
        ok(&server, "StopInstances").await;
        ok(&server, "StartInstances").await;

        let mut action = action(RemediationKind::StopInstance, "i-1", json!({}));
        let rollback = executor(&server).execute(&action, &credentials()).await.unwrap();
        assert_eq!(rollback["previous_state"], "running");

        action.rollback_data = rollback;
        executor(&server).rollback(&action, &credentials()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_kind_and_wrong_credentials() {
        let server = MockServer::start().await;
        let action = action(RemediationKind::Cleanup, "x", json!({}));
        let err = executor(&server).execute(&action, &credentials()).await.unwrap_err();
        assert!(matches!(err, RemediationError::Unsupported(_)));

        let azure = CloudCredentials::Azure(finops_core::model::AzureCredentials {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "s".into(),
            subscription_id: "sub".into(),
        });
        let err = executor(&server).execute(&action, &azure).await.unwrap_err();
        assert!(matches!(err, RemediationError::Credentials(_)));
    }
}
