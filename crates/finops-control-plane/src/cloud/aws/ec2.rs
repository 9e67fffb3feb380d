// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! EC2 (query protocol, API version 2016-11-15).

use std::time::Duration;

use tracing::debug;

use super::{AwsClient, xml_text};
use crate::cloud::{CloudError, Result};

const VERSION: &str = "2016-11-15";

/// State and type of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// `pending`, `running`, `stopping`, `stopped`, ...
    pub state: String,
    /// Current instance type.
    pub instance_type: String,
}

impl AwsClient {
    async fn ec2_call(&self, region: &str, action: &str, params: Vec<(&str, String)>) -> Result<String> {
        let url = self.endpoints().ec2_url(region)?;
        let mut all = vec![("Action", action.to_string()), ("Version", VERSION.to_string())];
        all.extend(params);
        self.query_call("ec2", url, region, &all).await
    }

    /// `DescribeInstances` for a single id.
    pub async fn describe_instance(&self, region: &str, instance_id: &str) -> Result<InstanceInfo> {
        let body = self
            .ec2_call(region, "DescribeInstances", vec![("InstanceId.1", instance_id.to_string())])
            .await?;
        let doc = roxmltree::Document::parse(&body).map_err(|e| CloudError::Decode(e.to_string()))?;
        let instance = doc
            .descendants()
            .find(|n| n.has_tag_name("instancesSet"))
            .and_then(|set| set.children().find(|n| n.has_tag_name("item")))
            .ok_or_else(|| CloudError::Decode(format!("instance {} not in response", instance_id)))?;

        let child_text = |parent: roxmltree::Node<'_, '_>, tag: &str| {
            parent
                .children()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
                .unwrap_or_default()
        };
        let state = instance
            .children()
            .find(|n| n.has_tag_name("instanceState"))
            .map(|s| child_text(s, "name"))
            .unwrap_or_default();

        Ok(InstanceInfo {
            state,
            instance_type: child_text(instance, "instanceType"),
        })
    }

    /// `StopInstances`.
    pub async fn stop_instance(&self, region: &str, instance_id: &str) -> Result<()> {
        self.ec2_call(region, "StopInstances", vec![("InstanceId.1", instance_id.to_string())])
            .await
            .map(drop)
    }

    /// `StartInstances`.
    pub async fn start_instance(&self, region: &str, instance_id: &str) -> Result<()> {
        self.ec2_call(region, "StartInstances", vec![("InstanceId.1", instance_id.to_string())])
            .await
            .map(drop)
    }

    /// `TerminateInstances`.
    pub async fn terminate_instance(&self, region: &str, instance_id: &str) -> Result<()> {
        self.ec2_call(
            region,
            "TerminateInstances",
            vec![("InstanceId.1", instance_id.to_string())],
        )
        .await
        .map(drop)
    }

    /// `ModifyInstanceAttribute` setting the instance type. The instance must
    /// be stopped.
    pub async fn modify_instance_type(
        &self,
        region: &str,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<()> {
        self.ec2_call(
            region,
            "ModifyInstanceAttribute",
            vec![
                ("InstanceId", instance_id.to_string()),
                ("InstanceType.Value", instance_type.to_string()),
            ],
        )
        .await
        .map(drop)
    }

    /// Poll `DescribeInstances` until the instance reports `state`.
    pub async fn wait_for_instance_state(
        &self,
        region: &str,
        instance_id: &str,
        state: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<InstanceInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let info = self.describe_instance(region, instance_id).await?;
            if info.state == state {
                return Ok(info);
            }
            debug!(instance_id = %instance_id, current = %info.state, wanted = %state, "Waiting for instance state");
            if tokio::time::Instant::now() + poll > deadline {
                return Err(CloudError::Timeout(format!(
                    "instance {} did not reach {} within {:?}",
                    instance_id, state, timeout
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// `CreateSnapshot` with tags; returns the snapshot id.
    pub async fn create_snapshot(
        &self,
        region: &str,
        volume_id: &str,
        description: &str,
        tags: &[(&str, String)],
    ) -> Result<String> {
        let mut params = vec![
            ("VolumeId", volume_id.to_string()),
            ("Description", description.to_string()),
        ];
        let mut tag_params = Vec::new();
        if !tags.is_empty() {
            tag_params.push(("TagSpecification.1.ResourceType".to_string(), "snapshot".to_string()));
            for (i, (key, value)) in tags.iter().enumerate() {
                tag_params.push((format!("TagSpecification.1.Tag.{}.Key", i + 1), key.to_string()));
                tag_params.push((format!("TagSpecification.1.Tag.{}.Value", i + 1), value.clone()));
            }
        }
        params.extend(tag_params.iter().map(|(k, v)| (k.as_str(), v.clone())));

        let body = self.ec2_call(region, "CreateSnapshot", params).await?;
        xml_text(&body, "snapshotId")
            .ok_or_else(|| CloudError::Decode("CreateSnapshot response has no snapshotId".into()))
    }

    /// `DeleteVolume`.
    pub async fn delete_volume(&self, region: &str, volume_id: &str) -> Result<()> {
        self.ec2_call(region, "DeleteVolume", vec![("VolumeId", volume_id.to_string())])
            .await
            .map(drop)
    }

    /// `ModifyVolume` changing the volume type.
    pub async fn modify_volume_type(&self, region: &str, volume_id: &str, volume_type: &str) -> Result<()> {
        self.ec2_call(
            region,
            "ModifyVolume",
            vec![
                ("VolumeId", volume_id.to_string()),
                ("VolumeType", volume_type.to_string()),
            ],
        )
        .await
        .map(drop)
    }

    /// `ReleaseAddress` by allocation id.
    pub async fn release_address(&self, region: &str, allocation_id: &str) -> Result<()> {
        self.ec2_call(region, "ReleaseAddress", vec![("AllocationId", allocation_id.to_string())])
            .await
            .map(drop)
    }

    /// `DeleteSnapshot`.
    pub async fn delete_snapshot(&self, region: &str, snapshot_id: &str) -> Result<()> {
        self.ec2_call(region, "DeleteSnapshot", vec![("SnapshotId", snapshot_id.to_string())])
            .await
            .map(drop)
    }
}
