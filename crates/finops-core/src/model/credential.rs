// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-tenant credential bindings and typed credential payloads.
//!
//! The sealed blob is opaque outside the crypto box. It is skipped by serde and
//! redacted from `Debug`, so it never reaches logs or external payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProviderKind;

text_enum! {
    /// Connection status of a binding.
    pub enum BindingStatus {
        /// Created, never synced.
        Pending => "pending",
        /// Last sync succeeded.
        Connected => "connected",
        /// Last sync or instantiation failed.
        Error => "error",
    }
}

/// Opaque sealed credential bytes (`nonce || ciphertext || tag`).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    /// Wrap sealed bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the sealed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True when no blob was loaded (list reads never load it).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SealedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealedBlob(<{} bytes>)", self.0.len())
    }
}

impl From<Vec<u8>> for SealedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A tenant's stored credential record for one provider kind.
///
/// At most one binding exists per (tenant, provider kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBinding {
    /// Binding identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Which cloud the credentials are for.
    pub provider: ProviderKind,
    /// Display name.
    pub name: String,
    /// Sealed credential JSON. Empty unless loaded through the factory path.
    #[serde(skip)]
    pub sealed_credentials: SealedBlob,
    /// Whether the scheduler syncs this binding.
    pub enabled: bool,
    /// Last known connection status.
    pub status: BindingStatus,
    /// Message accompanying the status.
    pub status_message: Option<String>,
    /// When costs were last synced.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When the binding was created.
    pub created_at: DateTime<Utc>,
    /// When the binding was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CredentialBinding {
    /// Create a pending binding.
    pub fn new(
        organization_id: Uuid,
        provider: ProviderKind,
        name: impl Into<String>,
        sealed_credentials: SealedBlob,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            provider,
            name: name.into(),
            sealed_credentials,
            enabled: true,
            status: BindingStatus::Pending,
            status_message: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a binding. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct BindingUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// Replacement sealed blob.
    pub sealed_credentials: Option<SealedBlob>,
}

/// AWS credential payload sealed inside a binding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    #[serde(alias = "secret_key")]
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Home region.
    #[serde(default = "default_aws_region")]
    pub region: String,
    /// Role to assume before calling AWS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assume_role_arn: Option<String>,
    /// External id passed when assuming the role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("assume_role_arn", &self.assume_role_arn)
            .finish()
    }
}

/// Azure service-principal payload sealed inside a binding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureCredentials {
    /// Entra tenant id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Subscription whose costs are read.
    pub subscription_id: String,
}

impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Decrypted credentials, typed per provider kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCredentials {
    /// AWS access keys.
    Aws(AwsCredentials),
    /// Azure service principal.
    Azure(AzureCredentials),
}

impl CloudCredentials {
    /// The provider kind these credentials belong to.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Aws(_) => ProviderKind::Aws,
            Self::Azure(_) => ProviderKind::Azure,
        }
    }
}
