// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builds transient providers from sealed credential blobs.
//!
//! Provider implementations register a constructor per kind at startup
//! ([`ProviderFactory::with_aws`], [`ProviderFactory::with_azure`]). A kind
//! without a constructor fails with [`ProviderError::UnsupportedProvider`].
//! Providers built here belong to one tenant and one sync; callers close them
//! when done.

use std::sync::Arc;

use finops_core::CredentialBox;
use finops_core::model::{
    AwsCredentials, AzureCredentials, CloudCredentials, ProviderKind, SealedBlob,
};

use super::{CloudProvider, ProviderError, Result};

/// Constructor slot for one provider kind.
pub type Constructor<C> = Arc<dyn Fn(C) -> Result<Box<dyn CloudProvider>> + Send + Sync>;

/// Sealed blob + kind → transient provider.
#[derive(Clone)]
pub struct ProviderFactory {
    sealer: CredentialBox,
    aws_from_creds: Option<Constructor<AwsCredentials>>,
    azure_from_creds: Option<Constructor<AzureCredentials>>,
}

impl ProviderFactory {
    /// A factory with no constructors registered.
    pub fn new(sealer: CredentialBox) -> Self {
        Self {
            sealer,
            aws_from_creds: None,
            azure_from_creds: None,
        }
    }

    /// Register the AWS constructor.
    pub fn with_aws<F>(mut self, constructor: F) -> Self
    where
        F: Fn(AwsCredentials) -> Result<Box<dyn CloudProvider>> + Send + Sync + 'static,
    {
        self.aws_from_creds = Some(Arc::new(constructor));
        self
    }

    /// Register the Azure constructor.
    pub fn with_azure<F>(mut self, constructor: F) -> Self
    where
        F: Fn(AzureCredentials) -> Result<Box<dyn CloudProvider>> + Send + Sync + 'static,
    {
        self.azure_from_creds = Some(Arc::new(constructor));
        self
    }

    /// The credential box used to open and seal blobs.
    pub fn sealer(&self) -> &CredentialBox {
        &self.sealer
    }

    /// Whether a constructor is registered for `kind`.
    pub fn supports(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Aws => self.aws_from_creds.is_some(),
            ProviderKind::Azure => self.azure_from_creds.is_some(),
            ProviderKind::Gcp => false,
        }
    }

    /// Decrypt a blob into typed credentials for `kind`.
    pub fn open_credentials(&self, kind: ProviderKind, blob: &SealedBlob) -> Result<CloudCredentials> {
        if blob.is_empty() {
            return Err(ProviderError::Corrupt("binding has no sealed credentials".into()));
        }
        match kind {
            ProviderKind::Aws => Ok(CloudCredentials::Aws(self.sealer.open_json(blob.as_bytes())?)),
            ProviderKind::Azure => Ok(CloudCredentials::Azure(
                self.sealer.open_json(blob.as_bytes())?,
            )),
            ProviderKind::Gcp => Err(ProviderError::UnsupportedProvider(kind)),
        }
    }

    /// Build a provider from a sealed blob.
    pub fn from_sealed(&self, kind: ProviderKind, blob: &SealedBlob) -> Result<Box<dyn CloudProvider>> {
        if !self.supports(kind) {
            return Err(ProviderError::UnsupportedProvider(kind));
        }
        let credentials = self.open_credentials(kind, blob)?;
        self.from_credentials(credentials)
    }

    /// Build a provider from decrypted credentials.
    pub fn from_credentials(&self, credentials: CloudCredentials) -> Result<Box<dyn CloudProvider>> {
        match credentials {
            CloudCredentials::Aws(creds) => match &self.aws_from_creds {
                Some(constructor) => constructor(creds),
                None => Err(ProviderError::UnsupportedProvider(ProviderKind::Aws)),
            },
            CloudCredentials::Azure(creds) => match &self.azure_from_creds {
                Some(constructor) => constructor(creds),
                None => Err(ProviderError::UnsupportedProvider(ProviderKind::Azure)),
            },
        }
    }

    /// Serialize typed credentials to JSON and seal them.
    pub fn seal_credentials(&self, credentials: &CloudCredentials) -> Result<SealedBlob> {
        let bytes = match credentials {
            CloudCredentials::Aws(creds) => self.sealer.seal_json(creds)?,
            CloudCredentials::Azure(creds) => self.sealer.seal_json(creds)?,
        };
        Ok(SealedBlob::new(bytes))
    }
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("aws", &self.aws_from_creds.is_some())
            .field("azure", &self.azure_from_creds.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use finops_core::ErrorKind;

    fn aws_creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "eu-west-2".into(),
            assume_role_arn: None,
            external_id: None,
        }
    }

    fn factory() -> ProviderFactory {
        ProviderFactory::new(CredentialBox::new("master")).with_aws(|creds: AwsCredentials| {
            Ok(Box::new(MockProvider::new(
                format!("aws-{}", creds.region),
                ProviderKind::Aws,
            )) as Box<dyn CloudProvider>)
        })
    }

    #[test]
    fn test_seal_then_build() {
        let factory = factory();
        let blob = factory
            .seal_credentials(&CloudCredentials::Aws(aws_creds()))
            .unwrap();
        assert!(!blob.is_empty());

        let provider = factory.from_sealed(ProviderKind::Aws, &blob).unwrap();
        assert_eq!(provider.name(), "aws-eu-west-2");
        assert_eq!(provider.kind(), ProviderKind::Aws);
    }

    #[test]
    fn test_unregistered_kinds_are_unsupported() {
        let factory = factory();
        let blob = factory
            .seal_credentials(&CloudCredentials::Aws(aws_creds()))
            .unwrap();

        for kind in [ProviderKind::Azure, ProviderKind::Gcp] {
            let err = factory.from_sealed(kind, &blob).err().unwrap();
            assert!(matches!(err, ProviderError::UnsupportedProvider(k) if k == kind));
            assert_eq!(err.kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_wrong_master_key_is_corrupt() {
        let blob = factory()
            .seal_credentials(&CloudCredentials::Aws(aws_creds()))
            .unwrap();
        let other = ProviderFactory::new(CredentialBox::new("other")).with_aws(|_| {
            Err(ProviderError::Credentials("unreachable".into()))
        });
        let err = other.from_sealed(ProviderKind::Aws, &blob).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = factory()
            .from_sealed(ProviderKind::Aws, &SealedBlob::default())
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Corrupt(_)));
    }

    #[test]
    fn test_open_credentials_round_trip() {
        let factory = factory();
        let creds = CloudCredentials::Aws(aws_creds());
        let blob = factory.seal_credentials(&creds).unwrap();
        assert_eq!(factory.open_credentials(ProviderKind::Aws, &blob).unwrap(), creds);
        assert!(!format!("{:?}", factory).contains("master"));
    }
}
