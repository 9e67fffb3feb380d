// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sealed-box encryption for credential blobs.
//!
//! AES-256-GCM with a key derived as SHA-256 of the process-wide master key
//! string. A sealed blob is laid out as `nonce (12) || ciphertext || tag (16)`
//! and carries no key id, so rotating the master key invalidates every blob.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the derived AES-256 key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of the GCM nonce in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LENGTH: usize = 16;

/// Crypto box errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// Blob shorter than a nonce, or authentication failed.
    #[error("sealed blob is corrupt or was sealed with a different key")]
    Corrupt,

    /// The cipher rejected the input.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The opened plaintext is not the expected JSON shape.
    #[error("sealed payload is not valid JSON: {0}")]
    Payload(String),
}

/// Derive the 32-byte AES key from the master key string.
pub fn derive_key(master_key: &str) -> Zeroizing<[u8; KEY_LENGTH]> {
    let digest = Sha256::digest(master_key.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&digest);
    key
}

/// Seal `plaintext` under `master_key`.
pub fn seal(plaintext: &[u8], master_key: &str) -> Result<Vec<u8>, CryptoError> {
    let key = derive_key(master_key);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a blob produced by [`seal`].
pub fn open(blob: &[u8], master_key: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < NONCE_LENGTH {
        return Err(CryptoError::Corrupt);
    }

    let key = derive_key(master_key);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LENGTH);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Corrupt)?;

    Ok(Zeroizing::new(plaintext))
}

/// Master-key holder that seals and opens typed credential payloads.
#[derive(Clone)]
pub struct CredentialBox {
    master_key: Zeroizing<String>,
}

impl std::fmt::Debug for CredentialBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBox")
            .field("master_key", &"<redacted>")
            .finish()
    }
}

impl CredentialBox {
    /// Create a box for the given master key string.
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            master_key: Zeroizing::new(master_key.into()),
        }
    }

    /// Seal raw bytes.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(plaintext, &self.master_key)
    }

    /// Open raw bytes.
    pub fn open(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        open(blob, &self.master_key)
    }

    /// Serialize `value` as JSON and seal it.
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CryptoError> {
        let json = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CryptoError::Payload(e.to_string()))?,
        );
        self.seal(&json)
    }

    /// Open a blob and parse its JSON payload.
    pub fn open_json<T: DeserializeOwned>(&self, blob: &[u8]) -> Result<T, CryptoError> {
        let plaintext = self.open(blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let blob = seal(b"aws-key-material", "M").unwrap();
        let opened = open(&blob, "M").unwrap();
        assert_eq!(opened.as_slice(), b"aws-key-material");
        assert!(blob.len() >= NONCE_LENGTH + TAG_LENGTH + b"aws-key-material".len());
    }

    #[test]
    fn test_open_with_wrong_key_is_corrupt() {
        let blob = seal(b"aws-key-material", "M").unwrap();
        assert!(matches!(open(&blob, "N"), Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let a = seal(b"same", "M").unwrap();
        let b = seal(b"same", "M").unwrap();
        assert_ne!(a, b);
        assert_ne!(&a[..NONCE_LENGTH], &b[..NONCE_LENGTH]);
    }

    #[test]
    fn test_short_blob_is_corrupt() {
        assert!(matches!(open(&[0u8; 5], "M"), Err(CryptoError::Corrupt)));
        assert!(matches!(open(&[], "M"), Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_tampered_blob_is_corrupt() {
        let mut blob = seal(b"payload", "M").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(open(&blob, "M"), Err(CryptoError::Corrupt)));
    }

    #[test]
    fn test_empty_plaintext() {
        let blob = seal(b"", "M").unwrap();
        assert_eq!(blob.len(), NONCE_LENGTH + TAG_LENGTH);
        assert!(open(&blob, "M").unwrap().is_empty());
    }

    #[test]
    fn test_derive_key_is_sha256() {
        let key = derive_key("M");
        let expected = Sha256::digest(b"M");
        assert_eq!(key.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_credential_box_json() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Creds {
            key: String,
        }

        let sealer = CredentialBox::new("s3cr3t-master");
        let blob = sealer
            .seal_json(&Creds {
                key: "secret".into(),
            })
            .unwrap();
        let creds: Creds = sealer.open_json(&blob).unwrap();
        assert_eq!(creds.key, "secret");

        let other = CredentialBox::new("other");
        assert!(matches!(
            other.open_json::<Creds>(&blob),
            Err(CryptoError::Corrupt)
        ));
        assert!(!format!("{:?}", sealer).contains("s3cr3t"));
    }
}
