//! Backup codec
//!
//! Distributed key material is encrypted under a key derived from device-bound entropy. Only the
//! salt, nonce and ciphertext leave the device, as `hex(salt).hex(nonce).base64(ciphertext)`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::artifact::{BackupBlob, DistributedKey};
use crate::channel::NONCE_SIZE;
use crate::error::{Bug, Error};

pub const SALT_SIZE: usize = 32;

/// Device-bound source of backup encryption keys
///
/// The same salt must always yield the same key on the same device.
#[async_trait]
pub trait EntropySource: Send + Sync {
    async fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, EntropyError>;
}

/// Entropy source backed by a device seed
///
/// Keys are derived as `HKDF-SHA256(ikm = seed, salt = salt)`.
pub struct SeededEntropy {
    seed: Zeroizing<Vec<u8>>,
}

impl SeededEntropy {
    pub fn new(seed: impl Into<Vec<u8>>) -> Self {
        Self {
            seed: Zeroizing::new(seed.into()),
        }
    }
}

#[async_trait]
impl EntropySource for SeededEntropy {
    async fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, EntropyError> {
        if self.seed.is_empty() {
            return Err(EntropyError::new("device seed is empty"));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(Some(salt), &self.seed)
            .expand(b"ceremony-relay/backup/v1", key.as_mut())
            .map_err(|_| EntropyError::new("hkdf output length"))?;
        Ok(key)
    }
}

#[derive(Debug, Error)]
#[error("entropy source failed: {reason}")]
pub struct EntropyError {
    reason: String,
}

impl EntropyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("expected 3 dot-separated parts, got {0}")]
    PartsCount(usize),
    #[error("{part} is not valid hex")]
    Hex {
        part: &'static str,
        #[source]
        err: hex::FromHexError,
    },
    #[error("ciphertext is not valid base64")]
    Base64(#[source] base64::DecodeError),
    #[error("{part} must be {expected} bytes, got {actual} bytes")]
    Length {
        part: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("backup doesn't decrypt under the device key")]
    Authentication,
    #[error("decrypted backup is not a distributed key")]
    Deserialize(#[source] serde_json::Error),
}

pub struct BackupCodec<E> {
    entropy: E,
}

impl<E: EntropySource> BackupCodec<E> {
    pub fn new(entropy: E) -> Self {
        Self { entropy }
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<BackupBlob, Error> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = self.entropy.derive_key(&salt).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| BackupError::Authentication)?;

        Ok(BackupBlob(format!(
            "{}.{}.{}",
            hex::encode(salt),
            hex::encode(nonce),
            BASE64.encode(ciphertext)
        )))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt)
    ///
    /// Any malformed input or wrong device key results into [`Error::InvalidBackupData`].
    pub async fn decrypt(&self, blob: &str) -> Result<Vec<u8>, Error> {
        let parts: Vec<&str> = blob.split('.').collect();
        let [salt, nonce, ciphertext] = parts.as_slice() else {
            return Err(BackupError::PartsCount(parts.len()).into());
        };
        let salt = decode_hex(salt, "salt", SALT_SIZE)?;
        let nonce = decode_hex(nonce, "nonce", NONCE_SIZE)?;
        let ciphertext = BASE64.decode(ciphertext).map_err(BackupError::Base64)?;

        let key = self.entropy.derive_key(&salt).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| BackupError::Authentication)?;
        Ok(plaintext)
    }

    pub async fn encrypt_key(&self, key: &DistributedKey) -> Result<BackupBlob, Error> {
        let serialized = Zeroizing::new(serde_json::to_vec(key).map_err(Bug::SerializeKey)?);
        self.encrypt(&serialized).await
    }

    pub async fn decrypt_key(&self, blob: &str) -> Result<DistributedKey, Error> {
        let plaintext = Zeroizing::new(self.decrypt(blob).await?);
        let key = serde_json::from_slice(&plaintext).map_err(BackupError::Deserialize)?;
        Ok(key)
    }
}

fn decode_hex(s: &str, part: &'static str, expected: usize) -> Result<Vec<u8>, BackupError> {
    let bytes = hex::decode(s).map_err(|err| BackupError::Hex { part, err })?;
    if bytes.len() != expected {
        return Err(BackupError::Length {
            part,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}
