//! Terminal outputs of ceremonies

use serde::{Deserialize, Serialize};

/// Local share of a distributed key, produced by a keygen ceremony
///
/// The share content is opaque: only the ceremony engine knows how to interpret `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShare {
    /// Joint public key, hex encoded
    pub public_key: String,
    pub data: serde_json::Value,
}

/// Result of a sign ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Signature bytes, hex encoded
    pub signature: String,
    pub recovery_id: u8,
}

/// Backup produced by [`BackupCodec`](crate::backup::BackupCodec), in its wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupBlob(pub String);

/// Key share bound to an account, as it is backed up and restored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedKey {
    pub account_id: u32,
    pub public_key: String,
    pub key_share_data: serde_json::Value,
}

impl DistributedKey {
    pub fn new(account_id: u32, share: KeyShare) -> Self {
        Self {
            account_id,
            public_key: share.public_key,
            key_share_data: share.data,
        }
    }

    /// Identity used to tell two keys apart when re-pairing
    pub fn identity(&self) -> &str {
        &self.public_key
    }
}
