//! Documents exchanged through the relay
//!
//! Relay documents are untrusted: every document is decoded into a typed record and validated
//! before the driver looks at it.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::channel::Sealed;
use crate::keys::InvalidKey;

/// Kind of ceremony run through a [`RoundDriver`](crate::driver::RoundDriver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Keygen,
    Sign,
    Backup,
}

impl CeremonyKind {
    pub const ALL: [CeremonyKind; 3] = [CeremonyKind::Keygen, CeremonyKind::Sign, CeremonyKind::Backup];

    pub fn as_str(self) -> &'static str {
        match self {
            CeremonyKind::Keygen => "keygen",
            CeremonyKind::Sign => "sign",
            CeremonyKind::Backup => "backup",
        }
    }
}

impl fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Pairing,
    Keygen,
    Sign,
    Backup,
    Users,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Pairing => "pairing",
            Collection::Keygen => "keygen",
            Collection::Sign => "sign",
            Collection::Backup => "backup",
            Collection::Users => "users",
        }
    }
}

impl From<CeremonyKind> for Collection {
    fn from(kind: CeremonyKind) -> Self {
        match kind {
            CeremonyKind::Keygen => Collection::Keygen,
            CeremonyKind::Sign => Collection::Sign,
            CeremonyKind::Backup => Collection::Backup,
        }
    }
}

/// Address of a relay document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub collection: Collection,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<Collection>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.id)
    }
}

/// Which side of the ceremony sent an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PartyIndex {
    /// Browser-resident party, always sends first
    Web,
    /// Mobile-resident party
    Phone,
}

impl PartyIndex {
    pub fn counterparty(self) -> Self {
        match self {
            PartyIndex::Web => PartyIndex::Phone,
            PartyIndex::Phone => PartyIndex::Web,
        }
    }
}

impl From<PartyIndex> for u8 {
    fn from(p: PartyIndex) -> u8 {
        match p {
            PartyIndex::Web => 1,
            PartyIndex::Phone => 2,
        }
    }
}

impl TryFrom<u8> for PartyIndex {
    type Error = String;
    fn try_from(p: u8) -> Result<Self, Self::Error> {
        match p {
            1 => Ok(PartyIndex::Web),
            2 => Ok(PartyIndex::Phone),
            _ => Err(format!("unknown party {p}, expected 1 or 2")),
        }
    }
}

impl fmt::Display for PartyIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Out-of-band consent given on the counterparty device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum ApprovalState {
    #[default]
    Unknown,
    Approved,
    Rejected,
}

impl From<Option<bool>> for ApprovalState {
    fn from(v: Option<bool>) -> Self {
        match v {
            None => ApprovalState::Unknown,
            Some(true) => ApprovalState::Approved,
            Some(false) => ApprovalState::Rejected,
        }
    }
}

impl From<ApprovalState> for Option<bool> {
    fn from(s: ApprovalState) -> Self {
        match s {
            ApprovalState::Unknown => None,
            ApprovalState::Approved => Some(true),
            ApprovalState::Rejected => Some(false),
        }
    }
}

/// Ceremony message as it's carried in a relay document
///
/// `message` (base64 ciphertext) and `nonce` (hex) are either both present or both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub party: PartyIndex,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Envelope {
    pub fn empty(party: PartyIndex, round: u32) -> Self {
        Self {
            party,
            round,
            message: None,
            nonce: None,
        }
    }

    pub fn sealed(party: PartyIndex, round: u32, sealed: &Sealed) -> Self {
        Self {
            party,
            round,
            message: Some(BASE64.encode(&sealed.ciphertext)),
            nonce: Some(hex::encode(sealed.nonce)),
        }
    }

    /// Decodes `(nonce, ciphertext)` if the envelope carries a payload
    pub fn payload(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, FormatError> {
        match (&self.message, &self.nonce) {
            (None, None) => Ok(None),
            (Some(message), Some(nonce)) => {
                let ciphertext = BASE64.decode(message).map_err(FormatError::Base64)?;
                let nonce = hex::decode(nonce).map_err(FormatError::Hex)?;
                Ok(Some((nonce, ciphertext)))
            }
            _ => Err(FormatError::HalfPayload),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), FormatError> {
        if self.round == 0 {
            return Err(FormatError::ZeroRound);
        }
        if self.message.is_some() != self.nonce.is_some() {
            return Err(FormatError::HalfPayload);
        }
        Ok(())
    }
}

/// Kind-specific fields of a [`ConversationRecord`]
pub trait CeremonyDetails:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const KIND: CeremonyKind;
}

/// Relay document of a keygen or sign ceremony
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord<D> {
    pub session_id: String,
    /// Unix time in milliseconds
    pub created_at: u64,
    /// Validity window in milliseconds, counted from `created_at`
    pub expiry: u64,
    #[serde(default)]
    pub is_approved: ApprovalState,
    pub message: Envelope,
    #[serde(flatten)]
    pub details: D,
}

impl<D: CeremonyDetails> ConversationRecord<D> {
    pub fn new(session_id: String, expiry: Duration, details: D) -> Self {
        Self {
            session_id,
            created_at: now_millis(),
            expiry: u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX),
            is_approved: ApprovalState::Unknown,
            message: Envelope::empty(PartyIndex::Web, 1),
            details,
        }
    }

    /// Decodes untrusted relay document
    pub fn decode(document: serde_json::Value) -> Result<Self, FormatError> {
        let record: Self = serde_json::from_value(document).map_err(FormatError::Json)?;
        if record.session_id.is_empty() {
            return Err(FormatError::EmptySessionId);
        }
        record.message.validate()?;
        Ok(record)
    }

    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// How long ago the record expired, if it did
    pub fn overdue(&self, now: u64) -> Option<Duration> {
        overdue(self.created_at, self.expiry, now)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        deadline(self.created_at, self.expiry, now_millis())
    }
}

pub(crate) fn overdue(created_at: u64, expiry: u64, now: u64) -> Option<Duration> {
    let deadline = created_at.saturating_add(expiry);
    (now > deadline).then(|| Duration::from_millis(now - deadline))
}

/// Local instant at which the record expires, `None` if it can't be represented
pub(crate) fn deadline(created_at: u64, expiry: u64, now: u64) -> Option<Instant> {
    let left = created_at.saturating_add(expiry).saturating_sub(now);
    Instant::now().checked_add(Duration::from_millis(left))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeygenDetails {
    pub account_id: u32,
}

impl CeremonyDetails for KeygenDetails {
    const KIND: CeremonyKind = CeremonyKind::Keygen;
}

/// What kind of payload a sign request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignMetadata {
    #[serde(rename = "legacy_transaction")]
    LegacyTransaction,
    #[serde(rename = "eth_sign")]
    EthSign,
    #[serde(rename = "personal_sign")]
    PersonalSign,
    #[serde(rename = "eth_signTypedData")]
    SignTypedData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignDetails {
    pub account_id: u32,
    pub public_key: String,
    pub hash_alg: String,
    pub sign_message: String,
    /// 32-byte digest, hex without `0x` prefix
    pub message_hash: String,
    pub sign_metadata: SignMetadata,
}

impl CeremonyDetails for SignDetails {
    const KIND: CeremonyKind = CeremonyKind::Sign;
}

/// Relay document of a backup ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub backup_data: String,
    pub pairing_id: String,
    pub created_at: u64,
    pub expiry: u64,
    #[serde(default)]
    pub is_backed_up: Option<bool>,
}

impl BackupRecord {
    pub fn decode(document: serde_json::Value) -> Result<Self, FormatError> {
        serde_json::from_value(document).map_err(FormatError::Json)
    }

    pub fn overdue(&self, now: u64) -> Option<Duration> {
        overdue(self.created_at, self.expiry, now)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        deadline(self.created_at, self.expiry, now_millis())
    }
}

/// Why pairing didn't go through cleanly, as reported to the counterparty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairingRemark {
    WalletMismatch,
    NoBackupDataWhileRepairing,
    InvalidBackupData,
}

/// Pairing outcome signalled to the counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSignal {
    pub is_paired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_remark: Option<PairingRemark>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReport {
    pub client_version: String,
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("document doesn't match the schema")]
    Json(#[source] serde_json::Error),
    #[error("session id is empty")]
    EmptySessionId,
    #[error("round numbers start from 1")]
    ZeroRound,
    #[error("message and nonce must be both present or both absent")]
    HalfPayload,
    #[error("message is not valid base64")]
    Base64(#[source] base64::DecodeError),
    #[error("nonce is not valid hex")]
    Hex(#[source] hex::FromHexError),
    #[error("counterparty public key is invalid")]
    CounterpartyKey(#[source] InvalidKey),
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
