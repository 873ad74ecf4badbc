//! Pairing with the counterparty device and bearer token management
//!
//! Pairing goes through following stages:
//! 1. [`init`](PairingManager::init) generates fresh key pairs and a session id, which are shown to
//!    the counterparty out of band as a [`PairingPayload`]
//! 2. Counterparty registers itself at the token endpoint under that session id
//! 3. [`pair`](PairingManager::pair) proves ownership of the session and receives a bearer token,
//!    counterparty encryption key and, optionally, a backup of the distributed key
//!
//! Tokens are short-lived, [`active_session`](PairingManager::active_session) refreshes them on
//! demand.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use x25519_dalek::PublicKey;

use crate::artifact::DistributedKey;
use crate::backup::{BackupCodec, EntropySource};
use crate::channel::SecureChannel;
use crate::conversation::{
    now_millis, Collection, DocumentKey, FormatError, PairingRemark, PairingSignal,
};
use crate::error::{Bug, Error};
use crate::keys::{public_key_from_hex, EncryptionKeyPair, SigningKeyPair};
use crate::relay::ConversationStore;

mod token;
pub use token::*;

pub const SESSION_ID_LEN: usize = 19;

/// Data shown to the counterparty out of band (e.g. as a QR code)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingPayload {
    #[serde(alias = "pairingId")]
    pub session_id: String,
    pub web_enc_public_key: String,
    pub sign_public_key: String,
}

impl PairingPayload {
    pub fn to_json(&self) -> String {
        // Struct of plain strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Established pairing
#[derive(Clone)]
pub struct PairingSession {
    pub session_id: String,
    pub own_enc: EncryptionKeyPair,
    pub own_sign: SigningKeyPair,
    pub counterparty_enc: PublicKey,
    pub token: String,
    /// Unix time in milliseconds
    pub token_expiry: u64,
    pub counterparty_label: String,
}

impl PairingSession {
    pub fn channel(&self) -> SecureChannel {
        SecureChannel::new(self.own_enc.secret(), &self.counterparty_enc)
    }

    fn token_expires_within(&self, margin: Duration, now: u64) -> bool {
        let margin = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
        now > self.token_expiry.saturating_sub(margin)
    }
}

/// Persistent form of [`PairingSession`]
///
/// Contains private keys: it must only be kept in the device-local encrypted storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPairing {
    pub pairing_id: String,
    pub web_enc_public_key: String,
    pub web_enc_private_key: String,
    pub web_sign_public_key: String,
    pub web_sign_private_key: String,
    pub app_public_key: String,
    pub token: String,
    pub token_expiration: u64,
    pub device_name: String,
}

impl From<&PairingSession> for StoredPairing {
    fn from(s: &PairingSession) -> Self {
        Self {
            pairing_id: s.session_id.clone(),
            web_enc_public_key: s.own_enc.public_hex(),
            web_enc_private_key: s.own_enc.secret_hex(),
            web_sign_public_key: s.own_sign.public_hex(),
            web_sign_private_key: s.own_sign.secret_hex(),
            app_public_key: hex::encode(s.counterparty_enc.as_bytes()),
            token: s.token.clone(),
            token_expiration: s.token_expiry,
            device_name: s.counterparty_label.clone(),
        }
    }
}

impl TryFrom<StoredPairing> for PairingSession {
    type Error = Error;

    fn try_from(s: StoredPairing) -> Result<Self, Error> {
        let own_enc = EncryptionKeyPair::from_secret_hex(&s.web_enc_private_key)
            .map_err(|_| Error::InvalidStoredPairing("encryption secret key"))?;
        if own_enc.public_hex() != s.web_enc_public_key {
            return Err(Error::InvalidStoredPairing("encryption key pair mismatched"));
        }
        let own_sign = SigningKeyPair::from_secret_hex(&s.web_sign_private_key)
            .map_err(|_| Error::InvalidStoredPairing("signing secret key"))?;
        if own_sign.public_hex() != s.web_sign_public_key {
            return Err(Error::InvalidStoredPairing("signing key pair mismatched"));
        }
        let counterparty_enc = public_key_from_hex(&s.app_public_key)
            .map_err(|_| Error::InvalidStoredPairing("counterparty public key"))?;
        Ok(Self {
            session_id: s.pairing_id,
            own_enc,
            own_sign,
            counterparty_enc,
            token: s.token,
            token_expiry: s.token_expiration,
            counterparty_label: s.device_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStatus {
    Uninitialized,
    /// Pairing payload was generated, waiting for [`pair`](PairingManager::pair)
    Initialized,
    Paired { device_label: String },
    /// Paired, but the token has expired and has to be refreshed
    TokenExpired { device_label: String },
}

/// How the key recovered at pairing relates to the key currently in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// No key was in use, new pairing is active
    Fresh,
    /// Backup resolves to the key in use, new pairing is active
    Matched,
    /// Key is in use, but counterparty didn't provide a backup. New pairing is held pending
    NoBackup { expected: String },
    /// Backup resolves to another key. New pairing and recovered key are held pending
    Mismatch { expected: String, found: String },
}

impl Reconciliation {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Reconciliation::NoBackup { .. } | Reconciliation::Mismatch { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct PairingOutcome {
    pub device_label: String,
    /// Recovered key. It's `None` if there was no backup or if pairing is held pending
    pub recovered: Option<DistributedKey>,
    pub reconciliation: Reconciliation,
    pub elapsed: Duration,
}

/// Session which a ceremony is about to run in
#[derive(Debug)]
pub struct ActiveSession {
    pub session_id: String,
    pub channel: SecureChannel,
    pub token: String,
}

struct PendingInit {
    session_id: String,
    enc: EncryptionKeyPair,
    sign: SigningKeyPair,
}

struct PendingPairing {
    session: PairingSession,
    key: Option<DistributedKey>,
}

#[derive(Default)]
struct State {
    init: Option<PendingInit>,
    active: Option<PairingSession>,
    pending: Option<PendingPairing>,
}

pub struct PairingManager<S, T, E> {
    store: S,
    endpoint: T,
    codec: Arc<BackupCodec<E>>,
    refresh_margin: Duration,
    state: Mutex<State>,
}

impl<S, T, E> PairingManager<S, T, E>
where
    S: ConversationStore,
    T: TokenEndpoint,
    E: EntropySource,
{
    pub fn new(store: S, endpoint: T, codec: Arc<BackupCodec<E>>, refresh_margin: Duration) -> Self {
        Self {
            store,
            endpoint,
            codec,
            refresh_margin,
            state: Mutex::new(State::default()),
        }
    }

    /// Generates new key pairs and session id
    ///
    /// Discards previously generated payload. Pairing which is already established stays active
    /// until the new one completes.
    pub async fn init(&self) -> PairingPayload {
        let session_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        let enc = EncryptionKeyPair::generate();
        let sign = SigningKeyPair::generate();

        let payload = PairingPayload {
            session_id: session_id.clone(),
            web_enc_public_key: enc.public_hex(),
            sign_public_key: sign.public_hex(),
        };
        self.state.lock().await.init = Some(PendingInit {
            session_id,
            enc,
            sign,
        });
        tracing::debug!(session = %payload.session_id, "pairing initialized");
        payload
    }

    /// Completes pairing initiated by [`init`](Self::init)
    ///
    /// `current_identity` is the identity of the distributed key in use, if any. It's compared
    /// against the key recovered from backup; if they differ, the new pairing isn't activated
    /// until [`confirm_pending`](Self::confirm_pending) is called.
    pub async fn pair(&self, current_identity: Option<&str>) -> Result<PairingOutcome, Error> {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let init = state.init.as_ref().ok_or(Error::PairingNotInitialized)?;

        let req = GetTokenRequest {
            session_id: init.session_id.clone(),
            signature: init.sign.sign_hex(init.session_id.as_bytes()),
        };
        let resp = self.endpoint.get_token(&req).await?;
        let counterparty_enc = public_key_from_hex(&resp.counterparty_public_key)
            .map_err(FormatError::CounterpartyKey)?;
        self.store.authorize(&resp.token);
        let signal_key = DocumentKey::new(Collection::Pairing, init.session_id.clone());

        let recovered = match &resp.backup_data {
            Some(backup) => match self.codec.decrypt_key(backup).await {
                Ok(key) => Some(key),
                Err(err) => {
                    tracing::warn!(error = %err, "backup received at pairing is invalid");
                    self.signal(&signal_key, false, Some(PairingRemark::InvalidBackupData))
                        .await?;
                    return Err(err);
                }
            },
            None => None,
        };

        let reconciliation = match (current_identity, &recovered) {
            (None, _) => Reconciliation::Fresh,
            (Some(expected), None) => Reconciliation::NoBackup {
                expected: expected.to_owned(),
            },
            (Some(expected), Some(key)) if key.identity() == expected => Reconciliation::Matched,
            (Some(expected), Some(key)) => Reconciliation::Mismatch {
                expected: expected.to_owned(),
                found: key.identity().to_owned(),
            },
        };
        let (is_paired, remark) = match reconciliation {
            Reconciliation::Fresh | Reconciliation::Matched => (true, None),
            Reconciliation::NoBackup { .. } => {
                (false, Some(PairingRemark::NoBackupDataWhileRepairing))
            }
            Reconciliation::Mismatch { .. } => (true, Some(PairingRemark::WalletMismatch)),
        };
        self.signal(&signal_key, is_paired, remark).await?;

        let init = state.init.take().ok_or(Error::PairingNotInitialized)?;
        let session = PairingSession {
            session_id: init.session_id,
            own_enc: init.enc,
            own_sign: init.sign,
            counterparty_enc,
            token: resp.token,
            token_expiry: resp.token_expiration,
            counterparty_label: resp.device_label.clone(),
        };

        let recovered = if reconciliation.is_pending() {
            tracing::warn!(?reconciliation, "pairing is held pending until confirmed");
            state.pending = Some(PendingPairing {
                session,
                key: recovered,
            });
            None
        } else {
            state.active = Some(session);
            state.pending = None;
            recovered
        };

        Ok(PairingOutcome {
            device_label: resp.device_label,
            recovered,
            reconciliation,
            elapsed: started.elapsed(),
        })
    }

    /// Activates pairing held pending by [`pair`](Self::pair) and hands over recovered key
    pub async fn confirm_pending(&self) -> Result<Option<DistributedKey>, Error> {
        let mut state = self.state.lock().await;
        let pending = state.pending.take().ok_or(Error::NoPendingPairing)?;
        state.active = Some(pending.session);
        Ok(pending.key)
    }

    /// Drops pairing held pending, keeping the current one active
    pub async fn discard_pending(&self) -> bool {
        self.state.lock().await.pending.take().is_some()
    }

    /// Exchanges current token for a new one
    pub async fn refresh(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let session = Self::active_mut(&mut *state)?;
        self.refresh_locked(session).await
    }

    /// Returns the active session, refreshing the token if it's about to expire
    ///
    /// Refreshes are serialized: concurrent callers never refresh the same token twice.
    pub async fn active_session(&self) -> Result<ActiveSession, Error> {
        let mut state = self.state.lock().await;
        let session = Self::active_mut(&mut *state)?;
        if session.token_expires_within(self.refresh_margin, now_millis()) {
            self.refresh_locked(session).await?;
        }
        self.store.authorize(&session.token);
        Ok(ActiveSession {
            session_id: session.session_id.clone(),
            channel: session.channel(),
            token: session.token.clone(),
        })
    }

    pub async fn status(&self) -> PairingStatus {
        let state = self.state.lock().await;
        match (&state.active, &state.init) {
            (Some(session), _) if session.token_expiry < now_millis() => {
                PairingStatus::TokenExpired {
                    device_label: session.counterparty_label.clone(),
                }
            }
            (Some(session), _) => PairingStatus::Paired {
                device_label: session.counterparty_label.clone(),
            },
            (None, Some(_)) => PairingStatus::Initialized,
            (None, None) => PairingStatus::Uninitialized,
        }
    }

    /// Persistent form of the active pairing
    pub async fn stored(&self) -> Option<StoredPairing> {
        self.state.lock().await.active.as_ref().map(StoredPairing::from)
    }

    /// Restores pairing previously obtained via [`stored`](Self::stored)
    pub async fn restore(&self, stored: StoredPairing) -> Result<(), Error> {
        let session = PairingSession::try_from(stored)?;
        self.state.lock().await.active = Some(session);
        Ok(())
    }

    /// Forgets everything: active and pending pairings, generated payload
    pub async fn unpair(&self) {
        *self.state.lock().await = State::default();
        tracing::debug!("unpaired");
    }

    fn active_mut(state: &mut State) -> Result<&mut PairingSession, Error> {
        match state {
            State {
                active: Some(session),
                ..
            } => Ok(session),
            State { init: Some(_), .. } => Err(Error::NotPaired),
            _ => Err(Error::PairingNotInitialized),
        }
    }

    async fn refresh_locked(&self, session: &mut PairingSession) -> Result<(), Error> {
        let req = RefreshTokenRequest {
            token: session.token.clone(),
            signed_token: session.own_sign.sign_hex(session.token.as_bytes()),
        };
        let resp = self.endpoint.refresh_token(&req).await?;
        session.token = resp.token;
        session.token_expiry = resp.token_expiration;
        tracing::debug!(expiry = session.token_expiry, "token refreshed");
        Ok(())
    }

    async fn signal(
        &self,
        key: &DocumentKey,
        is_paired: bool,
        pairing_remark: Option<PairingRemark>,
    ) -> Result<(), Error> {
        let signal = PairingSignal {
            is_paired,
            pairing_remark,
        };
        let document = serde_json::to_value(&signal).map_err(Bug::SerializeDocument)?;
        self.store.write(key, document, false).await?;
        Ok(())
    }
}
