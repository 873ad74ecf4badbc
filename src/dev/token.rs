use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use super::PhoneDevice;
use crate::conversation::now_millis;
use crate::keys::{verifying_key_from_hex, InvalidKey};
use crate::pairing::{
    GetTokenRequest, GetTokenResponse, PairingPayload, RefreshTokenRequest, RefreshTokenResponse,
    TokenEndpoint,
};
use crate::relay::RelayError;

/// In-process token endpoint
///
/// Issues tokens to web parties whose pairing payload was [registered](Self::register) by a
/// simulated phone. Requests must be signed with the key announced in the payload.
pub struct LocalTokenEndpoint {
    inner: Mutex<Inner>,
}

struct Registration {
    sign_public: VerifyingKey,
    phone_public: String,
    device_label: String,
    backup_data: Option<String>,
}

struct Inner {
    registrations: HashMap<String, Registration>,
    /// Token -> session id
    tokens: HashMap<String, String>,
    token_lifetime: Duration,
    refreshes: usize,
}

impl LocalTokenEndpoint {
    pub fn new(token_lifetime: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registrations: HashMap::new(),
                tokens: HashMap::new(),
                token_lifetime,
                refreshes: 0,
            }),
        }
    }

    /// Phone scans the pairing payload
    ///
    /// `backup_data` is handed over to the web party at pairing, as if the phone kept it from a
    /// previous backup ceremony.
    pub fn register(
        &self,
        payload: &PairingPayload,
        phone: &PhoneDevice,
        backup_data: Option<String>,
    ) -> Result<(), InvalidKey> {
        let sign_public = verifying_key_from_hex(&payload.sign_public_key)?;
        self.lock().registrations.insert(
            payload.session_id.clone(),
            Registration {
                sign_public,
                phone_public: phone.enc.public_hex(),
                device_label: phone.label.clone(),
                backup_data,
            },
        );
        Ok(())
    }

    /// Lifetime of tokens issued from now on
    pub fn set_token_lifetime(&self, token_lifetime: Duration) {
        self.lock().token_lifetime = token_lifetime;
    }

    /// Number of served refresh requests
    pub fn refreshes(&self) -> usize {
        self.lock().refreshes
    }

    fn lock(&self) -> MutexGuard<Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn issue(&mut self, session_id: String) -> (String, u64) {
        let mut token = [0u8; 16];
        OsRng.fill_bytes(&mut token);
        let token = hex::encode(token);
        let lifetime = u64::try_from(self.token_lifetime.as_millis()).unwrap_or(u64::MAX);
        self.tokens.insert(token.clone(), session_id);
        (token, now_millis().saturating_add(lifetime))
    }
}

fn verify(key: &VerifyingKey, message: &[u8], signature: &str) -> Result<(), RelayError> {
    let signature = hex::decode(signature).map_err(|_| RelayError::Unauthorized)?;
    let signature = Signature::from_slice(&signature).map_err(|_| RelayError::Unauthorized)?;
    key.verify_strict(message, &signature)
        .map_err(|_| RelayError::Unauthorized)
}

#[async_trait]
impl TokenEndpoint for LocalTokenEndpoint {
    async fn get_token(&self, req: &GetTokenRequest) -> Result<GetTokenResponse, RelayError> {
        let mut inner = self.lock();
        let registration = inner
            .registrations
            .get(&req.session_id)
            .ok_or(RelayError::Unauthorized)?;
        verify(
            &registration.sign_public,
            req.session_id.as_bytes(),
            &req.signature,
        )?;
        let counterparty_public_key = registration.phone_public.clone();
        let device_label = registration.device_label.clone();
        let backup_data = registration.backup_data.clone();

        let (token, token_expiration) = inner.issue(req.session_id.clone());
        Ok(GetTokenResponse {
            token,
            counterparty_public_key,
            token_expiration,
            device_label,
            backup_data,
        })
    }

    async fn refresh_token(
        &self,
        req: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, RelayError> {
        let mut inner = self.lock();
        let session_id = inner
            .tokens
            .get(&req.token)
            .ok_or(RelayError::Unauthorized)?
            .clone();
        let registration = inner
            .registrations
            .get(&session_id)
            .ok_or(RelayError::Unauthorized)?;
        verify(
            &registration.sign_public,
            req.token.as_bytes(),
            &req.signed_token,
        )?;

        inner.tokens.remove(&req.token);
        inner.refreshes += 1;
        let (token, token_expiration) = inner.issue(session_id);
        Ok(RefreshTokenResponse {
            token,
            token_expiration,
        })
    }
}
