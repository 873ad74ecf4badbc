use std::time::{Duration, Instant};

use crate::artifact::Signature;
use crate::config::Config;
use crate::conversation::{SignDetails, SignMetadata};
use crate::driver::watcher::CeremonyWatcher;
use crate::driver::RoundDriver;
use crate::error::Error;
use crate::pairing::ActiveSession;
use crate::party::Party;
use crate::relay::ConversationStore;

/// Request to sign a message with the distributed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub account_id: u32,
    /// Joint public key of the distributed key
    pub public_key: String,
    pub hash_alg: String,
    /// Signed message as it's shown to the user, optionally `0x`-prefixed
    pub message: String,
    /// 32-byte message digest, hex encoded, optionally `0x`-prefixed
    pub message_hash: String,
    pub metadata: SignMetadata,
}

/// Sign request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedSign {
    pub details: SignDetails,
    pub message_hash: [u8; 32],
}

impl SignRequest {
    pub fn validate(self) -> Result<ValidatedSign, Error> {
        let hash_hex = strip_0x(&self.message_hash);
        // Non-hex digest can't be 32 bytes long either
        let hash = hex::decode(hash_hex).map_err(|_| Error::InvalidMessageHashLength(0))?;
        let message_hash = <[u8; 32]>::try_from(hash.as_slice())
            .map_err(|_| Error::InvalidMessageHashLength(hash.len()))?;

        Ok(ValidatedSign {
            details: SignDetails {
                account_id: self.account_id,
                public_key: self.public_key,
                hash_alg: self.hash_alg,
                sign_message: strip_0x(&self.message).to_owned(),
                message_hash: hex::encode(message_hash),
                sign_metadata: self.metadata,
            },
            message_hash,
        })
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

#[derive(Debug, Clone)]
pub struct SignResult {
    pub signature: Signature,
    pub elapsed: Duration,
}

/// Signs the validated request jointly with the counterparty
pub async fn run_sign<P, S, W>(
    party: P,
    store: S,
    session: &ActiveSession,
    request: ValidatedSign,
    config: &Config,
    watcher: W,
) -> Result<SignResult, Error>
where
    P: Party<Output = Signature>,
    S: ConversationStore,
    W: CeremonyWatcher,
{
    let started = Instant::now();
    let account_id = request.details.account_id;
    let mut driver = RoundDriver::new(
        party,
        store,
        session.channel.clone(),
        session.session_id.clone(),
        request.details,
        config.conversation_expiry,
    )
    .set_expiry_policy(config.expiry_policy)
    .set_watcher(watcher);

    let signature = driver.run().await?;
    tracing::info!(account_id, "message signed");
    Ok(SignResult {
        signature,
        elapsed: started.elapsed(),
    })
}
