use std::time::{Duration, Instant};

use crate::artifact::{DistributedKey, KeyShare};
use crate::config::Config;
use crate::conversation::KeygenDetails;
use crate::driver::watcher::CeremonyWatcher;
use crate::driver::RoundDriver;
use crate::error::Error;
use crate::pairing::ActiveSession;
use crate::party::Party;
use crate::relay::ConversationStore;

#[derive(Debug, Clone)]
pub struct KeygenResult {
    pub distributed_key: DistributedKey,
    pub elapsed: Duration,
}

/// Generates a distributed key jointly with the counterparty
pub async fn run_keygen<P, S, W>(
    party: P,
    store: S,
    session: &ActiveSession,
    account_id: u32,
    config: &Config,
    watcher: W,
) -> Result<KeygenResult, Error>
where
    P: Party<Output = KeyShare>,
    S: ConversationStore,
    W: CeremonyWatcher,
{
    let started = Instant::now();
    let mut driver = RoundDriver::new(
        party,
        store,
        session.channel.clone(),
        session.session_id.clone(),
        KeygenDetails { account_id },
        config.conversation_expiry,
    )
    .set_expiry_policy(config.expiry_policy)
    .set_watcher(watcher);

    let share = driver.run().await?;
    tracing::info!(account_id, public_key = %share.public_key, "distributed key generated");
    Ok(KeygenResult {
        distributed_key: DistributedKey::new(account_id, share),
        elapsed: started.elapsed(),
    })
}
