use futures_util::StreamExt;
use tracing::Instrument;

use crate::artifact::{BackupBlob, DistributedKey};
use crate::backup::{BackupCodec, EntropySource};
use crate::config::{Config, ExpiryPolicy};
use crate::conversation::{now_millis, BackupRecord, CeremonyKind, DocumentKey};
use crate::driver::watcher::{CeremonyWatcher, Event};
use crate::error::{Bug, Error};
use crate::pairing::ActiveSession;
use crate::relay::{ConversationStore, RelayError};

/// Hands encrypted distributed key over to the counterparty for safekeeping
///
/// Waits until the counterparty acknowledges the backup. Returns the blob that was stored.
pub async fn run_backup<S, E, W>(
    key: &DistributedKey,
    codec: &BackupCodec<E>,
    store: S,
    session: &ActiveSession,
    config: &Config,
    mut watcher: W,
) -> Result<BackupBlob, Error>
where
    S: ConversationStore,
    E: EntropySource,
    W: CeremonyWatcher,
{
    let span = tracing::debug_span!("ceremony", kind = %CeremonyKind::Backup, session = %session.session_id);
    async move {
        let blob = codec.encrypt_key(key).await?;
        let record = BackupRecord {
            backup_data: blob.0.clone(),
            pairing_id: session.session_id.clone(),
            created_at: now_millis(),
            expiry: u64::try_from(config.conversation_expiry.as_millis()).unwrap_or(u64::MAX),
            is_backed_up: None,
        };
        let doc_key = DocumentKey::new(CeremonyKind::Backup, session.session_id.clone());

        let mut updates = store.subscribe(&doc_key).await?;
        let document = serde_json::to_value(&record).map_err(Bug::SerializeDocument)?;
        store.write(&doc_key, document, true).await?;
        watcher.observe(CeremonyKind::Backup, Event::Sent { round: 1 });

        let deadline = record.deadline();
        let mut expiry_reported = false;
        loop {
            let next = match deadline.filter(|_| !expiry_reported) {
                Some(deadline) => tokio::time::timeout_at(deadline, updates.next()).await.ok(),
                None => Some(updates.next().await),
            };
            let Some(next) = next else {
                // Deadline passed while nothing arrived
                expiry_reported = true;
                expired(&record, config, &mut watcher)?;
                continue;
            };
            let document = next.ok_or_else(|| RelayError::Closed(doc_key.clone()))??;
            let observed = BackupRecord::decode(document)?;
            if observed.backup_data != record.backup_data {
                tracing::trace!("skip acknowledgement of another backup");
                continue;
            }

            if !expiry_reported && record.overdue(now_millis()).is_some() {
                expiry_reported = true;
                expired(&record, config, &mut watcher)?;
            }

            match observed.is_backed_up {
                Some(true) => {
                    watcher.observe(CeremonyKind::Backup, Event::Received { round: 2 });
                    tracing::info!(account_id = key.account_id, "distributed key backed up");
                    return Ok(blob);
                }
                Some(false) => return Err(Error::BackupFailed),
                None => continue,
            }
        }
    }
    .instrument(span)
    .await
}

fn expired<W: CeremonyWatcher>(
    record: &BackupRecord,
    config: &Config,
    watcher: &mut W,
) -> Result<(), Error> {
    let overdue = record.overdue(now_millis()).unwrap_or_default();
    watcher.observe(CeremonyKind::Backup, Event::Expired { overdue });
    match config.expiry_policy {
        ExpiryPolicy::Abort => Err(Error::Expired {
            kind: CeremonyKind::Backup,
            overdue,
        }),
        ExpiryPolicy::Warn => Ok(()),
    }
}
