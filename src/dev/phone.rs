use futures_util::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::channel::{DecryptError, SecureChannel};
use crate::conversation::{
    BackupRecord, CeremonyKind, Collection, DocumentKey, Envelope, FormatError, PairingSignal,
    PartyIndex,
};
use crate::error::BoxedError;
use crate::keys::{public_key_from_hex, EncryptionKeyPair, InvalidKey};
use crate::pairing::PairingPayload;
use crate::party::Party;
use crate::relay::{ConversationStore, MemoryRelay, RelayError};

/// Keys of a simulated counterparty device
#[derive(Clone)]
pub struct PhoneDevice {
    pub enc: EncryptionKeyPair,
    pub label: String,
}

impl PhoneDevice {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            enc: EncryptionKeyPair::generate(),
            label: label.into(),
        }
    }

    /// Channel to the web party that displayed `payload`
    pub fn channel(&self, payload: &PairingPayload) -> Result<SecureChannel, InvalidKey> {
        let web = public_key_from_hex(&payload.web_enc_public_key)?;
        Ok(SecureChannel::new(self.enc.secret(), &web))
    }
}

/// Plays the phone side of ceremonies on a [MemoryRelay]
///
/// ## Example
/// ```no_run
/// # use ceremony_relay::dev::PhoneSimulator;
/// # use ceremony_relay::conversation::CeremonyKind;
/// # use ceremony_relay::party::Party;
/// # async fn answer<P: Party>(phone: PhoneSimulator, session_id: String, party: P) {
/// let phone = phone.spawn(CeremonyKind::Keygen, session_id, party);
/// // ... run the web side
/// let output = phone.await.unwrap().unwrap();
/// # let _ = output;
/// # }
/// ```
#[derive(Clone)]
pub struct PhoneSimulator {
    relay: MemoryRelay,
    channel: SecureChannel,
    reject_at: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordHead {
    session_id: String,
    message: Envelope,
}

impl PhoneSimulator {
    pub fn new(relay: MemoryRelay, channel: SecureChannel) -> Self {
        Self {
            relay,
            channel,
            reject_at: None,
        }
    }

    /// Rejects the ceremony once the web message of given round arrives
    pub fn reject_at(self, round: u32) -> Self {
        Self {
            reject_at: Some(round),
            ..self
        }
    }

    /// Answers the ceremony on a separate task
    pub fn spawn<P: Party>(
        self,
        kind: CeremonyKind,
        document_id: impl Into<String>,
        party: P,
    ) -> JoinHandle<Result<Option<P::Output>, SimulationError>> {
        let key = DocumentKey::new(kind, document_id);
        tokio::spawn(self.answer(key, party))
    }

    /// Answers every web message stored at `key` until `party` finishes
    ///
    /// Follows the first ceremony session it observes. Returns `None` if the ceremony was rejected.
    pub async fn answer<P: Party>(
        self,
        key: DocumentKey,
        mut party: P,
    ) -> Result<Option<P::Output>, SimulationError> {
        let mut updates = self.relay.subscribe(&key).await?;
        let mut session = None;
        let mut handled = 0;

        while let Some(document) = updates.next().await {
            let mut document = document?;
            let head: RecordHead =
                serde_json::from_value(document.clone()).map_err(FormatError::Json)?;
            head.message.validate()?;
            if head.message.party != PartyIndex::Web || head.message.round <= handled {
                continue;
            }
            let followed = session.get_or_insert_with(|| head.session_id.clone());
            if *followed != head.session_id {
                continue;
            }
            let round = head.message.round;
            handled = round;

            let reply_party = PartyIndex::Web.counterparty();
            if self.reject_at == Some(round) {
                tracing::debug!(%key, round, "phone rejects the ceremony");
                let envelope = Envelope::empty(reply_party, round + 1);
                self.reply(&key, &mut document, false, envelope).await?;
                return Ok(None);
            }
            let Some((nonce, ciphertext)) = head.message.payload()? else {
                continue;
            };
            let msg = self.channel.open(&nonce, &ciphertext)?;
            let step = party
                .advance(Some(msg))
                .map_err(|err| SimulationError::Party(Box::new(err)))?;

            match (step.outgoing, step.output) {
                (outgoing, Some(output)) => {
                    if let Some(msg) = outgoing {
                        let sealed = self.channel.seal(&msg);
                        let envelope = Envelope::sealed(reply_party, round + 1, &sealed);
                        self.reply(&key, &mut document, true, envelope).await?;
                    }
                    return Ok(Some(output));
                }
                (Some(msg), None) => {
                    let sealed = self.channel.seal(&msg);
                    let envelope = Envelope::sealed(reply_party, round + 1, &sealed);
                    self.reply(&key, &mut document, true, envelope).await?;
                }
                (None, None) => return Err(SimulationError::Stalled),
            }
        }
        Err(RelayError::Closed(key).into())
    }

    /// Waits for the backup stored at pairing `session_id` and acknowledges or refuses it
    ///
    /// Returns the backup blob.
    pub async fn answer_backup(
        self,
        session_id: String,
        acknowledge: bool,
    ) -> Result<String, SimulationError> {
        let key = DocumentKey::new(CeremonyKind::Backup, session_id);
        let mut updates = self.relay.subscribe(&key).await?;
        while let Some(document) = updates.next().await {
            let mut record = BackupRecord::decode(document?)?;
            if record.is_backed_up.is_some() {
                continue;
            }
            record.is_backed_up = Some(acknowledge);
            let document = serde_json::to_value(&record).map_err(FormatError::Json)?;
            self.relay.write(&key, document, false).await?;
            return Ok(record.backup_data);
        }
        Err(RelayError::Closed(key).into())
    }

    /// Latest pairing signal written by the web party for `session_id`
    pub fn pairing_signal(
        &self,
        session_id: &str,
    ) -> Result<Option<PairingSignal>, SimulationError> {
        let key = DocumentKey::new(Collection::Pairing, session_id);
        match self.relay.get(&key) {
            Some(document) => Ok(Some(
                serde_json::from_value(document).map_err(FormatError::Json)?,
            )),
            None => Ok(None),
        }
    }

    async fn reply(
        &self,
        key: &DocumentKey,
        document: &mut serde_json::Value,
        approved: bool,
        envelope: Envelope,
    ) -> Result<(), SimulationError> {
        let serde_json::Value::Object(fields) = document else {
            return Err(SimulationError::NotAnObject);
        };
        fields.insert("isApproved".into(), approved.into());
        fields.insert(
            "message".into(),
            serde_json::to_value(&envelope).map_err(FormatError::Json)?,
        );
        self.relay.write(key, document.clone(), true).await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("relay")]
    Relay(
        #[source]
        #[from]
        RelayError,
    ),
    #[error("web party wrote malformed document")]
    Format(
        #[source]
        #[from]
        FormatError,
    ),
    #[error("document is not a json object")]
    NotAnObject,
    #[error("decrypt web message")]
    Decrypt(
        #[source]
        #[from]
        DecryptError,
    ),
    #[error("phone party failed")]
    Party(#[source] BoxedError),
    #[error("phone party produced neither a message nor an output")]
    Stalled,
}
