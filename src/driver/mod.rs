//! Executes two-party ceremonies over the relay

use std::time::Duration;

use futures_util::StreamExt;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::Instrument;

use crate::channel::SecureChannel;
use crate::config::ExpiryPolicy;
use crate::conversation::{
    now_millis, ApprovalState, CeremonyDetails, ConversationRecord, DocumentKey, Envelope,
    PartyIndex,
};
use crate::error::{AdapterError, Bug, Error};
use crate::party::{Party, Step};
use crate::relay::{ConversationStore, RelayError, Subscription};

pub mod watcher;
use watcher::{BlindWatcher, CeremonyWatcher, Event};

/// Drives the web side of a ceremony
///
/// The driver owns the conversation record and alternates between advancing the local [Party] and
/// waiting for the counterparty reply on the relay:
///
/// ```text
/// advance(None) ─▶ write round 1 ─▶ await round 2 ─▶ advance(msg) ─▶ write round 3 ─▶ …
/// ```
///
/// It stops as soon as the party produces its output. If the output comes together with a final
/// message, that message is written without waiting for a reply. Every observed record is checked
/// for rejection and expiry; envelopes of unexpected rounds are ignored.
///
/// Note that the driver doesn't prevent running two ceremonies of the same kind in parallel, it's up
/// to the caller to hold a [SessionGuard](crate::guard::SessionGuard).
pub struct RoundDriver<P, D, S, W = BlindWatcher> {
    party: Option<P>,
    store: S,
    channel: SecureChannel,
    key: DocumentKey,
    record: ConversationRecord<D>,
    expiry_policy: ExpiryPolicy,
    expiry_reported: bool,
    watcher: W,
}

impl<P, D, S> RoundDriver<P, D, S, BlindWatcher>
where
    D: CeremonyDetails,
{
    /// Constructs a driver of a new ceremony
    ///
    /// The conversation is stored in the `D::KIND` collection under `document_id`; the record gets a
    /// fresh random session id and `expiry` validity window.
    pub fn new(
        party: P,
        store: S,
        channel: SecureChannel,
        document_id: impl Into<String>,
        details: D,
        expiry: Duration,
    ) -> Self {
        let mut session_id = [0u8; 32];
        OsRng.fill_bytes(&mut session_id);
        Self {
            party: Some(party),
            store,
            channel,
            key: DocumentKey::new(D::KIND, document_id),
            record: ConversationRecord::new(hex::encode(session_id), expiry, details),
            expiry_policy: ExpiryPolicy::Warn,
            expiry_reported: false,
            watcher: BlindWatcher,
        }
    }
}

impl<P, D, S, W> RoundDriver<P, D, S, W> {
    /// Sets new ceremony watcher
    ///
    /// Default watcher: [BlindWatcher] that does nothing with observed events.
    pub fn set_watcher<WR>(self, watcher: WR) -> RoundDriver<P, D, S, WR> {
        RoundDriver {
            party: self.party,
            store: self.store,
            channel: self.channel,
            key: self.key,
            record: self.record,
            expiry_policy: self.expiry_policy,
            expiry_reported: self.expiry_reported,
            watcher,
        }
    }

    pub fn set_expiry_policy(self, expiry_policy: ExpiryPolicy) -> Self {
        Self {
            expiry_policy,
            ..self
        }
    }

    pub fn session_id(&self) -> &str {
        &self.record.session_id
    }
}

impl<P, D, S, W> RoundDriver<P, D, S, W>
where
    P: Party,
    D: CeremonyDetails,
    S: ConversationStore,
    W: CeremonyWatcher,
{
    /// Executes the ceremony
    ///
    /// Returns the party output, or the first error. Driver can be run only once.
    pub async fn run(&mut self) -> Result<P::Output, Error> {
        let party = self.party.take().ok_or(Bug::Exhausted)?;
        let span = tracing::debug_span!(
            "ceremony",
            kind = %D::KIND,
            session = %self.record.session_id,
        );
        self.run_party(party).instrument(span).await
    }

    async fn run_party(&mut self, mut party: P) -> Result<P::Output, Error> {
        // Subscribe before the first write, so the reply can't slip through
        let mut updates = self.store.subscribe(&self.key).await?;

        let mut incoming = None;
        let mut round = 1;
        loop {
            let (step, p) = Self::advance(party, incoming.take(), round).await?;
            party = p;

            match (step.outgoing, step.output) {
                (outgoing, Some(output)) => {
                    if let Some(msg) = outgoing {
                        self.send(round, &msg, false).await?;
                    }
                    tracing::debug!(round, "ceremony completed");
                    return Ok(output);
                }
                (Some(msg), None) => self.send(round, &msg, true).await?,
                (None, None) => {
                    return Err(Error::Adapter {
                        round,
                        reason: AdapterError::Stalled,
                    })
                }
            }

            incoming = Some(self.await_reply(&mut updates, round + 1).await?);
            round += 2;
        }
    }

    async fn advance(
        mut party: P,
        incoming: Option<Vec<u8>>,
        round: u32,
    ) -> Result<(Step<P::Output>, P), Error> {
        let (result, party) = tokio::task::spawn_blocking(move || (party.advance(incoming), party))
            .await
            .map_err(|err| Error::Adapter {
                round,
                reason: AdapterError::Panicked(err),
            })?;
        let step = result.map_err(|err| Error::Adapter {
            round,
            reason: AdapterError::Party(Box::new(err)),
        })?;
        Ok((step, party))
    }

    async fn send(&mut self, round: u32, msg: &[u8], expect_reply: bool) -> Result<(), Error> {
        let sealed = self.channel.seal(msg);
        self.record.message = Envelope::sealed(PartyIndex::Web, round, &sealed);
        let document = self.record.encode().map_err(Bug::SerializeDocument)?;

        tracing::trace!(round, expect_reply, "write envelope");
        self.store.write(&self.key, document, expect_reply).await?;
        self.watcher.observe(D::KIND, Event::Sent { round });
        Ok(())
    }

    /// Waits for the counterparty envelope of `expected` round
    ///
    /// Wakes up at the record expiry even if nothing arrives. Expiry is reported once.
    async fn await_reply(
        &mut self,
        updates: &mut Subscription,
        expected: u32,
    ) -> Result<Vec<u8>, Error> {
        let deadline = self.record.deadline();
        loop {
            let next = match deadline.filter(|_| !self.expiry_reported) {
                Some(deadline) => match tokio::time::timeout_at(deadline, updates.next()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        let overdue = self.record.overdue(now_millis()).unwrap_or_default();
                        self.expired(overdue)?;
                        continue;
                    }
                },
                None => updates.next().await,
            };
            let document = next.ok_or_else(|| RelayError::Closed(self.key.clone()))??;
            let record = ConversationRecord::<D>::decode(document)?;

            if record.session_id != self.record.session_id {
                tracing::trace!(session = %record.session_id, "skip document of another session");
                continue;
            }

            // Own record is the only trusted source of creation time
            if !self.expiry_reported {
                if let Some(overdue) = self.record.overdue(now_millis()) {
                    self.expired(overdue)?;
                }
            }

            self.record.is_approved = record.is_approved;
            if record.is_approved == ApprovalState::Rejected {
                tracing::debug!(round = record.message.round, "counterparty rejected");
                return Err(Error::CounterpartyRejected(D::KIND));
            }

            let envelope = record.message;
            if envelope.party == PartyIndex::Web {
                // Own write echoed back by the relay
                continue;
            }
            let Some((nonce, ciphertext)) = envelope.payload()? else {
                continue;
            };
            if envelope.round != expected {
                self.watcher.observe(
                    D::KIND,
                    Event::StaleEnvelope {
                        from: envelope.party,
                        round: envelope.round,
                        expected,
                    },
                );
                continue;
            }

            let msg = self.channel.open(&nonce, &ciphertext)?;
            self.watcher
                .observe(D::KIND, Event::Received { round: expected });
            return Ok(msg);
        }
    }

    fn expired(&mut self, overdue: Duration) -> Result<(), Error> {
        self.expiry_reported = true;
        self.watcher.observe(D::KIND, Event::Expired { overdue });
        match self.expiry_policy {
            ExpiryPolicy::Abort => Err(Error::Expired {
                kind: D::KIND,
                overdue,
            }),
            ExpiryPolicy::Warn => Ok(()),
        }
    }
}
