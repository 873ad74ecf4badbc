use std::sync::Arc;

use crate::artifact::{BackupBlob, DistributedKey, KeyShare, Signature};
use crate::backup::{BackupCodec, EntropySource};
use crate::ceremony::{self, KeygenResult, SignRequest, SignResult, ValidatedSign};
use crate::config::Config;
use crate::conversation::{CeremonyKind, Collection, DocumentKey, VersionReport};
use crate::driver::watcher::TracingWatcher;
use crate::error::{Bug, Error};
use crate::guard::SessionRegistry;
use crate::pairing::{
    PairingManager, PairingOutcome, PairingPayload, PairingStatus, StoredPairing, TokenEndpoint,
};
use crate::party::Party;
use crate::relay::ConversationStore;

/// Web-side entry point: pairing and every ceremony
///
/// Ceremonies of different kinds may run concurrently, but starting a ceremony while another one of
/// the same kind is running fails with [`Error::Busy`]. Bearer token is refreshed before every
/// ceremony if it's about to expire.
pub struct CeremonyClient<S, T, E> {
    config: Config,
    store: Arc<S>,
    pairing: PairingManager<Arc<S>, T, E>,
    codec: Arc<BackupCodec<E>>,
    sessions: SessionRegistry,
}

impl<S, T, E> CeremonyClient<S, T, E>
where
    S: ConversationStore,
    T: TokenEndpoint,
    E: EntropySource,
{
    pub fn new(config: Config, store: S, endpoint: T, entropy: E) -> Self {
        let store = Arc::new(store);
        let codec = Arc::new(BackupCodec::new(entropy));
        let pairing = PairingManager::new(
            store.clone(),
            endpoint,
            codec.clone(),
            config.token_refresh_margin,
        );
        Self {
            config,
            store,
            pairing,
            codec,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pairing(&self) -> &PairingManager<Arc<S>, T, E> {
        &self.pairing
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn init_pairing(&self) -> PairingPayload {
        self.pairing.init().await
    }

    pub async fn run_pairing(&self) -> Result<PairingOutcome, Error> {
        self.pairing.pair(None).await
    }

    /// Pairs again while `current` key is in use
    ///
    /// If the counterparty backup doesn't resolve to `current`, the new pairing is held pending,
    /// see [`PairingManager::confirm_pending`].
    pub async fn run_re_pairing(&self, current: &DistributedKey) -> Result<PairingOutcome, Error> {
        self.pairing.pair(Some(current.identity())).await
    }

    pub async fn pairing_status(&self) -> PairingStatus {
        self.pairing.status().await
    }

    pub async fn restore_pairing(&self, stored: StoredPairing) -> Result<(), Error> {
        self.pairing.restore(stored).await
    }

    pub async fn unpair(&self) {
        self.pairing.unpair().await
    }

    pub async fn run_keygen<P>(&self, party: P, account_id: u32) -> Result<KeygenResult, Error>
    where
        P: Party<Output = KeyShare>,
    {
        let _guard = self.sessions.try_acquire(CeremonyKind::Keygen)?;
        let session = self.pairing.active_session().await?;
        ceremony::run_keygen(
            party,
            self.store.clone(),
            &session,
            account_id,
            &self.config,
            TracingWatcher,
        )
        .await
    }

    /// Signs the request
    ///
    /// The party is constructed by `party` only after the request passed validation.
    pub async fn run_sign<P, F>(&self, request: SignRequest, party: F) -> Result<SignResult, Error>
    where
        P: Party<Output = Signature>,
        F: FnOnce(&ValidatedSign) -> P,
    {
        let request = request.validate()?;
        let _guard = self.sessions.try_acquire(CeremonyKind::Sign)?;
        let session = self.pairing.active_session().await?;
        let party = party(&request);
        ceremony::run_sign(
            party,
            self.store.clone(),
            &session,
            request,
            &self.config,
            TracingWatcher,
        )
        .await
    }

    pub async fn run_backup(&self, key: &DistributedKey) -> Result<BackupBlob, Error> {
        let _guard = self.sessions.try_acquire(CeremonyKind::Backup)?;
        let session = self.pairing.active_session().await?;
        ceremony::run_backup(
            key,
            &self.codec,
            self.store.clone(),
            &session,
            &self.config,
            TracingWatcher,
        )
        .await
    }

    /// Tells the counterparty which client version is in use
    pub async fn report_version(&self, version: &str) -> Result<(), Error> {
        let session = self.pairing.active_session().await?;
        let report = VersionReport {
            client_version: version.to_owned(),
        };
        let document = serde_json::to_value(&report).map_err(Bug::SerializeDocument)?;
        self.store
            .write(
                &DocumentKey::new(Collection::Users, session.session_id),
                document,
                false,
            )
            .await?;
        Ok(())
    }
}

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
impl<E: EntropySource> CeremonyClient<crate::relay::HttpRelay, crate::pairing::HttpTokenEndpoint, E> {
    /// Constructs a client talking to the relay at `config.relay_url`
    pub fn over_http(config: Config, entropy: E) -> Result<Self, InvalidRelayUrl> {
        let url = config
            .relay_url
            .as_deref()
            .ok_or(InvalidRelayUrl::Missing)?;
        let base_url = url::Url::parse(url).map_err(InvalidRelayUrl::Parse)?;
        let http_client = reqwest::Client::new();
        let relay = crate::relay::HttpRelay::new(http_client.clone(), base_url.clone());
        let endpoint = crate::pairing::HttpTokenEndpoint::new(http_client, base_url);
        Ok(Self::new(config, relay, endpoint, entropy))
    }
}

#[cfg(feature = "http")]
#[derive(Debug, thiserror::Error)]
pub enum InvalidRelayUrl {
    #[error("relay url is not configured")]
    Missing,
    #[error("relay url is invalid")]
    Parse(#[source] url::ParseError),
}
