use std::sync::Arc;
use std::time::Duration;

use matches::assert_matches;

use ceremony_relay::artifact::{DistributedKey, KeyShare};
use ceremony_relay::backup::{BackupCodec, SeededEntropy};
use ceremony_relay::conversation::{PairingRemark, PairingSignal};
use ceremony_relay::dev::{LocalTokenEndpoint, PhoneDevice, PhoneSimulator};
use ceremony_relay::pairing::{PairingPayload, PairingStatus, Reconciliation, StoredPairing};
use ceremony_relay::relay::{MemoryRelay, RelayError};
use ceremony_relay::{CeremonyClient, Config, Error, ErrorCode};

const ENTROPY: &[u8] = b"web device entropy";

type Client = CeremonyClient<MemoryRelay, Arc<LocalTokenEndpoint>, SeededEntropy>;

struct Setup {
    relay: MemoryRelay,
    endpoint: Arc<LocalTokenEndpoint>,
    client: Client,
}

fn setup(token_lifetime: Duration) -> Setup {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let relay = MemoryRelay::new();
    let endpoint = Arc::new(LocalTokenEndpoint::new(token_lifetime));
    let client = CeremonyClient::new(
        Config::default(),
        relay.clone(),
        endpoint.clone(),
        SeededEntropy::new(ENTROPY.to_vec()),
    );
    Setup {
        relay,
        endpoint,
        client,
    }
}

fn key(public_key: &str) -> DistributedKey {
    DistributedKey::new(
        0,
        KeyShare {
            public_key: public_key.into(),
            data: serde_json::json!({ "share": public_key }),
        },
    )
}

async fn backup_of(key: &DistributedKey) -> String {
    let codec = BackupCodec::new(SeededEntropy::new(ENTROPY.to_vec()));
    codec.encrypt_key(key).await.unwrap().0
}

impl Setup {
    /// Phone scans a fresh pairing payload
    async fn scan(&self, label: &str, backup: Option<String>) -> PairingPayload {
        let payload = self.client.init_pairing().await;
        self.endpoint
            .register(&payload, &PhoneDevice::new(label), backup)
            .unwrap();
        payload
    }

    fn signal(&self, payload: &PairingPayload) -> Option<PairingSignal> {
        let device = PhoneDevice::new("observer");
        PhoneSimulator::new(self.relay.clone(), device.channel(payload).unwrap())
            .pairing_signal(&payload.session_id)
            .unwrap()
    }
}

#[tokio::test]
async fn fresh_pairing() {
    let s = setup(Duration::from_secs(3600));
    assert_eq!(s.client.pairing_status().await, PairingStatus::Uninitialized);

    let payload = s.scan("Pixel", None).await;
    assert_eq!(payload.session_id.len(), 19);
    assert_eq!(s.client.pairing_status().await, PairingStatus::Initialized);

    let outcome = s.client.run_pairing().await.unwrap();
    assert_eq!(outcome.device_label, "Pixel");
    assert_eq!(outcome.reconciliation, Reconciliation::Fresh);
    assert!(outcome.recovered.is_none());
    assert_eq!(
        s.client.pairing_status().await,
        PairingStatus::Paired {
            device_label: "Pixel".into()
        }
    );
    assert_eq!(
        s.signal(&payload),
        Some(PairingSignal {
            is_paired: true,
            pairing_remark: None
        })
    );

    let session = s.client.pairing().active_session().await.unwrap();
    assert_eq!(session.session_id, payload.session_id);
}

#[tokio::test]
async fn payload_is_shown_as_json() {
    let s = setup(Duration::from_secs(3600));
    let payload = s.client.init_pairing().await;
    let json: serde_json::Value = serde_json::from_str(&payload.to_json()).unwrap();
    assert_eq!(json["sessionId"], payload.session_id);
    assert_eq!(json["webEncPublicKey"], payload.web_enc_public_key);
    assert_eq!(json["signPublicKey"], payload.sign_public_key);
}

#[tokio::test]
async fn pairing_must_be_initialized() {
    let s = setup(Duration::from_secs(3600));
    let err = s.client.run_pairing().await.unwrap_err();
    assert_matches!(err, Error::PairingNotInitialized);
    assert_eq!(err.code(), ErrorCode::PairingNotInitialized);
}

#[tokio::test]
async fn unregistered_session_is_unauthorized() {
    let s = setup(Duration::from_secs(3600));
    let _payload = s.client.init_pairing().await;
    let err = s.client.run_pairing().await.unwrap_err();
    assert_matches!(err, Error::Relay(RelayError::Unauthorized));
    assert_eq!(err.code(), ErrorCode::Relay);
}

#[tokio::test]
async fn invalid_backup_is_signalled_to_counterparty() {
    let s = setup(Duration::from_secs(3600));
    let payload = s.scan("Pixel", Some("not.a.backup".into())).await;

    let err = s.client.run_pairing().await.unwrap_err();
    assert_matches!(err, Error::InvalidBackupData(_));
    assert_eq!(err.code(), ErrorCode::InvalidBackupData);
    assert_eq!(
        s.signal(&payload),
        Some(PairingSignal {
            is_paired: false,
            pairing_remark: Some(PairingRemark::InvalidBackupData)
        })
    );
    assert_eq!(s.client.pairing_status().await, PairingStatus::Initialized);
}

#[tokio::test]
async fn fresh_pairing_recovers_backed_up_key() {
    let s = setup(Duration::from_secs(3600));
    let backed_up = key("02aa");
    s.scan("Pixel", Some(backup_of(&backed_up).await)).await;

    let outcome = s.client.run_pairing().await.unwrap();
    assert_eq!(outcome.reconciliation, Reconciliation::Fresh);
    assert_eq!(outcome.recovered, Some(backed_up));
}

#[tokio::test]
async fn re_pairing_with_matching_backup_is_activated() {
    let s = setup(Duration::from_secs(3600));
    s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let current = key("02aa");
    let payload = s.scan("Pixel 2", Some(backup_of(&current).await)).await;
    let outcome = s.client.run_re_pairing(&current).await.unwrap();

    assert_eq!(outcome.reconciliation, Reconciliation::Matched);
    assert_eq!(outcome.recovered, Some(current));
    let stored = s.client.pairing().stored().await.unwrap();
    assert_eq!(stored.pairing_id, payload.session_id);
    assert_eq!(stored.device_name, "Pixel 2");
}

#[tokio::test]
async fn re_pairing_with_another_key_is_held_until_confirmed() {
    let s = setup(Duration::from_secs(3600));
    let first = s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let current = key("02aa");
    let other = key("03bb");
    let second = s.scan("Pixel 2", Some(backup_of(&other).await)).await;
    let outcome = s.client.run_re_pairing(&current).await.unwrap();

    assert_eq!(
        outcome.reconciliation,
        Reconciliation::Mismatch {
            expected: "02aa".into(),
            found: "03bb".into()
        }
    );
    assert!(outcome.reconciliation.is_pending());
    assert!(outcome.recovered.is_none());
    assert_eq!(
        s.signal(&second),
        Some(PairingSignal {
            is_paired: true,
            pairing_remark: Some(PairingRemark::WalletMismatch)
        })
    );

    // Previous pairing stays active
    let active = s.client.pairing().active_session().await.unwrap();
    assert_eq!(active.session_id, first.session_id);

    let recovered = s.client.pairing().confirm_pending().await.unwrap();
    assert_eq!(recovered, Some(other));
    let active = s.client.pairing().active_session().await.unwrap();
    assert_eq!(active.session_id, second.session_id);
}

#[tokio::test]
async fn re_pairing_without_backup_can_be_discarded() {
    let s = setup(Duration::from_secs(3600));
    let first = s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let second = s.scan("Pixel 2", None).await;
    let outcome = s.client.run_re_pairing(&key("02aa")).await.unwrap();
    assert_eq!(
        outcome.reconciliation,
        Reconciliation::NoBackup {
            expected: "02aa".into()
        }
    );
    assert_eq!(
        s.signal(&second),
        Some(PairingSignal {
            is_paired: false,
            pairing_remark: Some(PairingRemark::NoBackupDataWhileRepairing)
        })
    );

    assert!(s.client.pairing().discard_pending().await);
    let active = s.client.pairing().active_session().await.unwrap();
    assert_eq!(active.session_id, first.session_id);

    let err = s.client.pairing().confirm_pending().await.unwrap_err();
    assert_matches!(err, Error::NoPendingPairing);
    assert_eq!(err.code(), ErrorCode::NoPendingPairing);
}

#[tokio::test]
async fn expiring_token_is_refreshed_once_for_concurrent_callers() {
    let s = setup(Duration::ZERO);
    s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(
        s.client.pairing_status().await,
        PairingStatus::TokenExpired {
            device_label: "Pixel".into()
        }
    );

    s.endpoint.set_token_lifetime(Duration::from_secs(3600));
    let pairing = s.client.pairing();
    let (a, b, c) = tokio::join!(
        pairing.active_session(),
        pairing.active_session(),
        pairing.active_session(),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.token, b.token);
    assert_eq!(b.token, c.token);
    assert_eq!(s.endpoint.refreshes(), 1);
    assert_matches!(s.client.pairing_status().await, PairingStatus::Paired { .. });
}

#[tokio::test]
async fn explicit_refresh_replaces_token() {
    let s = setup(Duration::from_secs(3600));
    s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let before = s.client.pairing().active_session().await.unwrap().token;
    s.client.pairing().refresh().await.unwrap();
    let after = s.client.pairing().active_session().await.unwrap().token;
    assert_ne!(before, after);
    assert_eq!(s.endpoint.refreshes(), 1);
}

#[tokio::test]
async fn stored_pairing_is_restored_by_another_client() {
    let s = setup(Duration::from_secs(3600));
    let payload = s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let stored = s.client.pairing().stored().await.unwrap();
    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(json["pairingId"], payload.session_id);
    assert_eq!(json["webEncPublicKey"], payload.web_enc_public_key);
    assert_eq!(json["deviceName"], "Pixel");

    let restored = CeremonyClient::new(
        Config::default(),
        s.relay.clone(),
        s.endpoint.clone(),
        SeededEntropy::new(ENTROPY.to_vec()),
    );
    let stored: StoredPairing = serde_json::from_value(json).unwrap();
    restored.restore_pairing(stored).await.unwrap();
    let session = restored.pairing().active_session().await.unwrap();
    assert_eq!(session.session_id, payload.session_id);
}

#[tokio::test]
async fn tampered_stored_pairing_is_rejected() {
    let s = setup(Duration::from_secs(3600));
    s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    let mut stored = s.client.pairing().stored().await.unwrap();
    stored.web_enc_public_key = "00".repeat(32);
    let err = s.client.restore_pairing(stored).await.unwrap_err();
    assert_matches!(err, Error::InvalidStoredPairing(_));
    assert_eq!(err.code(), ErrorCode::InvalidStoredPairing);
}

#[tokio::test]
async fn unpair_forgets_everything() {
    let s = setup(Duration::from_secs(3600));
    s.scan("Pixel", None).await;
    s.client.run_pairing().await.unwrap();

    s.client.unpair().await;
    assert_eq!(s.client.pairing_status().await, PairingStatus::Uninitialized);
    assert_matches!(
        s.client.pairing().active_session().await,
        Err(Error::PairingNotInitialized)
    );
}
