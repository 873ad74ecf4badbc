//! # Two-party ceremonies over an untrusted relay
//!
//! A ceremony (distributed key generation, signing, key backup) is run jointly by two parties: the
//! web party, hosted by this crate, and the phone party, running on the paired counterparty device.
//! Parties never talk directly. Every message is sealed with a pairwise key and written into a shared
//! document of a last-writer-wins [conversation store](relay::ConversationStore); the counterparty
//! watches the document and overwrites it with its reply.
//!
//! ## How to run a ceremony
//! 1. Pair with the counterparty device: [`CeremonyClient::init_pairing`] produces a payload that's
//!    shown to the device out of band, then [`CeremonyClient::run_pairing`] exchanges it for a
//!    bearer token and the counterparty encryption key.
//! 2. Implement [`Party`] for the cryptographic protocol in use. The crate treats it as a black box
//!    that consumes one counterparty message and produces at most one reply.
//! 3. Call [`CeremonyClient::run_keygen`], [`CeremonyClient::run_sign`] or
//!    [`CeremonyClient::run_backup`].
//!
//! ```no_run
//! # use ceremony_relay::{CeremonyClient, Config, artifact::KeyShare, backup::SeededEntropy};
//! # use ceremony_relay::relay::ConversationStore;
//! # use ceremony_relay::pairing::TokenEndpoint;
//! # use ceremony_relay::party::Party;
//! # async fn keygen<S, T, P>(store: S, endpoint: T, party: P) -> Result<(), ceremony_relay::Error>
//! # where S: ConversationStore, T: TokenEndpoint, P: Party<Output = KeyShare> {
//! let client = CeremonyClient::new(Config::default(), store, endpoint, SeededEntropy::new(b"seed".to_vec()));
//! let payload = client.init_pairing().await;
//! // ... show `payload.to_json()` to the counterparty device
//! client.run_pairing().await?;
//! let key = client.run_keygen(party, 0).await?.distributed_key;
//! # let _ = key; Ok(())
//! # }
//! ```
//!
//! Ceremonies of the same kind are mutually exclusive: starting a second keygen while the first is
//! running fails with [`Error::Busy`]. Dropping a ceremony future cancels it and unsubscribes from
//! the relay.
//!
//! For development purposes, [`dev`] module provides an in-process counterparty simulator.

pub mod artifact;
pub mod backup;
pub mod ceremony;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod driver;
pub mod guard;
pub mod keys;
pub mod pairing;
pub mod party;
pub mod relay;

mod client;
mod error;

#[cfg(feature = "dev")]
#[cfg_attr(docsrs, doc(cfg(feature = "dev")))]
pub mod dev;

pub use client::CeremonyClient;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use client::InvalidRelayUrl;
pub use config::{Config, ExpiryPolicy};
pub use error::{AdapterError, BoxedError, Bug, Error, ErrorCode, ErrorReport};
pub use party::{Party, Step};
