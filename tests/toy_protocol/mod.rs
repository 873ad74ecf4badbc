//! Toy two-party protocols used to exercise ceremonies end to end
//!
//! Keygen is a commit-reveal of random seeds: web commits to its seed, phone answers with its own
//! seed, web reveals. Both sides derive the joint public key as `sha256(web_seed || phone_seed)`.

#![allow(dead_code)]

use rand::RngCore;
use serde_json::json;
use sha2::{Digest, Sha256};

use ceremony_relay::artifact::{KeyShare, Signature};
use ceremony_relay::party::{Party, Step};

#[derive(Debug, thiserror::Error)]
pub enum ToyError {
    #[error("unexpected message at this stage")]
    UnexpectedMessage,
    #[error("message has wrong length")]
    WrongLength,
    #[error("revealed seed doesn't match the commitment")]
    CommitmentMismatch,
    #[error("party is told to fail")]
    Sabotage,
}

fn commitment(seed: &[u8; 32], blinding: &[u8; 32]) -> [u8; 32] {
    Sha256::new()
        .chain_update(seed)
        .chain_update(blinding)
        .finalize()
        .into()
}

fn joint_key(web_seed: &[u8], phone_seed: &[u8]) -> String {
    hex::encode(Sha256::new().chain_update(web_seed).chain_update(phone_seed).finalize())
}

fn random_32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn to_32(msg: &[u8]) -> Result<[u8; 32], ToyError> {
    <[u8; 32]>::try_from(msg).map_err(|_| ToyError::WrongLength)
}

pub enum WebKeygen {
    Commit { seed: [u8; 32], blinding: [u8; 32] },
    Reveal { seed: [u8; 32], blinding: [u8; 32] },
    Done,
}

impl WebKeygen {
    pub fn new() -> Self {
        WebKeygen::Commit {
            seed: random_32(),
            blinding: random_32(),
        }
    }
}

impl Party for WebKeygen {
    type Output = KeyShare;
    type Err = ToyError;

    fn advance(&mut self, incoming: Option<Vec<u8>>) -> Result<Step<KeyShare>, ToyError> {
        match (std::mem::replace(self, WebKeygen::Done), incoming) {
            (WebKeygen::Commit { seed, blinding }, None) => {
                *self = WebKeygen::Reveal { seed, blinding };
                Ok(Step::send(commitment(&seed, &blinding).to_vec()))
            }
            (WebKeygen::Reveal { seed, blinding }, Some(phone_seed)) => {
                let phone_seed = to_32(&phone_seed)?;
                let share = KeyShare {
                    public_key: joint_key(&seed, &phone_seed),
                    data: json!({ "seed": hex::encode(seed) }),
                };
                let reveal = [seed, blinding].concat();
                Ok(Step::finish_with(reveal, share))
            }
            _ => Err(ToyError::UnexpectedMessage),
        }
    }
}

pub enum PhoneKeygen {
    AwaitCommitment,
    AwaitReveal {
        commitment: [u8; 32],
        seed: [u8; 32],
    },
    Done,
}

impl PhoneKeygen {
    pub fn new() -> Self {
        PhoneKeygen::AwaitCommitment
    }
}

impl Party for PhoneKeygen {
    type Output = KeyShare;
    type Err = ToyError;

    fn advance(&mut self, incoming: Option<Vec<u8>>) -> Result<Step<KeyShare>, ToyError> {
        let incoming = incoming.ok_or(ToyError::UnexpectedMessage)?;
        match std::mem::replace(self, PhoneKeygen::Done) {
            PhoneKeygen::AwaitCommitment => {
                let seed = random_32();
                *self = PhoneKeygen::AwaitReveal {
                    commitment: to_32(&incoming)?,
                    seed,
                };
                Ok(Step::send(seed.to_vec()))
            }
            PhoneKeygen::AwaitReveal {
                commitment: expected,
                seed,
            } => {
                if incoming.len() != 64 {
                    return Err(ToyError::WrongLength);
                }
                let (web_seed, blinding) = incoming.split_at(32);
                if commitment(&to_32(web_seed)?, &to_32(blinding)?) != expected {
                    return Err(ToyError::CommitmentMismatch);
                }
                Ok(Step::finish(KeyShare {
                    public_key: joint_key(web_seed, &seed),
                    data: json!({ "seed": hex::encode(seed) }),
                }))
            }
            PhoneKeygen::Done => Err(ToyError::UnexpectedMessage),
        }
    }
}

/// Signature is `sha256(web_partial || phone_partial)` where partials are `sha256(share || hash)`
pub struct WebSign {
    share: Vec<u8>,
    message_hash: [u8; 32],
    sent: bool,
}

impl WebSign {
    pub fn new(share: &[u8], message_hash: [u8; 32]) -> Self {
        Self {
            share: share.to_vec(),
            message_hash,
            sent: false,
        }
    }
}

pub fn partial_signature(share: &[u8], message_hash: &[u8]) -> Vec<u8> {
    Sha256::new()
        .chain_update(share)
        .chain_update(message_hash)
        .finalize()
        .to_vec()
}

pub fn joint_signature(web_partial: &[u8], phone_partial: &[u8]) -> String {
    hex::encode(
        Sha256::new()
            .chain_update(web_partial)
            .chain_update(phone_partial)
            .finalize(),
    )
}

impl Party for WebSign {
    type Output = Signature;
    type Err = ToyError;

    fn advance(&mut self, incoming: Option<Vec<u8>>) -> Result<Step<Signature>, ToyError> {
        match (self.sent, incoming) {
            (false, None) => {
                self.sent = true;
                Ok(Step::send(self.message_hash.to_vec()))
            }
            (true, Some(phone_partial)) => {
                let web_partial = partial_signature(&self.share, &self.message_hash);
                Ok(Step::finish(Signature {
                    signature: joint_signature(&web_partial, &phone_partial),
                    recovery_id: 0,
                }))
            }
            _ => Err(ToyError::UnexpectedMessage),
        }
    }
}

/// Answers with its partial signature and finishes
pub struct PhoneSign {
    share: Vec<u8>,
}

impl PhoneSign {
    pub fn new(share: &[u8]) -> Self {
        Self {
            share: share.to_vec(),
        }
    }
}

impl Party for PhoneSign {
    type Output = Vec<u8>;
    type Err = ToyError;

    fn advance(&mut self, incoming: Option<Vec<u8>>) -> Result<Step<Vec<u8>>, ToyError> {
        let message_hash = incoming.ok_or(ToyError::UnexpectedMessage)?;
        let partial = partial_signature(&self.share, &message_hash);
        Ok(Step::finish_with(partial, message_hash))
    }
}

/// Misbehaving web party
pub enum Faulty {
    /// Fails at the given advance call (counting from 1)
    FailAt(u32),
    /// Produces neither a message nor an output
    Stall,
    Panic,
}

pub struct FaultyParty {
    fault: Faulty,
    calls: u32,
}

impl FaultyParty {
    pub fn new(fault: Faulty) -> Self {
        Self { fault, calls: 0 }
    }
}

impl Party for FaultyParty {
    type Output = KeyShare;
    type Err = ToyError;

    fn advance(&mut self, _incoming: Option<Vec<u8>>) -> Result<Step<KeyShare>, ToyError> {
        self.calls += 1;
        match self.fault {
            Faulty::FailAt(call) if call == self.calls => Err(ToyError::Sabotage),
            Faulty::FailAt(_) => Ok(Step::send(vec![0; 32])),
            Faulty::Stall => Ok(Step {
                outgoing: None,
                output: None,
            }),
            Faulty::Panic => panic!("party panicked"),
        }
    }
}
