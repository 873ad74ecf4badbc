//! Long-lived key pairs established at pairing time

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// X25519 key pair used to seal ceremony messages
#[derive(Clone)]
pub struct EncryptionKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EncryptionKeyPair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, InvalidKey> {
        let bytes = decode_hex_32(secret, "x25519 secret key")?;
        Ok(Self::from_secret(StaticSecret::from(bytes)))
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }
}

/// Ed25519 key pair proving ownership of a pairing to the token endpoint
#[derive(Clone)]
pub struct SigningKeyPair {
    key: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, InvalidKey> {
        let bytes = decode_hex_32(secret, "ed25519 secret key")?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    /// Detached signature over `message`, hex encoded
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.key.sign(message).to_bytes())
    }
}

/// Parses hex-encoded X25519 public key
pub fn public_key_from_hex(public: &str) -> Result<PublicKey, InvalidKey> {
    decode_hex_32(public, "x25519 public key").map(PublicKey::from)
}

/// Parses hex-encoded Ed25519 public key
pub fn verifying_key_from_hex(public: &str) -> Result<VerifyingKey, InvalidKey> {
    let bytes = decode_hex_32(public, "ed25519 public key")?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| InvalidKey("ed25519 public key"))
}

fn decode_hex_32(s: &str, name: &'static str) -> Result<[u8; 32], InvalidKey> {
    let bytes = hex::decode(s).map_err(|_| InvalidKey(name))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| InvalidKey(name))
}

#[derive(Debug, Error)]
#[error("{0} is invalid")]
pub struct InvalidKey(pub &'static str);
