//! Secure channel between the two paired parties
//!
//! Both parties derive the same symmetric key from their X25519 key pairs: the shared point is
//! passed through HKDF-SHA256 and the result keys XChaCha20-Poly1305. Each message is sealed under
//! a fresh random nonce which travels next to the ciphertext.

use std::fmt;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const NONCE_SIZE: usize = 24;

const KDF_LABEL: &[u8] = b"ceremony-relay/channel/v1";

/// Sealed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Channel keyed for one pair of parties
#[derive(Clone)]
pub struct SecureChannel {
    cipher: XChaCha20Poly1305,
}

impl SecureChannel {
    pub fn new(own_secret: &StaticSecret, counterparty: &PublicKey) -> Self {
        let shared = own_secret.diffie_hellman(counterparty);
        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hkdf.expand(KDF_LABEL, key.as_mut())
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_ref())),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Sealed {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .expect("XChaCha20Poly1305 only fails on plaintexts beyond 256 GiB");
        Sealed { nonce, ciphertext }
    }

    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if nonce.len() != NONCE_SIZE {
            return Err(DecryptError::NonceLength(nonce.len()));
        }
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptError::Authentication)
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecureChannel").finish_non_exhaustive()
    }
}

/// Seals `plaintext` for the owner of `recipient`
pub fn seal(plaintext: &[u8], recipient: &PublicKey, own_secret: &StaticSecret) -> Sealed {
    SecureChannel::new(own_secret, recipient).seal(plaintext)
}

/// Opens message sealed by the owner of `sender`
pub fn open(
    nonce: &[u8],
    ciphertext: &[u8],
    sender: &PublicKey,
    own_secret: &StaticSecret,
) -> Result<Vec<u8>, DecryptError> {
    SecureChannel::new(own_secret, sender).open(nonce, ciphertext)
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("nonce must be {NONCE_SIZE} bytes, got {0} bytes")]
    NonceLength(usize),
    #[error("ciphertext is not authentic")]
    Authentication,
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::keys::EncryptionKeyPair;

    proptest! {
        #[test]
        fn opens_what_was_sealed(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let web = EncryptionKeyPair::generate();
            let phone = EncryptionKeyPair::generate();

            let sealed = seal(&plaintext, phone.public(), web.secret());
            let opened = open(&sealed.nonce, &sealed.ciphertext, web.public(), phone.secret()).unwrap();
            prop_assert_eq!(opened, plaintext);
        }

        #[test]
        fn tampered_ciphertext_never_opens(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let web = EncryptionKeyPair::generate();
            let phone = EncryptionKeyPair::generate();
            let channel = SecureChannel::new(web.secret(), phone.public());

            let mut sealed = channel.seal(&plaintext);
            let i = position.index(sealed.ciphertext.len());
            sealed.ciphertext[i] ^= flip;

            let result = SecureChannel::new(phone.secret(), web.public()).open(&sealed.nonce, &sealed.ciphertext);
            prop_assert!(matches!(result, Err(DecryptError::Authentication)));
        }
    }

    #[test]
    fn nonce_is_fresh_per_message() {
        let web = EncryptionKeyPair::generate();
        let phone = EncryptionKeyPair::generate();
        let channel = SecureChannel::new(web.secret(), phone.public());

        let a = channel.seal(b"same");
        let b = channel.seal(b"same");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn sealed_message_carries_tag() {
        let web = EncryptionKeyPair::generate();
        let phone = EncryptionKeyPair::generate();
        let sealed = seal(b"", phone.public(), web.secret());
        assert_eq!(sealed.ciphertext.len(), 16);
        let sealed = seal(b"share", phone.public(), web.secret());
        assert_eq!(sealed.ciphertext.len(), 5 + 16);
    }

    #[test]
    fn third_party_cannot_open() {
        let web = EncryptionKeyPair::generate();
        let phone = EncryptionKeyPair::generate();
        let eve = EncryptionKeyPair::generate();

        let sealed = seal(b"share", phone.public(), web.secret());
        let result = open(&sealed.nonce, &sealed.ciphertext, web.public(), eve.secret());
        assert_matches!(result, Err(DecryptError::Authentication));
    }

    #[test]
    fn short_nonce_is_rejected() {
        let web = EncryptionKeyPair::generate();
        let channel = SecureChannel::new(web.secret(), web.public());
        let sealed = channel.seal(b"x");
        assert_matches!(
            channel.open(&sealed.nonce[..12], &sealed.ciphertext),
            Err(DecryptError::NonceLength(12))
        );
    }
}
