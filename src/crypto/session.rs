//! ECDHE key agreement bootstrapped by a pre-shared secret.
//!
//! Both peers hold a common registration secret. Each side generates an
//! ephemeral X25519 keypair; the server additionally supplies a fresh salt
//! and challenge. `derive_shared_secret` runs HKDF-SHA-256 over
//! `DH ‖ psk ‖ challenge` with the salt as extract input, expanding three
//! independent outputs:
//!
//! - the *envelope* key, protecting the outer payload of encrypted datagrams,
//! - the *message* key, protecting the inner application body,
//! - the *challenge proof*, which the agent returns in `RegisterChallenge2`
//!   and the server compares against its own derivation.
//!
//! Envelope and message contexts are independently keyed so that the two
//! AEAD layers of an encrypted datagram never share a key.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CHALLENGE_SIZE, CryptoError, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE};

use super::{EncryptedRecord, EphemeralKeypair};

/// HKDF label for the envelope (outer) AEAD context.
const ENVELOPE_KEY_LABEL: &[u8] = b"nettask v1 envelope key";

/// HKDF label for the message (inner) AEAD context.
const MESSAGE_KEY_LABEL: &[u8] = b"nettask v1 message key";

/// HKDF label for the challenge proof.
const CHALLENGE_PROOF_LABEL: &[u8] = b"nettask v1 challenge proof";

/// The two symmetric keys derived for an established session.
///
/// Zeroized on drop.
struct SessionKeys {
    envelope: [u8; SESSION_KEY_SIZE],
    message: [u8; SESSION_KEY_SIZE],
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.envelope.zeroize();
        self.message.zeroize();
    }
}

/// An ephemeral key-agreement session.
///
/// Created per registration attempt; holds the local keypair and the
/// pre-shared secret, and after [`EcdheSession::derive_shared_secret`] the
/// two symmetric session keys. The pre-shared secret is zeroized on drop.
pub struct EcdheSession {
    keypair: EphemeralKeypair,
    pre_shared: Vec<u8>,
    keys: Option<SessionKeys>,
}

impl EcdheSession {
    /// Create a session with a fresh ephemeral keypair.
    pub fn new(pre_shared_secret: &[u8]) -> Self {
        Self {
            keypair: EphemeralKeypair::generate(),
            pre_shared: pre_shared_secret.to_vec(),
            keys: None,
        }
    }

    /// Get the local ephemeral public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.keypair.public_key()
    }

    /// Check whether session keys have been derived.
    pub fn is_established(&self) -> bool {
        self.keys.is_some()
    }

    /// Derive the shared session keys and the challenge proof.
    ///
    /// Both peers call this with the same `(salt, challenge)` pair from
    /// `RegisterChallenge`; the returned proof travels in
    /// `RegisterChallenge2`, and a byte-wise match implies matching keys.
    pub fn derive_shared_secret(
        &mut self,
        peer_public: &[u8],
        salt: &[u8],
        challenge: &[u8],
    ) -> Result<[u8; CHALLENGE_SIZE], CryptoError> {
        let mut dh = self.keypair.diffie_hellman(peer_public)?;

        let mut ikm = Vec::with_capacity(dh.len() + self.pre_shared.len() + challenge.len());
        ikm.extend_from_slice(&dh);
        ikm.extend_from_slice(&self.pre_shared);
        ikm.extend_from_slice(challenge);

        let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);

        let mut envelope = [0u8; SESSION_KEY_SIZE];
        let mut message = [0u8; SESSION_KEY_SIZE];
        let mut proof = [0u8; CHALLENGE_SIZE];
        let expanded = hk
            .expand(ENVELOPE_KEY_LABEL, &mut envelope)
            .and_then(|_| hk.expand(MESSAGE_KEY_LABEL, &mut message))
            .and_then(|_| hk.expand(CHALLENGE_PROOF_LABEL, &mut proof));

        dh.zeroize();
        ikm.zeroize();

        if expanded.is_err() {
            envelope.zeroize();
            message.zeroize();
            return Err(CryptoError::KeyDerivationFailed);
        }

        self.keys = Some(SessionKeys { envelope, message });
        Ok(proof)
    }

    /// Encrypt an application body under the message key.
    pub fn encrypt(&self, plain: &[u8]) -> Result<EncryptedRecord, CryptoError> {
        seal(&self.session_keys()?.message, plain)
    }

    /// Decrypt an application body under the message key.
    pub fn decrypt(&self, record: &EncryptedRecord) -> Result<Vec<u8>, CryptoError> {
        open(&self.session_keys()?.message, record)
    }

    /// Seal an outer payload (private header and inner record) under the
    /// envelope key.
    pub fn envelope(&self, plain: &[u8]) -> Result<EncryptedRecord, CryptoError> {
        seal(&self.session_keys()?.envelope, plain)
    }

    /// Open an outer payload under the envelope key.
    pub fn open_envelope(&self, record: &EncryptedRecord) -> Result<Vec<u8>, CryptoError> {
        open(&self.session_keys()?.envelope, record)
    }

    fn session_keys(&self) -> Result<&SessionKeys, CryptoError> {
        self.keys.as_ref().ok_or(CryptoError::NotEstablished)
    }
}

impl Drop for EcdheSession {
    fn drop(&mut self) {
        self.pre_shared.zeroize();
    }
}

/// Encrypt with a fresh random 24-byte nonce.
fn seal(key: &[u8; SESSION_KEY_SIZE], plain: &[u8]) -> Result<EncryptedRecord, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut iv = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(XNonce::from_slice(&iv), plain)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    // The cipher appends the 16-byte Poly1305 tag; split it into the record.
    let tag_start = sealed.len() - AEAD_TAG_SIZE;
    let mut tag = [0u8; AEAD_TAG_SIZE];
    tag.copy_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);

    Ok(EncryptedRecord {
        iv,
        tag,
        ciphertext: sealed,
    })
}

/// Decrypt, authenticating ciphertext and tag together.
fn open(key: &[u8; SESSION_KEY_SIZE], record: &EncryptedRecord) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut sealed = Vec::with_capacity(record.ciphertext.len() + AEAD_TAG_SIZE);
    sealed.extend_from_slice(&record.ciphertext);
    sealed.extend_from_slice(&record.tag);

    cipher
        .decrypt(XNonce::from_slice(&record.iv), sealed.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}
