//! X25519 ephemeral key management.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::core::{CryptoError, PUBLIC_KEY_SIZE};

/// An ephemeral X25519 keypair, generated fresh per session.
///
/// The secret half is zeroized on drop.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EphemeralKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute the shared secret with a peer's public key.
    ///
    /// The peer key comes off the wire as a length-prefixed field, so any
    /// length other than [`PUBLIC_KEY_SIZE`] fails with
    /// [`CryptoError::KeyDerivationFailed`].
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<[u8; 32], CryptoError> {
        let peer: [u8; PUBLIC_KEY_SIZE] = peer_public
            .try_into()
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        Ok(*shared.as_bytes())
    }
}
