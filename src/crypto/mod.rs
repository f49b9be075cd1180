//! Security layer: ephemeral X25519 key agreement and the AEAD record
//! format used by encrypted datagrams.
//!
//! The contract the datagram layer relies on:
//! - [`EcdheSession::derive_shared_secret`] turns a peer public key, a salt,
//!   and a challenge into two independently-keyed XChaCha20-Poly1305
//!   contexts plus a challenge proof,
//! - [`EcdheSession::encrypt`] / [`EcdheSession::decrypt`] protect the inner
//!   application body,
//! - [`EcdheSession::envelope`] / [`EcdheSession::open_envelope`] protect
//!   the outer payload (private header included),
//! - [`EncryptedRecord`] is the self-describing byte form of either.

mod keys;
mod record;
mod session;

pub use keys::EphemeralKeypair;
pub use record::EncryptedRecord;
pub use session::EcdheSession;
