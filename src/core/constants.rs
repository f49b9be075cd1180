//! Protocol constants for the NetTask wire format.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

// =============================================================================
// PUBLIC HEADER
// =============================================================================

/// Frame signature, first four bytes of every datagram.
pub const SIGNATURE: [u8; 4] = *b"NTTK";

/// Signature size in bytes.
pub const SIGNATURE_SIZE: usize = 4;

/// Crypto mark for datagrams whose private section is AEAD-protected.
pub const CRYPTO_MARK: [u8; 2] = *b"CC";

/// Crypto mark for datagrams whose private section is cleartext.
pub const NOCRYPTO_MARK: [u8; 2] = *b"NC";

/// Crypto mark size in bytes.
pub const CRYPTO_MARK_SIZE: usize = 2;

/// Session id width, fixed to the key-agreement hash output (SHA-256).
pub const HASH_LEN: usize = 32;

/// Public header size (signature + session id + crypto mark + payload size).
pub const PUBLIC_HEADER_SIZE: usize = SIGNATURE_SIZE + HASH_LEN + CRYPTO_MARK_SIZE + 4;

// =============================================================================
// PRIVATE HEADER
// =============================================================================

/// Protocol version carried in every private header.
pub const VERSION: u32 = 1;

/// Private header size (version + seq + ack + fragmented + type).
pub const PRIVATE_HEADER_SIZE: usize = 4 + 4 + 4 + 1 + 4;

// =============================================================================
// DATAGRAM TYPES
// =============================================================================

/// Agent requests registration, carrying its ephemeral public key.
pub const TYPE_REQUEST_REGISTER: u32 = 0;

/// Server answers with its public key, a challenge, and a salt.
pub const TYPE_REGISTER_CHALLENGE: u32 = 1;

/// Agent proves possession of the derived secret.
pub const TYPE_REGISTER_CHALLENGE2: u32 = 2;

/// Either peer terminates the session.
pub const TYPE_CONNECTION_REJECTED: u32 = 3;

/// Encrypted task-schema distribution.
pub const TYPE_PUSH_SCHEMAS: u32 = 4;

/// Encrypted metric report.
pub const TYPE_SEND_METRICS: u32 = 5;

// =============================================================================
// CRYPTOGRAPHIC SIZES
// =============================================================================

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// XChaCha20 session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Registration challenge nonce size.
pub const CHALLENGE_SIZE: usize = 32;

/// Key-derivation salt size.
pub const SALT_SIZE: usize = 32;
