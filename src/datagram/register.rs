//! The four cleartext handshake variants.
//!
//! All travel with crypto mark `NC`: they exist precisely because no shared
//! key is available yet (or, for `ConnectionRejected`, may not be).

use crate::codec::{ByteReader, ByteWriter};
use crate::core::{DatagramError, PRIVATE_HEADER_SIZE, PUBLIC_HEADER_SIZE};

use super::header::{DatagramBase, DatagramType, Header, SessionId};

/// Serialize a cleartext datagram: public header, private header, payload.
///
/// The payload size is exact before the public header is written; nothing is
/// back-patched.
fn serialize_cleartext(header: &Header, datagram_type: DatagramType, payload: &[u8]) -> Vec<u8> {
    let payload_size = (PRIVATE_HEADER_SIZE + payload.len()) as u32;
    let mut writer = ByteWriter::with_capacity(PUBLIC_HEADER_SIZE + payload_size as usize);
    header
        .public_header(datagram_type, payload_size)
        .write_to(&mut writer);
    header.private_header(datagram_type).write_to(&mut writer);
    writer.write_bytes(payload);
    writer.finish()
}

/// Check the parsed type tag against the variant being constructed.
fn check_type(base: &DatagramBase, expected: DatagramType) -> Result<(), DatagramError> {
    let actual = base.private.datagram_type;
    if actual != expected {
        return Err(DatagramError::WrongType {
            expected: expected.as_u32(),
            actual: actual.as_u32(),
        });
    }
    Ok(())
}

/// Reject bytes left over after a variant's payload.
fn check_exhausted(reader: &ByteReader<'_>) -> Result<(), DatagramError> {
    if !reader.is_empty() {
        return Err(DatagramError::MalformedPayload(format!(
            "{} trailing bytes after payload",
            reader.remaining()
        )));
    }
    Ok(())
}

/// Agent → Server: request registration with the agent's ephemeral key.
///
/// The session id is a placeholder (commonly all zeros); the server's answer
/// carries the canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRegister {
    /// Shared header fields.
    pub header: Header,
    /// The agent's ephemeral public key.
    pub public_key: Vec<u8>,
}

impl RequestRegister {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::RequestRegister;

    /// Create a request carrying the agent's public key.
    pub fn new(session_id: SessionId, public_key: Vec<u8>) -> Self {
        Self {
            header: Header::new(session_id),
            public_key,
        }
    }

    /// Serialize to a contiguous byte string.
    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = ByteWriter::with_capacity(4 + self.public_key.len());
        payload.write_block(&self.public_key);
        serialize_cleartext(&self.header, Self::TYPE, &payload.finish())
    }

    /// Reconstruct from the bytes after the private header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
    ) -> Result<Self, DatagramError> {
        check_type(&base, Self::TYPE)?;
        let public_key = reader.read_block()?.to_vec();
        check_exhausted(reader)?;
        Ok(Self {
            header: Header::from_base(&base),
            public_key,
        })
    }
}

/// Server → Agent: the server's key plus a fresh challenge and salt.
///
/// The session id field carries the canonical identifier the server chose;
/// both peers use it from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterChallenge {
    /// Shared header fields.
    pub header: Header,
    /// The server's ephemeral public key.
    pub public_key: Vec<u8>,
    /// Fresh challenge nonce, input to the key derivation.
    pub challenge: Vec<u8>,
    /// Fresh salt, input to the key derivation.
    pub salt: Vec<u8>,
}

impl RegisterChallenge {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::RegisterChallenge;

    /// Create a challenge datagram.
    pub fn new(
        session_id: SessionId,
        public_key: Vec<u8>,
        challenge: Vec<u8>,
        salt: Vec<u8>,
    ) -> Self {
        Self {
            header: Header::new(session_id),
            public_key,
            challenge,
            salt,
        }
    }

    /// Serialize to a contiguous byte string.
    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = ByteWriter::with_capacity(
            12 + self.public_key.len() + self.challenge.len() + self.salt.len(),
        );
        payload.write_block(&self.public_key);
        payload.write_block(&self.challenge);
        payload.write_block(&self.salt);
        serialize_cleartext(&self.header, Self::TYPE, &payload.finish())
    }

    /// Reconstruct from the bytes after the private header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
    ) -> Result<Self, DatagramError> {
        check_type(&base, Self::TYPE)?;
        let public_key = reader.read_block()?.to_vec();
        let challenge = reader.read_block()?.to_vec();
        let salt = reader.read_block()?.to_vec();
        check_exhausted(reader)?;
        Ok(Self {
            header: Header::from_base(&base),
            public_key,
            challenge,
            salt,
        })
    }
}

/// Agent → Server: proof of possession of the derived secret.
///
/// Carried with crypto mark `NC`, but the response is bound to the handshake
/// transcript through the key derivation, so a matching proof implies both
/// peers derived the same keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterChallenge2 {
    /// Shared header fields.
    pub header: Header,
    /// The challenge response.
    pub challenge_response: Vec<u8>,
}

impl RegisterChallenge2 {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::RegisterChallenge2;

    /// Create a challenge response.
    pub fn new(session_id: SessionId, challenge_response: Vec<u8>) -> Self {
        Self {
            header: Header::new(session_id),
            challenge_response,
        }
    }

    /// Serialize to a contiguous byte string.
    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = ByteWriter::with_capacity(4 + self.challenge_response.len());
        payload.write_block(&self.challenge_response);
        serialize_cleartext(&self.header, Self::TYPE, &payload.finish())
    }

    /// Reconstruct from the bytes after the private header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
    ) -> Result<Self, DatagramError> {
        check_type(&base, Self::TYPE)?;
        let challenge_response = reader.read_block()?.to_vec();
        check_exhausted(reader)?;
        Ok(Self {
            header: Header::from_base(&base),
            challenge_response,
        })
    }
}

/// Either direction: terminate the session.
///
/// Headers only, no payload. Acceptable in any non-terminal phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRejected {
    /// Shared header fields.
    pub header: Header,
}

impl ConnectionRejected {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::ConnectionRejected;

    /// Create a rejection for a session.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            header: Header::new(session_id),
        }
    }

    /// Serialize to a contiguous byte string.
    pub fn serialize(&self) -> Vec<u8> {
        serialize_cleartext(&self.header, Self::TYPE, &[])
    }

    /// Reconstruct from the bytes after the private header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
    ) -> Result<Self, DatagramError> {
        check_type(&base, Self::TYPE)?;
        check_exhausted(reader)?;
        Ok(Self {
            header: Header::from_base(&base),
        })
    }
}
