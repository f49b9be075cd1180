//! Public and private header layouts.
//!
//! The public header is always cleartext and parseable before any key
//! agreement has completed. The private header travels cleartext in
//! handshake datagrams and inside the AEAD envelope in encrypted ones.

use sha2::{Digest, Sha256};

use crate::codec::{ByteReader, ByteWriter};
use crate::core::{
    CRYPTO_MARK, DatagramError, HASH_LEN, NOCRYPTO_MARK, SIGNATURE, SIGNATURE_SIZE,
    TYPE_CONNECTION_REJECTED, TYPE_PUSH_SCHEMAS, TYPE_REGISTER_CHALLENGE,
    TYPE_REGISTER_CHALLENGE2, TYPE_REQUEST_REGISTER, TYPE_SEND_METRICS, VERSION,
};

/// Session identifier, the width of the key-agreement hash output.
///
/// The agent's first datagram carries the all-zero placeholder; the server's
/// `RegisterChallenge` fixes the canonical value for the session's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId([u8; HASH_LEN]);

impl SessionId {
    /// The all-zero placeholder used before the server has chosen an id.
    pub fn zeroed() -> Self {
        Self([0u8; HASH_LEN])
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Check whether this is the pre-registration placeholder.
    pub fn is_zeroed(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Derive the canonical id for a session.
    ///
    /// The server computes SHA-256 over both ephemeral public keys and the
    /// pre-shared secret, binding the id to the handshake participants.
    pub fn derive(agent_public: &[u8], server_public: &[u8], pre_shared: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(agent_public);
        hasher.update(server_public);
        hasher.update(pre_shared);
        Self(hasher.finalize().into())
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({self})")
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Whether the private section of a datagram is AEAD-protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMark {
    /// `CC`: an encrypted envelope follows the public header.
    Encrypted,
    /// `NC`: the private header and payload follow in cleartext.
    Cleartext,
}

impl CryptoMark {
    /// Parse the two mark bytes.
    pub fn from_bytes(bytes: [u8; 2]) -> Result<Self, DatagramError> {
        match bytes {
            CRYPTO_MARK => Ok(Self::Encrypted),
            NOCRYPTO_MARK => Ok(Self::Cleartext),
            mark => Err(DatagramError::InvalidCryptoMark { mark }),
        }
    }

    /// Get the wire bytes.
    pub fn as_bytes(self) -> [u8; 2] {
        match self {
            Self::Encrypted => CRYPTO_MARK,
            Self::Cleartext => NOCRYPTO_MARK,
        }
    }
}

/// Datagram type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DatagramType {
    /// Agent requests registration.
    RequestRegister = TYPE_REQUEST_REGISTER,
    /// Server issues its key, challenge, and salt.
    RegisterChallenge = TYPE_REGISTER_CHALLENGE,
    /// Agent answers the challenge.
    RegisterChallenge2 = TYPE_REGISTER_CHALLENGE2,
    /// Either peer terminates the session.
    ConnectionRejected = TYPE_CONNECTION_REJECTED,
    /// Encrypted task-schema distribution.
    PushSchemas = TYPE_PUSH_SCHEMAS,
    /// Encrypted metric report.
    SendMetrics = TYPE_SEND_METRICS,
}

impl DatagramType {
    /// Parse a datagram type from its wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            TYPE_REQUEST_REGISTER => Some(Self::RequestRegister),
            TYPE_REGISTER_CHALLENGE => Some(Self::RegisterChallenge),
            TYPE_REGISTER_CHALLENGE2 => Some(Self::RegisterChallenge2),
            TYPE_CONNECTION_REJECTED => Some(Self::ConnectionRejected),
            TYPE_PUSH_SCHEMAS => Some(Self::PushSchemas),
            TYPE_SEND_METRICS => Some(Self::SendMetrics),
            _ => None,
        }
    }

    /// Convert to the wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// The crypto mark this type mandates: `CC` for the two encrypted
    /// variants, `NC` for the four handshake variants.
    pub fn crypto_mark(self) -> CryptoMark {
        if self.is_encrypted() {
            CryptoMark::Encrypted
        } else {
            CryptoMark::Cleartext
        }
    }

    /// Check whether this type travels inside an AEAD envelope.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::PushSchemas | Self::SendMetrics)
    }
}

/// The cleartext header leading every datagram.
///
/// Wire format (42 bytes for a 32-byte hash):
/// ```text
/// +-----------+--------------------+------------+--------------+
/// | Signature | Session ID         | CryptoMark | Payload Size |
/// | "NTTK"    | HASH_LEN bytes     | "CC"/"NC"  | u32 BE       |
/// +-----------+--------------------+------------+--------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicHeader {
    /// Session identifier.
    pub session_id: SessionId,
    /// Whether an encrypted envelope follows.
    pub crypto_mark: CryptoMark,
    /// Byte length of everything after this header.
    pub payload_size: u32,
}

impl PublicHeader {
    /// Write the full public header, signature included.
    pub fn write_to(&self, writer: &mut ByteWriter) {
        writer.write_bytes(&SIGNATURE);
        writer.write_bytes(self.session_id.as_bytes());
        writer.write_bytes(&self.crypto_mark.as_bytes());
        writer.write_u32(self.payload_size);
    }

    /// Parse the header fields after the signature has been consumed by
    /// [`verify_signature`].
    pub fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, DatagramError> {
        let session_id = SessionId::from_bytes(reader.read_array()?);
        let crypto_mark = CryptoMark::from_bytes(reader.read_array()?)?;
        let payload_size = reader.read_u32()?;
        Ok(Self {
            session_id,
            crypto_mark,
            payload_size,
        })
    }
}

/// Check and consume the frame signature.
///
/// Returns true and advances past the four signature bytes on a match;
/// returns false (frame is not ours) otherwise.
pub fn verify_signature(reader: &mut ByteReader<'_>) -> bool {
    if reader.remaining() < SIGNATURE_SIZE {
        return false;
    }
    match reader.read(SIGNATURE_SIZE) {
        Ok(bytes) => bytes == SIGNATURE,
        Err(_) => false,
    }
}

/// The header protected alongside the payload.
///
/// Wire format (17 bytes, all integers big-endian):
/// ```text
/// +---------+--------+--------+------------+--------+
/// | Version | Seq    | Ack    | Fragmented | Type   |
/// | u32     | u32    | u32    | u8         | u32    |
/// +---------+--------+--------+------------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateHeader {
    /// Protocol version, always [`VERSION`].
    pub version: u32,
    /// Sequence number, pass-through for a reliability layer.
    pub sequence: u32,
    /// Acknowledgement number, pass-through for a reliability layer.
    pub acknowledgement: u32,
    /// Fragmentation flag, pass-through.
    pub fragmented: bool,
    /// Datagram type.
    pub datagram_type: DatagramType,
}

impl PrivateHeader {
    /// Create a header for the current protocol version.
    pub fn new(datagram_type: DatagramType, sequence: u32, acknowledgement: u32) -> Self {
        Self {
            version: VERSION,
            sequence,
            acknowledgement,
            fragmented: false,
            datagram_type,
        }
    }

    /// Write the header fields.
    pub fn write_to(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.version);
        writer.write_u32(self.sequence);
        writer.write_u32(self.acknowledgement);
        writer.write_u8(u8::from(self.fragmented));
        writer.write_u32(self.datagram_type.as_u32());
    }

    /// Parse the header fields.
    ///
    /// Fails with [`DatagramError::InvalidVersion`] on a version mismatch and
    /// [`DatagramError::MalformedPayload`] on an unknown type value.
    pub fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, DatagramError> {
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(DatagramError::InvalidVersion(version));
        }

        let sequence = reader.read_u32()?;
        let acknowledgement = reader.read_u32()?;
        let fragmented = reader.read_u8()? != 0;

        let type_value = reader.read_u32()?;
        let datagram_type = DatagramType::from_u32(type_value).ok_or_else(|| {
            DatagramError::MalformedPayload(format!("unknown datagram type {type_value}"))
        })?;

        Ok(Self {
            version,
            sequence,
            acknowledgement,
            fragmented,
            datagram_type,
        })
    }
}

/// Both headers of a datagram, as produced by header parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramBase {
    /// The cleartext public header.
    pub public: PublicHeader,
    /// The private header, from the cleartext body or the opened envelope.
    pub private: PrivateHeader,
}

/// The header fields a datagram value owns.
///
/// Crypto mark, version, and payload size are derived at serialization time;
/// a datagram value carries only what is not implied by its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Session identifier echoed in every datagram of a session.
    pub session_id: SessionId,
    /// Sequence number, pass-through.
    pub sequence: u32,
    /// Acknowledgement number, pass-through.
    pub acknowledgement: u32,
    /// Fragmentation flag, pass-through.
    pub fragmented: bool,
}

impl Header {
    /// Create a header with zero sequence numbers.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            sequence: 0,
            acknowledgement: 0,
            fragmented: false,
        }
    }

    /// Collect the owned fields out of a parsed base.
    pub fn from_base(base: &DatagramBase) -> Self {
        Self {
            session_id: base.public.session_id,
            sequence: base.private.sequence,
            acknowledgement: base.private.acknowledgement,
            fragmented: base.private.fragmented,
        }
    }

    /// Build the private header for this datagram.
    pub fn private_header(&self, datagram_type: DatagramType) -> PrivateHeader {
        PrivateHeader {
            version: VERSION,
            sequence: self.sequence,
            acknowledgement: self.acknowledgement,
            fragmented: self.fragmented,
            datagram_type,
        }
    }

    /// Build the public header for this datagram.
    pub fn public_header(&self, datagram_type: DatagramType, payload_size: u32) -> PublicHeader {
        PublicHeader {
            session_id: self.session_id,
            crypto_mark: datagram_type.crypto_mark(),
            payload_size,
        }
    }
}
