//! Datagram layer: header layout, the six variants, and the
//! serialize/deserialize dispatch.
//!
//! A datagram value is free of hidden state; encrypted variants take the
//! key-agreement session by reference at the serialization boundary. The
//! layer performs no I/O and never retries: every failure surfaces as a
//! typed [`DatagramError`](crate::core::DatagramError) for the caller to act
//! on.

mod encrypted;
mod header;
mod register;

pub use encrypted::{PushSchemas, SendMetrics};
pub use header::{
    CryptoMark, DatagramBase, DatagramType, Header, PrivateHeader, PublicHeader, SessionId,
    verify_signature,
};
pub use register::{ConnectionRejected, RegisterChallenge, RegisterChallenge2, RequestRegister};

use crate::codec::ByteReader;
use crate::core::DatagramError;
use crate::crypto::{EcdheSession, EncryptedRecord};
use crate::spack::TaskRegistry;

/// A parsed NetTask datagram, tagged by its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// Agent requests registration.
    RequestRegister(RequestRegister),
    /// Server issues its key, challenge, and salt.
    RegisterChallenge(RegisterChallenge),
    /// Agent answers the challenge.
    RegisterChallenge2(RegisterChallenge2),
    /// Either peer terminates the session.
    ConnectionRejected(ConnectionRejected),
    /// Encrypted task-schema distribution.
    PushSchemas(PushSchemas),
    /// Encrypted metric report.
    SendMetrics(SendMetrics),
}

impl Datagram {
    /// The wire type of this datagram.
    pub fn datagram_type(&self) -> DatagramType {
        match self {
            Self::RequestRegister(_) => DatagramType::RequestRegister,
            Self::RegisterChallenge(_) => DatagramType::RegisterChallenge,
            Self::RegisterChallenge2(_) => DatagramType::RegisterChallenge2,
            Self::ConnectionRejected(_) => DatagramType::ConnectionRejected,
            Self::PushSchemas(_) => DatagramType::PushSchemas,
            Self::SendMetrics(_) => DatagramType::SendMetrics,
        }
    }

    /// Borrow the shared header fields.
    pub fn header(&self) -> &Header {
        match self {
            Self::RequestRegister(d) => &d.header,
            Self::RegisterChallenge(d) => &d.header,
            Self::RegisterChallenge2(d) => &d.header,
            Self::ConnectionRejected(d) => &d.header,
            Self::PushSchemas(d) => &d.header,
            Self::SendMetrics(d) => &d.header,
        }
    }

    /// Mutably borrow the shared header fields.
    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Self::RequestRegister(d) => &mut d.header,
            Self::RegisterChallenge(d) => &mut d.header,
            Self::RegisterChallenge2(d) => &mut d.header,
            Self::ConnectionRejected(d) => &mut d.header,
            Self::PushSchemas(d) => &mut d.header,
            Self::SendMetrics(d) => &mut d.header,
        }
    }

    /// Serialize any variant to its wire form.
    ///
    /// Encrypted variants need `ecdhe` (else [`DatagramError::NotLinked`]);
    /// `SendMetrics` additionally needs the task configuration (else
    /// [`DatagramError::UnknownTask`]). Handshake variants ignore both.
    pub fn serialize(
        &self,
        ecdhe: Option<&EcdheSession>,
        tasks: Option<&TaskRegistry>,
    ) -> Result<Vec<u8>, DatagramError> {
        match self {
            Self::RequestRegister(d) => Ok(d.serialize()),
            Self::RegisterChallenge(d) => Ok(d.serialize()),
            Self::RegisterChallenge2(d) => Ok(d.serialize()),
            Self::ConnectionRejected(d) => Ok(d.serialize()),
            Self::PushSchemas(d) => d.serialize(ecdhe.ok_or(DatagramError::NotLinked)?),
            Self::SendMetrics(d) => {
                let ecdhe = ecdhe.ok_or(DatagramError::NotLinked)?;
                let tasks = tasks.ok_or_else(|| DatagramError::UnknownTask(d.task_id.clone()))?;
                d.serialize(ecdhe, tasks)
            }
        }
    }

    /// Parse one datagram from its wire form.
    ///
    /// Dispatches on the crypto mark and the type tag: cleartext frames are
    /// parsed directly, encrypted frames are opened through `ecdhe` first.
    /// The frame must be exactly one datagram; the public header's declared
    /// payload size is checked against the actual remainder.
    pub fn deserialize(
        bytes: &[u8],
        ecdhe: Option<&EcdheSession>,
        tasks: Option<&TaskRegistry>,
    ) -> Result<Self, DatagramError> {
        let mut reader = ByteReader::new(bytes);
        if !verify_signature(&mut reader) {
            return Err(DatagramError::InvalidSignature);
        }
        let public = PublicHeader::deserialize(&mut reader)?;

        let declared = public.payload_size as usize;
        let remaining = reader.remaining();
        if remaining < declared {
            return Err(DatagramError::TruncatedFrame {
                needed: declared,
                available: remaining,
            });
        }
        if remaining > declared {
            return Err(DatagramError::MalformedPayload(format!(
                "payload size {declared} but {remaining} bytes follow the header"
            )));
        }

        match public.crypto_mark {
            CryptoMark::Cleartext => {
                let private = PrivateHeader::deserialize(&mut reader)?;
                let base = DatagramBase { public, private };
                match private.datagram_type {
                    DatagramType::RequestRegister => {
                        RequestRegister::deserialize(&mut reader, base).map(Self::RequestRegister)
                    }
                    DatagramType::RegisterChallenge => {
                        RegisterChallenge::deserialize(&mut reader, base)
                            .map(Self::RegisterChallenge)
                    }
                    DatagramType::RegisterChallenge2 => {
                        RegisterChallenge2::deserialize(&mut reader, base)
                            .map(Self::RegisterChallenge2)
                    }
                    DatagramType::ConnectionRejected => {
                        ConnectionRejected::deserialize(&mut reader, base)
                            .map(Self::ConnectionRejected)
                    }
                    DatagramType::PushSchemas | DatagramType::SendMetrics => {
                        Err(DatagramError::MalformedPayload(format!(
                            "encrypted type {} under cleartext mark",
                            private.datagram_type.as_u32()
                        )))
                    }
                }
            }
            CryptoMark::Encrypted => {
                let ecdhe = ecdhe.ok_or(DatagramError::NotLinked)?;

                let outer_bytes = reader.read(declared)?;
                let outer = EncryptedRecord::from_bytes(outer_bytes)?;
                let payload = ecdhe.open_envelope(&outer)?;

                let mut payload_reader = ByteReader::new(&payload);
                let private = PrivateHeader::deserialize(&mut payload_reader)?;
                let base = DatagramBase { public, private };
                match private.datagram_type {
                    DatagramType::PushSchemas => {
                        PushSchemas::deserialize(&mut payload_reader, base, ecdhe)
                            .map(Self::PushSchemas)
                    }
                    DatagramType::SendMetrics => {
                        SendMetrics::deserialize(&mut payload_reader, base, ecdhe, tasks)
                            .map(Self::SendMetrics)
                    }
                    _ => Err(DatagramError::MalformedPayload(format!(
                        "cleartext type {} under encrypted mark",
                        private.datagram_type.as_u32()
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HASH_LEN, PUBLIC_HEADER_SIZE, SIGNATURE};

    fn sid() -> SessionId {
        SessionId::from_bytes([0x42; HASH_LEN])
    }

    #[test]
    fn test_header_integrity_bytes() {
        let request = RequestRegister::new(sid(), vec![0xAB; 32]);
        let bytes = request.serialize();

        assert_eq!(&bytes[..4], &SIGNATURE);
        assert_eq!(&bytes[4..4 + HASH_LEN], sid().as_bytes());
        assert_eq!(&bytes[4 + HASH_LEN..4 + HASH_LEN + 2], b"NC");

        let size = u32::from_be_bytes(
            bytes[4 + HASH_LEN + 2..PUBLIC_HEADER_SIZE].try_into().unwrap(),
        );
        assert_eq!(size as usize, bytes.len() - PUBLIC_HEADER_SIZE);
    }

    #[test]
    fn test_rejection_golden_frame() {
        // The full wire image of a ConnectionRejected is deterministic.
        let bytes = ConnectionRejected::new(sid()).serialize();
        let expected = [
            "4e54544b",        // "NTTK"
            &"42".repeat(32),  // session id
            "4e43",            // "NC"
            "00000011",        // payload size: 17
            "00000001",        // version
            "00000000",        // sequence
            "00000000",        // acknowledgement
            "00",              // fragmented
            "00000003",        // type: ConnectionRejected
        ]
        .concat();
        assert_eq!(bytes, hex::decode(expected).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let mut bytes = ConnectionRejected::new(sid()).serialize();
        bytes[0] = b'X';
        assert!(matches!(
            Datagram::deserialize(&bytes, None, None),
            Err(DatagramError::InvalidSignature)
        ));

        // A frame too short to hold a signature is not ours either.
        assert!(matches!(
            Datagram::deserialize(b"NT", None, None),
            Err(DatagramError::InvalidSignature)
        ));
    }

    #[test]
    fn test_invalid_crypto_mark() {
        let mut bytes = ConnectionRejected::new(sid()).serialize();
        bytes[4 + HASH_LEN..4 + HASH_LEN + 2].copy_from_slice(b"XX");
        assert!(matches!(
            Datagram::deserialize(&bytes, None, None),
            Err(DatagramError::InvalidCryptoMark { mark }) if mark == *b"XX"
        ));
    }

    #[test]
    fn test_version_rejection() {
        let mut bytes = ConnectionRejected::new(sid()).serialize();
        bytes[PUBLIC_HEADER_SIZE..PUBLIC_HEADER_SIZE + 4].copy_from_slice(&7u32.to_be_bytes());
        assert!(matches!(
            Datagram::deserialize(&bytes, None, None),
            Err(DatagramError::InvalidVersion(7))
        ));
    }

    #[test]
    fn test_every_truncation_is_detected() {
        let request = RequestRegister::new(sid(), vec![0xAB; 32]);
        let bytes = request.serialize();

        for k in 0..bytes.len() {
            let err = Datagram::deserialize(&bytes[..k], None, None).unwrap_err();
            match err {
                DatagramError::InvalidSignature => assert!(k < 4),
                DatagramError::TruncatedFrame { .. } => assert!(k >= 4),
                other => panic!("unexpected error at cut {k}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_cc_type_under_nc_mark() {
        // Hand-craft a cleartext frame whose private header claims an
        // encrypted-only type.
        let mut writer = crate::codec::ByteWriter::new();
        let header = Header::new(sid());
        header
            .public_header(DatagramType::ConnectionRejected, 17)
            .write_to(&mut writer);
        header
            .private_header(DatagramType::PushSchemas)
            .write_to(&mut writer);

        assert!(matches!(
            Datagram::deserialize(&writer.finish(), None, None),
            Err(DatagramError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut bytes = ConnectionRejected::new(sid()).serialize();
        bytes.extend_from_slice(&[0u8; 3]);
        assert!(matches!(
            Datagram::deserialize(&bytes, None, None),
            Err(DatagramError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_enum_accessors() {
        let mut datagram = Datagram::ConnectionRejected(ConnectionRejected::new(sid()));
        assert_eq!(datagram.datagram_type(), DatagramType::ConnectionRejected);
        assert_eq!(datagram.header().session_id, sid());

        datagram.header_mut().sequence = 9;
        assert_eq!(datagram.header().sequence, 9);
    }

    #[test]
    fn test_enum_serialize_dispatch() {
        let rejected = Datagram::ConnectionRejected(ConnectionRejected::new(sid()));
        let bytes = rejected.serialize(None, None).unwrap();
        assert_eq!(Datagram::deserialize(&bytes, None, None).unwrap(), rejected);
    }
}
