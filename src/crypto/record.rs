//! Self-describing AEAD record wire format.

use crate::codec::{ByteReader, ByteWriter};
use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError};

/// An AEAD record: nonce, authentication tag, and ciphertext.
///
/// Byte form (all lengths u32 big-endian):
/// ```text
/// +---------+---------+----------+---------+---------+------------+
/// | ivLen   | iv      | tagLen   | tag     | ctLen   | ciphertext |
/// | 4 bytes | 24 bytes| 4 bytes  | 16 bytes| 4 bytes | variable   |
/// +---------+---------+----------+---------+---------+------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    /// XChaCha20 nonce, fresh per record.
    pub iv: [u8; AEAD_NONCE_SIZE],
    /// Poly1305 authentication tag.
    pub tag: [u8; AEAD_TAG_SIZE],
    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedRecord {
    /// Total size of the serialized record.
    pub fn wire_size(&self) -> usize {
        4 + AEAD_NONCE_SIZE + 4 + AEAD_TAG_SIZE + 4 + self.ciphertext.len()
    }

    /// Serialize to the self-describing byte form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.wire_size());
        writer.write_block(&self.iv);
        writer.write_block(&self.tag);
        writer.write_block(&self.ciphertext);
        writer.finish()
    }

    /// Parse from the self-describing byte form.
    ///
    /// The iv and tag lengths are fixed by the AEAD construction; any other
    /// length, or trailing bytes, is a [`CryptoError::MalformedRecord`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = ByteReader::new(bytes);

        let iv: [u8; AEAD_NONCE_SIZE] = reader
            .read_block()
            .map_err(|_| CryptoError::MalformedRecord)?
            .try_into()
            .map_err(|_| CryptoError::MalformedRecord)?;
        let tag: [u8; AEAD_TAG_SIZE] = reader
            .read_block()
            .map_err(|_| CryptoError::MalformedRecord)?
            .try_into()
            .map_err(|_| CryptoError::MalformedRecord)?;
        let ciphertext = reader
            .read_block()
            .map_err(|_| CryptoError::MalformedRecord)?
            .to_vec();

        if !reader.is_empty() {
            return Err(CryptoError::MalformedRecord);
        }

        Ok(Self { iv, tag, ciphertext })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedRecord {
        EncryptedRecord {
            iv: [0x11; AEAD_NONCE_SIZE],
            tag: [0x22; AEAD_TAG_SIZE],
            ciphertext: vec![0xAA, 0xBB, 0xCC],
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample();
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), record.wire_size());

        let parsed = EncryptedRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_record_empty_ciphertext() {
        let record = EncryptedRecord {
            ciphertext: Vec::new(),
            ..sample()
        };
        let parsed = EncryptedRecord::from_bytes(&record.to_bytes()).unwrap();
        assert!(parsed.ciphertext.is_empty());
    }

    #[test]
    fn test_record_wrong_iv_length() {
        let mut writer = ByteWriter::new();
        writer.write_block(&[0u8; 12]); // too short for XChaCha20
        writer.write_block(&[0u8; AEAD_TAG_SIZE]);
        writer.write_block(b"");

        assert!(matches!(
            EncryptedRecord::from_bytes(&writer.finish()),
            Err(CryptoError::MalformedRecord)
        ));
    }

    #[test]
    fn test_record_trailing_bytes() {
        let mut bytes = sample().to_bytes();
        bytes.push(0x00);

        assert!(matches!(
            EncryptedRecord::from_bytes(&bytes),
            Err(CryptoError::MalformedRecord)
        ));
    }

    #[test]
    fn test_record_truncated() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            EncryptedRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CryptoError::MalformedRecord)
        ));
    }
}
