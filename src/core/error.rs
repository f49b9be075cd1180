//! Error types for the NetTask protocol.

use thiserror::Error;

use super::constants::VERSION;

/// Errors from the positional byte codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The reader ran past the end of its buffer.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
}

/// Errors in the key-agreement and AEAD layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A cipher operation was requested before `derive_shared_secret`.
    #[error("key agreement not established")]
    NotEstablished,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted ciphertext).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed (bad peer key or HKDF expansion).
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// An encrypted record's byte form did not match its layout.
    #[error("malformed encrypted record")]
    MalformedRecord,
}

/// Errors in the SPACK object codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpackError {
    /// A value carried an unknown tag byte.
    #[error("unknown value tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// A string value held invalid UTF-8.
    #[error("invalid utf-8 in string value")]
    InvalidUtf8,

    /// The input ended inside a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Bytes remained after the outermost value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Containers nested beyond the decoder's limit.
    #[error("value nesting too deep")]
    NestingTooDeep,

    /// A schema carried an unknown field-type code.
    #[error("unknown field type code: 0x{0:02x}")]
    UnknownFieldType(u8),

    /// The value is not a packed task-schema collection.
    #[error("not a task schema collection")]
    NotATaskCollection,

    /// A metric is missing a field its schema requires.
    #[error("metric missing field {0:?}")]
    MissingField(String),

    /// A metric carries a field its schema does not know.
    #[error("field {0:?} not present in task schema")]
    UnexpectedField(String),

    /// A metric value does not match its schema field type.
    #[error("field {field:?}: expected a {expected} value")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Name of the type the schema requires.
        expected: &'static str,
    },
}

impl From<CodecError> for SpackError {
    fn from(_: CodecError) -> Self {
        SpackError::UnexpectedEof
    }
}

/// Errors surfaced by the datagram layer.
///
/// All are fatal for the frame they occur on; [`DatagramError::rejects_session`]
/// tells the caller whether the session should be torn down as well. The
/// datagram layer never retries and never emits `ConnectionRejected` itself;
/// that decision belongs to the session manager.
#[derive(Debug, Error)]
pub enum DatagramError {
    /// The first four bytes were not `NTTK`; the frame is not ours.
    #[error("invalid signature: frame is not a NetTask datagram")]
    InvalidSignature,

    /// The frame ended before its declared contents.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    TruncatedFrame {
        /// Bytes the parse required.
        needed: usize,
        /// Bytes left in the frame.
        available: usize,
    },

    /// The crypto mark was neither `CC` nor `NC`.
    #[error("invalid crypto mark: {mark:?}")]
    InvalidCryptoMark {
        /// The two mark bytes as received.
        mark: [u8; 2],
    },

    /// The private header carried a version other than [`VERSION`].
    #[error("invalid version: expected {VERSION}, got {0}")]
    InvalidVersion(u32),

    /// A variant deserializer was invoked for a different datagram type.
    #[error("wrong datagram type: expected {expected}, got {actual}")]
    WrongType {
        /// Type the operation expected.
        expected: u32,
        /// Type actually present.
        actual: u32,
    },

    /// An AEAD seal or open failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(CryptoError),

    /// A payload did not parse or its length prefixes were inconsistent.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A metric referenced a task id absent from the bound configuration.
    #[error("unknown task: {0:?}")]
    UnknownTask(String),

    /// An encrypted variant was used without a bound key-agreement session.
    #[error("datagram not linked to an established key-agreement session")]
    NotLinked,
}

impl DatagramError {
    /// Check if this error should result in a silent drop (no response sent).
    ///
    /// Only signature failures are silently dropped; the frame may belong to
    /// another protocol sharing the port.
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, DatagramError::InvalidSignature)
    }

    /// Check if this error should tear down the session it occurred on.
    pub fn rejects_session(&self) -> bool {
        matches!(
            self,
            DatagramError::TruncatedFrame { .. }
                | DatagramError::InvalidCryptoMark { .. }
                | DatagramError::InvalidVersion(_)
                | DatagramError::CryptoFailure(_)
                | DatagramError::MalformedPayload(_)
        )
    }
}

impl From<CodecError> for DatagramError {
    fn from(err: CodecError) -> Self {
        let CodecError::Truncated { needed, available } = err;
        DatagramError::TruncatedFrame { needed, available }
    }
}

impl From<CryptoError> for DatagramError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::NotEstablished => DatagramError::NotLinked,
            CryptoError::MalformedRecord => {
                DatagramError::MalformedPayload("malformed encrypted record".into())
            }
            other => DatagramError::CryptoFailure(other),
        }
    }
}

impl From<SpackError> for DatagramError {
    fn from(err: SpackError) -> Self {
        DatagramError::MalformedPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_drop_errors() {
        assert!(DatagramError::InvalidSignature.is_silent_drop());

        assert!(!DatagramError::NotLinked.is_silent_drop());
        assert!(!DatagramError::InvalidVersion(2).is_silent_drop());
        assert!(!DatagramError::UnknownTask("cpu".into()).is_silent_drop());
    }

    #[test]
    fn test_session_rejecting_errors() {
        assert!(DatagramError::TruncatedFrame { needed: 4, available: 0 }.rejects_session());
        assert!(DatagramError::InvalidCryptoMark { mark: *b"XX" }.rejects_session());
        assert!(DatagramError::InvalidVersion(2).rejects_session());
        assert!(DatagramError::CryptoFailure(CryptoError::DecryptionFailed).rejects_session());
        assert!(DatagramError::MalformedPayload("bad".into()).rejects_session());

        // Not ours, retained session, and programmer errors keep the session.
        assert!(!DatagramError::InvalidSignature.rejects_session());
        assert!(!DatagramError::UnknownTask("cpu".into()).rejects_session());
        assert!(!DatagramError::NotLinked.rejects_session());
        assert!(!DatagramError::WrongType { expected: 0, actual: 1 }.rejects_session());
    }

    #[test]
    fn test_crypto_error_mapping() {
        assert!(matches!(
            DatagramError::from(CryptoError::NotEstablished),
            DatagramError::NotLinked
        ));
        assert!(matches!(
            DatagramError::from(CryptoError::DecryptionFailed),
            DatagramError::CryptoFailure(CryptoError::DecryptionFailed)
        ));
        assert!(matches!(
            DatagramError::from(CryptoError::MalformedRecord),
            DatagramError::MalformedPayload(_)
        ));
    }

    #[test]
    fn test_codec_error_mapping() {
        let err = DatagramError::from(CodecError::Truncated { needed: 8, available: 3 });
        assert!(matches!(
            err,
            DatagramError::TruncatedFrame { needed: 8, available: 3 }
        ));
    }
}
