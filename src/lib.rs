//! # NetTask Protocol
//!
//! NetTask is the wire-level datagram protocol spoken between a monitoring
//! **Agent** and its **Server**: agents register over a mutually
//! authenticated ECDHE handshake bootstrapped by a pre-shared secret, task
//! schemas are distributed inside authenticated-encryption envelopes, and
//! collected metrics stream back as compact schema-directed payloads.
//!
//! The crate is the protocol core only: framing, handshake, and the
//! encrypt/serialize and deserialize/decrypt pipeline. It performs no I/O
//! and owns no timers; a transport feeds it bytes and sends the bytes it
//! produces.
//!
//! ## Feature Flags
//!
//! - `crypto` (default): ECDHE key agreement and XChaCha20-Poly1305 records
//! - `spack` (default): the SPACK object codec, schemas, and metric packing
//! - `datagram` (default): headers, variants, and dispatch
//! - `session` (default): handshake state machines and the session registry
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use nettask_protocol::prelude::*;
//!
//! # fn main() -> Result<(), DatagramError> {
//! let secret = b"shared registration secret";
//! let mut agent = AgentSession::new(secret);
//! let mut server = ServerSessionRegistry::new(secret);
//!
//! // Registration handshake.
//! let request = agent.start()?;
//! let ServerEvent::Reply { bytes: challenge, .. } = server.handle(&request)? else {
//!     unreachable!("a registration request is always answered");
//! };
//! let response = agent.handle(&challenge)?.expect("agent answers the challenge");
//! server.handle(&response)?;
//! assert!(agent.is_established());
//!
//! // Distribute a schema, then report against it.
//! let mut schemas = BTreeMap::new();
//! schemas.insert(
//!     "cpu".to_string(),
//!     TaskSchema::new().with_field("usage", FieldType::F64),
//! );
//! let push = agent.push_schemas(schemas)?;
//! server.handle(&push)?;
//!
//! let mut metric = TaskMetric::new();
//! metric.insert("usage".to_string(), Value::F64(0.42));
//! let report = agent.send_metric("cpu", metric)?;
//! match server.handle(&report)? {
//!     ServerEvent::Metric { task_id, .. } => assert_eq!(task_id, "cpu"),
//!     other => panic!("unexpected event: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core constants and errors (always included)
pub mod core;

// Positional big-endian codec (always included)
pub mod codec;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// SPACK object codec (feature-gated)
#[cfg(feature = "spack")]
#[cfg_attr(docsrs, doc(cfg(feature = "spack")))]
pub mod spack;

// Datagram layer (feature-gated)
#[cfg(feature = "datagram")]
#[cfg_attr(docsrs, doc(cfg(feature = "datagram")))]
pub mod datagram;

// Session state machines (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{ByteReader, ByteWriter};
    pub use crate::core::{CodecError, CryptoError, DatagramError, SpackError};

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{EcdheSession, EncryptedRecord, EphemeralKeypair};

    #[cfg(feature = "spack")]
    pub use crate::spack::{
        FieldType, TaskMetric, TaskRegistry, TaskSchema, Value, deserialize_spack,
        deserialize_task_metric, is_spack_task_collection, pack_task_schemas, serialize_spack,
        serialize_task_metric, unpack_task_schemas,
    };

    #[cfg(feature = "datagram")]
    pub use crate::datagram::{
        ConnectionRejected, CryptoMark, Datagram, DatagramType, Header, PrivateHeader,
        PublicHeader, PushSchemas, RegisterChallenge, RegisterChallenge2, RequestRegister,
        SendMetrics, SessionId,
    };

    #[cfg(feature = "session")]
    pub use crate::session::{AgentSession, Phase, ServerEvent, ServerSession, ServerSessionRegistry};
}

// Re-export commonly used items at crate root
pub use self::core::DatagramError;

#[cfg(feature = "datagram")]
pub use datagram::{Datagram, DatagramType, SessionId};

#[cfg(feature = "session")]
pub use session::{AgentSession, Phase, ServerEvent, ServerSessionRegistry};
