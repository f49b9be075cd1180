//! The two encrypted variants: schema distribution and metric reports.
//!
//! Both share the same outer layout and differ only in the cleartext the
//! inner record protects. Serialization nests two AEAD contexts:
//!
//! ```text
//! PublicHeader ‖ envelope( PrivateHeader ‖ u32 len ‖ encrypt(body) )
//! ```
//!
//! The envelope binds the private header to the session key while the
//! serializer can still compute `payload_size` from the outer record alone.

use std::collections::BTreeMap;

use crate::codec::{ByteReader, ByteWriter};
use crate::core::{DatagramError, PRIVATE_HEADER_SIZE, PUBLIC_HEADER_SIZE};
use crate::crypto::{EcdheSession, EncryptedRecord};
use crate::spack::{
    TaskMetric, TaskRegistry, TaskSchema, deserialize_spack, deserialize_task_metric,
    pack_task_schemas, serialize_spack, serialize_task_metric, unpack_task_schemas,
};

use super::header::{DatagramBase, DatagramType, Header, SessionId};

/// Run the encrypt/envelope pipeline over an already-encoded body.
fn serialize_encrypted(
    header: &Header,
    datagram_type: DatagramType,
    body: &[u8],
    ecdhe: &EcdheSession,
) -> Result<Vec<u8>, DatagramError> {
    // Inner context: the application body.
    let inner = ecdhe.encrypt(body)?.to_bytes();

    // Outer payload: private header followed by the inner record.
    let mut payload = ByteWriter::with_capacity(PRIVATE_HEADER_SIZE + 4 + inner.len());
    header.private_header(datagram_type).write_to(&mut payload);
    payload.write_block(&inner);

    // Envelope context: the whole payload, private header included.
    let outer = ecdhe.envelope(&payload.finish())?.to_bytes();

    let mut writer = ByteWriter::with_capacity(PUBLIC_HEADER_SIZE + outer.len());
    header
        .public_header(datagram_type, outer.len() as u32)
        .write_to(&mut writer);
    writer.write_bytes(&outer);
    Ok(writer.finish())
}

/// Read and decrypt the inner record following the private header.
fn open_inner(reader: &mut ByteReader<'_>, ecdhe: &EcdheSession) -> Result<Vec<u8>, DatagramError> {
    let inner_bytes = reader.read_block()?;
    if !reader.is_empty() {
        return Err(DatagramError::MalformedPayload(format!(
            "{} trailing bytes after inner record",
            reader.remaining()
        )));
    }
    let record = EncryptedRecord::from_bytes(inner_bytes)?;
    Ok(ecdhe.decrypt(&record)?)
}

/// Encrypted task-schema distribution.
///
/// The body is a packed schema collection in SPACK form, length-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSchemas {
    /// Shared header fields.
    pub header: Header,
    /// Schemas by task name.
    pub schemas: BTreeMap<String, TaskSchema>,
}

impl PushSchemas {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::PushSchemas;

    /// Create a schema push for an established session.
    pub fn new(session_id: SessionId, schemas: BTreeMap<String, TaskSchema>) -> Self {
        Self {
            header: Header::new(session_id),
            schemas,
        }
    }

    /// Serialize through the bound key-agreement session.
    pub fn serialize(&self, ecdhe: &EcdheSession) -> Result<Vec<u8>, DatagramError> {
        let spack = serialize_spack(&pack_task_schemas(&self.schemas));
        let mut body = ByteWriter::with_capacity(4 + spack.len());
        body.write_block(&spack);
        serialize_encrypted(&self.header, Self::TYPE, &body.finish(), ecdhe)
    }

    /// Reconstruct from the opened envelope, positioned after the private
    /// header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
        ecdhe: &EcdheSession,
    ) -> Result<Self, DatagramError> {
        if base.private.datagram_type != Self::TYPE {
            return Err(DatagramError::WrongType {
                expected: Self::TYPE.as_u32(),
                actual: base.private.datagram_type.as_u32(),
            });
        }

        let body = open_inner(reader, ecdhe)?;
        let mut body_reader = ByteReader::new(&body);
        let spack = body_reader.read_block()?;
        if !body_reader.is_empty() {
            return Err(DatagramError::MalformedPayload(
                "trailing bytes after schema collection".into(),
            ));
        }

        let packed = deserialize_spack(spack)?;
        let schemas = unpack_task_schemas(&packed)?;
        Ok(Self {
            header: Header::from_base(&base),
            schemas,
        })
    }
}

/// Encrypted metric report for one task.
///
/// The body names the task and carries the schema-directed metric bytes; the
/// receiver needs the matching task descriptor to decode them.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMetrics {
    /// Shared header fields.
    pub header: Header,
    /// Task the metric belongs to.
    pub task_id: String,
    /// The metric values.
    pub metric: TaskMetric,
}

impl SendMetrics {
    /// Wire type of this variant.
    pub const TYPE: DatagramType = DatagramType::SendMetrics;

    /// Create a metric report for an established session.
    pub fn new(session_id: SessionId, task_id: &str, metric: TaskMetric) -> Self {
        Self {
            header: Header::new(session_id),
            task_id: task_id.to_string(),
            metric,
        }
    }

    /// Serialize through the bound key-agreement session.
    ///
    /// The sender needs the task descriptor too; a task id missing from
    /// `tasks` is [`DatagramError::UnknownTask`].
    pub fn serialize(
        &self,
        ecdhe: &EcdheSession,
        tasks: &TaskRegistry,
    ) -> Result<Vec<u8>, DatagramError> {
        let descriptor = tasks
            .get(&self.task_id)
            .ok_or_else(|| DatagramError::UnknownTask(self.task_id.clone()))?;
        let spack = serialize_task_metric(&self.metric, descriptor)?;

        let mut body = ByteWriter::with_capacity(8 + self.task_id.len() + spack.len());
        body.write_block(self.task_id.as_bytes());
        body.write_block(&spack);
        serialize_encrypted(&self.header, Self::TYPE, &body.finish(), ecdhe)
    }

    /// Reconstruct from the opened envelope, positioned after the private
    /// header.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        base: DatagramBase,
        ecdhe: &EcdheSession,
        tasks: Option<&TaskRegistry>,
    ) -> Result<Self, DatagramError> {
        if base.private.datagram_type != Self::TYPE {
            return Err(DatagramError::WrongType {
                expected: Self::TYPE.as_u32(),
                actual: base.private.datagram_type.as_u32(),
            });
        }

        let body = open_inner(reader, ecdhe)?;
        let mut body_reader = ByteReader::new(&body);

        let task_id = std::str::from_utf8(body_reader.read_block()?)
            .map_err(|_| DatagramError::MalformedPayload("task id is not utf-8".into()))?
            .to_string();
        let spack = body_reader.read_block()?;
        if !body_reader.is_empty() {
            return Err(DatagramError::MalformedPayload(
                "trailing bytes after metric body".into(),
            ));
        }

        let descriptor = tasks
            .and_then(|registry| registry.get(&task_id))
            .ok_or_else(|| DatagramError::UnknownTask(task_id.clone()))?;
        let metric = deserialize_task_metric(spack, descriptor)?;

        Ok(Self {
            header: Header::from_base(&base),
            task_id,
            metric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CryptoError, HASH_LEN};
    use crate::datagram::Datagram;
    use crate::spack::{FieldType, Value};

    const PSK: &[u8] = b"test pre-shared secret";

    fn establish_pair() -> (EcdheSession, EcdheSession) {
        let mut agent = EcdheSession::new(PSK);
        let mut server = EcdheSession::new(PSK);

        let salt = [0x0Au8; 32];
        let challenge = [0x0Bu8; 32];
        let agent_pk = *agent.public_key();
        let server_pk = *server.public_key();
        agent
            .derive_shared_secret(&server_pk, &salt, &challenge)
            .unwrap();
        server
            .derive_shared_secret(&agent_pk, &salt, &challenge)
            .unwrap();
        (agent, server)
    }

    fn sid() -> SessionId {
        SessionId::from_bytes([0x42; HASH_LEN])
    }

    fn sample_schemas() -> BTreeMap<String, TaskSchema> {
        let mut schemas = BTreeMap::new();
        schemas.insert(
            "cpu".to_string(),
            TaskSchema::new()
                .with_field("usage", FieldType::F64)
                .with_field("ts", FieldType::U64),
        );
        schemas.insert(
            "mem".to_string(),
            TaskSchema::new().with_field("free_kb", FieldType::U64),
        );
        schemas
    }

    fn sample_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.extend(sample_schemas());
        registry
    }

    fn cpu_metric() -> TaskMetric {
        let mut metric = TaskMetric::new();
        metric.insert("usage".to_string(), Value::F64(0.42));
        metric.insert("ts".to_string(), Value::U64(1_700_000_000));
        metric
    }

    #[test]
    fn test_push_schemas_roundtrip() {
        let (agent, server) = establish_pair();

        let mut push = PushSchemas::new(sid(), sample_schemas());
        push.header.sequence = 5;

        let bytes = push.serialize(&agent).unwrap();
        match Datagram::deserialize(&bytes, Some(&server), None).unwrap() {
            Datagram::PushSchemas(parsed) => {
                assert_eq!(parsed.schemas, push.schemas);
                assert_eq!(parsed.header.sequence, 5);
                assert_eq!(parsed.header.session_id, sid());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_send_metrics_roundtrip() {
        let (agent, server) = establish_pair();
        let registry = sample_registry();

        let report = SendMetrics::new(sid(), "cpu", cpu_metric());
        let bytes = report.serialize(&agent, &registry).unwrap();

        match Datagram::deserialize(&bytes, Some(&server), Some(&registry)).unwrap() {
            Datagram::SendMetrics(parsed) => {
                assert_eq!(parsed.task_id, "cpu");
                assert_eq!(parsed.metric, cpu_metric());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_private_header_is_not_cleartext() {
        let (agent, _) = establish_pair();

        let push = PushSchemas::new(sid(), sample_schemas());
        let bytes = push.serialize(&agent).unwrap();

        // Nothing after the public header may look like a version-1 private
        // header; it is sealed inside the envelope.
        let tail = &bytes[crate::core::PUBLIC_HEADER_SIZE..];
        assert_ne!(&tail[..4], &1u32.to_be_bytes());
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let (agent, server) = establish_pair();

        let push = PushSchemas::new(sid(), sample_schemas());
        let mut bytes = push.serialize(&agent).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(matches!(
            Datagram::deserialize(&bytes, Some(&server), None),
            Err(DatagramError::CryptoFailure(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn test_wrong_session_keys_fail() {
        let (agent, _) = establish_pair();
        let (_, stranger) = establish_pair();

        let push = PushSchemas::new(sid(), sample_schemas());
        let bytes = push.serialize(&agent).unwrap();

        assert!(matches!(
            Datagram::deserialize(&bytes, Some(&stranger), None),
            Err(DatagramError::CryptoFailure(CryptoError::DecryptionFailed))
        ));
    }

    #[test]
    fn test_unknown_task_on_decode() {
        let (agent, server) = establish_pair();
        let registry = sample_registry();

        let report = SendMetrics::new(sid(), "cpu", cpu_metric());
        let bytes = report.serialize(&agent, &registry).unwrap();

        // Receiver without any task configuration.
        assert!(matches!(
            Datagram::deserialize(&bytes, Some(&server), None),
            Err(DatagramError::UnknownTask(task)) if task == "cpu"
        ));

        // Receiver with a configuration that misses the task.
        let mut other = TaskRegistry::new();
        other.insert("disk", TaskSchema::new().with_field("io", FieldType::U64));
        assert!(matches!(
            Datagram::deserialize(&bytes, Some(&server), Some(&other)),
            Err(DatagramError::UnknownTask(task)) if task == "cpu"
        ));
    }

    #[test]
    fn test_unknown_task_on_encode() {
        let (agent, _) = establish_pair();

        let report = SendMetrics::new(sid(), "disk", TaskMetric::new());
        assert!(matches!(
            report.serialize(&agent, &sample_registry()),
            Err(DatagramError::UnknownTask(task)) if task == "disk"
        ));
    }

    #[test]
    fn test_not_linked_without_session() {
        let (agent, _) = establish_pair();

        let push = PushSchemas::new(sid(), sample_schemas());
        let bytes = push.serialize(&agent).unwrap();

        assert!(matches!(
            Datagram::deserialize(&bytes, None, None),
            Err(DatagramError::NotLinked)
        ));
    }

    #[test]
    fn test_not_linked_before_derivation() {
        let fresh = EcdheSession::new(PSK);

        let push = PushSchemas::new(sid(), sample_schemas());
        assert!(matches!(
            push.serialize(&fresh),
            Err(DatagramError::NotLinked)
        ));
    }

    #[test]
    fn test_empty_schema_map_roundtrip() {
        let (agent, server) = establish_pair();

        let push = PushSchemas::new(sid(), BTreeMap::new());
        let bytes = push.serialize(&agent).unwrap();

        match Datagram::deserialize(&bytes, Some(&server), None).unwrap() {
            Datagram::PushSchemas(parsed) => assert!(parsed.schemas.is_empty()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
