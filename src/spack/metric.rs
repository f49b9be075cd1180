//! Schema-directed metric packing.
//!
//! Metric bodies are not self-describing: fields are written in schema
//! order with no tags, so the receiver needs the matching task descriptor
//! to interpret them. That is what makes an unknown task id fatal for a
//! metric frame.

use std::collections::BTreeMap;

use crate::codec::{ByteReader, ByteWriter};
use crate::core::SpackError;

use super::{FieldType, TaskSchema, Value};

/// One metric report: field name to value.
pub type TaskMetric = BTreeMap<String, Value>;

/// Serialize a metric against its task descriptor.
///
/// Fields are emitted in schema order. A metric that misses a schema field,
/// carries an extra one, or holds a value of the wrong kind is rejected.
pub fn serialize_task_metric(
    metric: &TaskMetric,
    descriptor: &TaskSchema,
) -> Result<Vec<u8>, SpackError> {
    if let Some(extra) = metric.keys().find(|name| descriptor.field(name).is_none()) {
        return Err(SpackError::UnexpectedField(extra.clone()));
    }

    let mut writer = ByteWriter::new();
    for (name, field_type) in descriptor.fields() {
        let value = metric
            .get(name)
            .ok_or_else(|| SpackError::MissingField(name.to_string()))?;
        encode_field(&mut writer, name, field_type, value)?;
    }
    Ok(writer.finish())
}

/// Deserialize a metric against its task descriptor.
pub fn deserialize_task_metric(
    bytes: &[u8],
    descriptor: &TaskSchema,
) -> Result<TaskMetric, SpackError> {
    let mut reader = ByteReader::new(bytes);

    let mut metric = TaskMetric::new();
    for (name, field_type) in descriptor.fields() {
        metric.insert(name.to_string(), decode_field(&mut reader, field_type)?);
    }

    if !reader.is_empty() {
        return Err(SpackError::TrailingBytes(reader.remaining()));
    }
    Ok(metric)
}

fn encode_field(
    writer: &mut ByteWriter,
    name: &str,
    field_type: FieldType,
    value: &Value,
) -> Result<(), SpackError> {
    let mismatch = || SpackError::TypeMismatch {
        field: name.to_string(),
        expected: field_type.name(),
    };

    match (field_type, value) {
        (FieldType::Bool, Value::Bool(v)) => writer.write_u8(u8::from(*v)),
        (FieldType::U8, Value::U8(v)) => writer.write_u8(*v),
        (FieldType::U16, Value::U16(v)) => writer.write_u16(*v),
        (FieldType::U32, Value::U32(v)) => writer.write_u32(*v),
        (FieldType::U64, Value::U64(v)) => writer.write_u64(*v),
        (FieldType::I64, Value::I64(v)) => writer.write_bytes(&v.to_be_bytes()),
        (FieldType::F64, Value::F64(v)) => writer.write_u64(v.to_bits()),
        (FieldType::String, Value::String(v)) => writer.write_block(v.as_bytes()),
        (FieldType::Bytes, Value::Bytes(v)) => writer.write_block(v),
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn decode_field(reader: &mut ByteReader<'_>, field_type: FieldType) -> Result<Value, SpackError> {
    Ok(match field_type {
        FieldType::Bool => Value::Bool(reader.read_u8()? != 0),
        FieldType::U8 => Value::U8(reader.read_u8()?),
        FieldType::U16 => Value::U16(reader.read_u16()?),
        FieldType::U32 => Value::U32(reader.read_u32()?),
        FieldType::U64 => Value::U64(reader.read_u64()?),
        FieldType::I64 => Value::I64(i64::from_be_bytes(reader.read_array()?)),
        FieldType::F64 => Value::F64(f64::from_bits(reader.read_u64()?)),
        FieldType::String => {
            let bytes = reader.read_block()?;
            Value::String(
                std::str::from_utf8(bytes)
                    .map_err(|_| SpackError::InvalidUtf8)?
                    .to_string(),
            )
        }
        FieldType::Bytes => Value::Bytes(reader.read_block()?.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_schema() -> TaskSchema {
        TaskSchema::new()
            .with_field("usage", FieldType::F64)
            .with_field("ts", FieldType::U64)
    }

    fn cpu_metric() -> TaskMetric {
        let mut metric = TaskMetric::new();
        metric.insert("usage".to_string(), Value::F64(0.42));
        metric.insert("ts".to_string(), Value::U64(1_700_000_000));
        metric
    }

    #[test]
    fn test_metric_roundtrip() {
        let schema = cpu_schema();
        let metric = cpu_metric();

        let bytes = serialize_task_metric(&metric, &schema).unwrap();
        assert_eq!(deserialize_task_metric(&bytes, &schema).unwrap(), metric);
    }

    #[test]
    fn test_metric_all_field_types() {
        let schema = TaskSchema::new()
            .with_field("up", FieldType::Bool)
            .with_field("cores", FieldType::U8)
            .with_field("port", FieldType::U16)
            .with_field("pid", FieldType::U32)
            .with_field("bytes", FieldType::U64)
            .with_field("delta", FieldType::I64)
            .with_field("load", FieldType::F64)
            .with_field("host", FieldType::String)
            .with_field("raw", FieldType::Bytes);

        let mut metric = TaskMetric::new();
        metric.insert("up".to_string(), Value::Bool(true));
        metric.insert("cores".to_string(), Value::U8(8));
        metric.insert("port".to_string(), Value::U16(9100));
        metric.insert("pid".to_string(), Value::U32(4242));
        metric.insert("bytes".to_string(), Value::U64(1 << 40));
        metric.insert("delta".to_string(), Value::I64(-17));
        metric.insert("load".to_string(), Value::F64(1.5));
        metric.insert("host".to_string(), Value::String("node-1".into()));
        metric.insert("raw".to_string(), Value::Bytes(vec![0xDE, 0xAD]));

        let bytes = serialize_task_metric(&metric, &schema).unwrap();
        assert_eq!(deserialize_task_metric(&bytes, &schema).unwrap(), metric);
    }

    #[test]
    fn test_metric_is_untagged() {
        // f64 + u64, schema-directed: exactly 16 bytes, no tags.
        let bytes = serialize_task_metric(&cpu_metric(), &cpu_schema()).unwrap();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn test_missing_field() {
        let mut metric = cpu_metric();
        metric.remove("ts");
        assert!(matches!(
            serialize_task_metric(&metric, &cpu_schema()),
            Err(SpackError::MissingField(name)) if name == "ts"
        ));
    }

    #[test]
    fn test_unexpected_field() {
        let mut metric = cpu_metric();
        metric.insert("extra".to_string(), Value::Null);
        assert!(matches!(
            serialize_task_metric(&metric, &cpu_schema()),
            Err(SpackError::UnexpectedField(name)) if name == "extra"
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut metric = cpu_metric();
        metric.insert("usage".to_string(), Value::String("high".into()));
        assert!(matches!(
            serialize_task_metric(&metric, &cpu_schema()),
            Err(SpackError::TypeMismatch { field, expected: "f64" }) if field == "usage"
        ));
    }

    #[test]
    fn test_decode_against_wrong_schema_fails() {
        let bytes = serialize_task_metric(&cpu_metric(), &cpu_schema()).unwrap();

        // A longer schema runs out of input; a shorter one leaves trailing bytes.
        let longer = cpu_schema().with_field("zz", FieldType::U64);
        assert!(matches!(
            deserialize_task_metric(&bytes, &longer),
            Err(SpackError::UnexpectedEof)
        ));

        let shorter = TaskSchema::new().with_field("ts", FieldType::U64);
        assert!(matches!(
            deserialize_task_metric(&bytes, &shorter),
            Err(SpackError::TrailingBytes(_))
        ));
    }
}
