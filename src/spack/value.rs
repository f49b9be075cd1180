//! Self-describing SPACK values.
//!
//! Wire format: one tag byte per value, big-endian integers, u32 length
//! prefixes on strings, byte strings, and containers.

use std::collections::BTreeMap;

use crate::codec::{ByteReader, ByteWriter};
use crate::core::SpackError;

/// Tag byte identifiers for each value kind.
mod tag {
    pub const NULL: u8 = 0x00;
    pub const FALSE: u8 = 0x01;
    pub const TRUE: u8 = 0x02;
    pub const U8: u8 = 0x03;
    pub const U16: u8 = 0x04;
    pub const U32: u8 = 0x05;
    pub const U64: u8 = 0x06;
    pub const I64: u8 = 0x07;
    pub const F64: u8 = 0x08;
    pub const STRING: u8 = 0x09;
    pub const BYTES: u8 = 0x0A;
    pub const ARRAY: u8 = 0x0B;
    pub const MAP: u8 = 0x0C;
}

/// Maximum container nesting accepted by the decoder.
const MAX_NESTING: usize = 64;

/// A SPACK value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Signed 64-bit integer.
    I64(i64),
    /// IEEE-754 double.
    F64(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque byte string.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed map, entries sorted by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow the map entries if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Borrow the string if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Serialize a value to its SPACK byte form.
pub fn serialize_spack(value: &Value) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    encode_value(&mut writer, value);
    writer.finish()
}

/// Deserialize a single value from SPACK bytes.
///
/// The input must hold exactly one value; leftovers are
/// [`SpackError::TrailingBytes`].
pub fn deserialize_spack(bytes: &[u8]) -> Result<Value, SpackError> {
    let mut reader = ByteReader::new(bytes);
    let value = decode_value(&mut reader, 0)?;
    if !reader.is_empty() {
        return Err(SpackError::TrailingBytes(reader.remaining()));
    }
    Ok(value)
}

fn encode_value(writer: &mut ByteWriter, value: &Value) {
    match value {
        Value::Null => writer.write_u8(tag::NULL),
        Value::Bool(false) => writer.write_u8(tag::FALSE),
        Value::Bool(true) => writer.write_u8(tag::TRUE),
        Value::U8(v) => {
            writer.write_u8(tag::U8);
            writer.write_u8(*v);
        }
        Value::U16(v) => {
            writer.write_u8(tag::U16);
            writer.write_u16(*v);
        }
        Value::U32(v) => {
            writer.write_u8(tag::U32);
            writer.write_u32(*v);
        }
        Value::U64(v) => {
            writer.write_u8(tag::U64);
            writer.write_u64(*v);
        }
        Value::I64(v) => {
            writer.write_u8(tag::I64);
            writer.write_bytes(&v.to_be_bytes());
        }
        Value::F64(v) => {
            writer.write_u8(tag::F64);
            writer.write_u64(v.to_bits());
        }
        Value::String(v) => {
            writer.write_u8(tag::STRING);
            writer.write_block(v.as_bytes());
        }
        Value::Bytes(v) => {
            writer.write_u8(tag::BYTES);
            writer.write_block(v);
        }
        Value::Array(items) => {
            writer.write_u8(tag::ARRAY);
            writer.write_u32(items.len() as u32);
            for item in items {
                encode_value(writer, item);
            }
        }
        Value::Map(entries) => {
            writer.write_u8(tag::MAP);
            writer.write_u32(entries.len() as u32);
            for (key, item) in entries {
                writer.write_block(key.as_bytes());
                encode_value(writer, item);
            }
        }
    }
}

fn decode_value(reader: &mut ByteReader<'_>, depth: usize) -> Result<Value, SpackError> {
    if depth > MAX_NESTING {
        return Err(SpackError::NestingTooDeep);
    }

    let tag_byte = reader.read_u8()?;
    match tag_byte {
        tag::NULL => Ok(Value::Null),
        tag::FALSE => Ok(Value::Bool(false)),
        tag::TRUE => Ok(Value::Bool(true)),
        tag::U8 => Ok(Value::U8(reader.read_u8()?)),
        tag::U16 => Ok(Value::U16(reader.read_u16()?)),
        tag::U32 => Ok(Value::U32(reader.read_u32()?)),
        tag::U64 => Ok(Value::U64(reader.read_u64()?)),
        tag::I64 => Ok(Value::I64(i64::from_be_bytes(reader.read_array()?))),
        tag::F64 => Ok(Value::F64(f64::from_bits(reader.read_u64()?))),
        tag::STRING => {
            let bytes = reader.read_block()?;
            let s = std::str::from_utf8(bytes).map_err(|_| SpackError::InvalidUtf8)?;
            Ok(Value::String(s.to_string()))
        }
        tag::BYTES => Ok(Value::Bytes(reader.read_block()?.to_vec())),
        tag::ARRAY => {
            let count = reader.read_u32()? as usize;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(decode_value(reader, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        tag::MAP => {
            let count = reader.read_u32()? as usize;
            let mut entries = BTreeMap::new();
            for _ in 0..count {
                let key_bytes = reader.read_block()?;
                let key = std::str::from_utf8(key_bytes)
                    .map_err(|_| SpackError::InvalidUtf8)?
                    .to_string();
                entries.insert(key, decode_value(reader, depth + 1)?);
            }
            Ok(Value::Map(entries))
        }
        other => Err(SpackError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let bytes = serialize_spack(&value);
        assert_eq!(deserialize_spack(&bytes).unwrap(), value);
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::U8(0xFF));
        roundtrip(Value::U16(0xBEEF));
        roundtrip(Value::U32(1_700_000_000));
        roundtrip(Value::U64(u64::MAX));
        roundtrip(Value::I64(-42));
        roundtrip(Value::F64(0.42));
        roundtrip(Value::String("cpu".into()));
        roundtrip(Value::Bytes(vec![0x00, 0x01, 0x02]));
    }

    #[test]
    fn test_container_roundtrips() {
        roundtrip(Value::Array(vec![
            Value::U32(1),
            Value::String("two".into()),
            Value::Array(vec![Value::Null]),
        ]));

        let mut inner = BTreeMap::new();
        inner.insert("usage".to_string(), Value::F64(0.42));
        inner.insert("ts".to_string(), Value::U64(1_700_000_000));
        let mut outer = BTreeMap::new();
        outer.insert("cpu".to_string(), Value::Map(inner));
        roundtrip(Value::Map(outer));
    }

    #[test]
    fn test_string_big_endian_length() {
        let bytes = serialize_spack(&Value::String("ab".into()));
        assert_eq!(bytes, vec![0x09, 0x00, 0x00, 0x00, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            deserialize_spack(&[0x7F]),
            Err(SpackError::UnknownTag(0x7F))
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = serialize_spack(&Value::Null);
        bytes.push(0x00);
        assert!(matches!(
            deserialize_spack(&bytes),
            Err(SpackError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncated_value() {
        let bytes = serialize_spack(&Value::U64(7));
        assert!(matches!(
            deserialize_spack(&bytes[..bytes.len() - 2]),
            Err(SpackError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_invalid_utf8_string() {
        let bytes = vec![0x09, 0x00, 0x00, 0x00, 0x02, 0xFF, 0xFE];
        assert!(matches!(
            deserialize_spack(&bytes),
            Err(SpackError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut value = Value::Null;
        for _ in 0..100 {
            value = Value::Array(vec![value]);
        }
        let bytes = serialize_spack(&value);
        assert!(matches!(
            deserialize_spack(&bytes),
            Err(SpackError::NestingTooDeep)
        ));
    }
}
