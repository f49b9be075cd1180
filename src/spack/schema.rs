//! Task schemas and their packed SPACK form.
//!
//! A task schema names the fields a metric report carries and their types.
//! Schemas travel in `PushSchemas` datagrams as a packed collection: a map
//! from task name to a map from field name to a `U8` type code.

use std::collections::BTreeMap;

use crate::core::SpackError;

use super::Value;

/// The type of a single metric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// Boolean.
    Bool = 0x01,
    /// Unsigned 8-bit integer.
    U8 = 0x02,
    /// Unsigned 16-bit integer.
    U16 = 0x03,
    /// Unsigned 32-bit integer.
    U32 = 0x04,
    /// Unsigned 64-bit integer.
    U64 = 0x05,
    /// Signed 64-bit integer.
    I64 = 0x06,
    /// IEEE-754 double.
    F64 = 0x07,
    /// UTF-8 string.
    String = 0x08,
    /// Opaque byte string.
    Bytes = 0x09,
}

impl FieldType {
    /// Parse a field type from its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Bool),
            0x02 => Some(Self::U8),
            0x03 => Some(Self::U16),
            0x04 => Some(Self::U32),
            0x05 => Some(Self::U64),
            0x06 => Some(Self::I64),
            0x07 => Some(Self::F64),
            0x08 => Some(Self::String),
            0x09 => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Convert to the wire code.
    pub fn as_code(self) -> u8 {
        self as u8
    }

    /// Human-readable type name, used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }
}

/// The field layout of one task's metric reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSchema {
    fields: BTreeMap<String, FieldType>,
}

impl TaskSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder-style.
    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(name.to_string(), field_type);
        self
    }

    /// Look up one field's type.
    pub fn field(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    /// Iterate fields in wire order (sorted by name).
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Pack a task-schema map into its SPACK collection form.
pub fn pack_task_schemas(schemas: &BTreeMap<String, TaskSchema>) -> Value {
    let mut tasks = BTreeMap::new();
    for (task_name, schema) in schemas {
        let mut fields = BTreeMap::new();
        for (field_name, field_type) in schema.fields() {
            fields.insert(field_name.to_string(), Value::U8(field_type.as_code()));
        }
        tasks.insert(task_name.clone(), Value::Map(fields));
    }
    Value::Map(tasks)
}

/// Unpack a SPACK collection back into a task-schema map.
pub fn unpack_task_schemas(packed: &Value) -> Result<BTreeMap<String, TaskSchema>, SpackError> {
    let tasks = packed.as_map().ok_or(SpackError::NotATaskCollection)?;

    let mut schemas = BTreeMap::new();
    for (task_name, fields_value) in tasks {
        let fields = fields_value.as_map().ok_or(SpackError::NotATaskCollection)?;

        let mut schema = TaskSchema::new();
        for (field_name, code_value) in fields {
            let code = match code_value {
                Value::U8(code) => *code,
                _ => return Err(SpackError::NotATaskCollection),
            };
            let field_type =
                FieldType::from_code(code).ok_or(SpackError::UnknownFieldType(code))?;
            schema = schema.with_field(field_name, field_type);
        }
        schemas.insert(task_name.clone(), schema);
    }
    Ok(schemas)
}

/// Check whether a value has the shape of a packed task-schema collection.
pub fn is_spack_task_collection(value: &Value) -> bool {
    let Some(tasks) = value.as_map() else {
        return false;
    };
    tasks.values().all(|fields_value| {
        fields_value.as_map().is_some_and(|fields| {
            fields.values().all(|code| {
                matches!(code, Value::U8(code) if FieldType::from_code(*code).is_some())
            })
        })
    })
}

/// The task configuration a receiver holds, keyed by task name.
///
/// Metric decoding looks the task id up here; ids that miss are reported as
/// unknown tasks by the datagram layer.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskSchema>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one task's schema.
    pub fn insert(&mut self, task_id: &str, schema: TaskSchema) {
        self.tasks.insert(task_id.to_string(), schema);
    }

    /// Merge a whole schema map, replacing existing entries.
    pub fn extend(&mut self, schemas: BTreeMap<String, TaskSchema>) {
        self.tasks.extend(schemas);
    }

    /// Look up a task's schema.
    pub fn get(&self, task_id: &str) -> Option<&TaskSchema> {
        self.tasks.get(task_id)
    }

    /// Check whether a task is known.
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Iterate known task names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Number of known tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check whether no tasks are known.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spack::{deserialize_spack, serialize_spack};

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
            TaskSchema::new()
                .with_field("free_kb", FieldType::U64)
                .with_field("swapping", FieldType::Bool),
        );
        schemas
    }

    #[test]
    fn test_field_type_codes_roundtrip() {
        for ty in [
            FieldType::Bool,
            FieldType::U8,
            FieldType::U16,
            FieldType::U32,
            FieldType::U64,
            FieldType::I64,
            FieldType::F64,
            FieldType::String,
            FieldType::Bytes,
        ] {
            assert_eq!(FieldType::from_code(ty.as_code()), Some(ty));
        }
        assert_eq!(FieldType::from_code(0x00), None);
        assert_eq!(FieldType::from_code(0xFF), None);
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let schemas = sample_schemas();
        let packed = pack_task_schemas(&schemas);
        assert!(is_spack_task_collection(&packed));

        let unpacked = unpack_task_schemas(&packed).unwrap();
        assert_eq!(unpacked, schemas);
    }

    #[test]
    fn test_pack_survives_spack_codec() {
        let schemas = sample_schemas();
        let bytes = serialize_spack(&pack_task_schemas(&schemas));
        let value = deserialize_spack(&bytes).unwrap();
        assert_eq!(unpack_task_schemas(&value).unwrap(), schemas);
    }

    #[test]
    fn test_not_a_collection() {
        assert!(!is_spack_task_collection(&Value::U32(1)));
        assert!(matches!(
            unpack_task_schemas(&Value::Null),
            Err(SpackError::NotATaskCollection)
        ));

        // A map of non-map entries is not a collection either.
        let mut tasks = BTreeMap::new();
        tasks.insert("cpu".to_string(), Value::U8(1));
        let value = Value::Map(tasks);
        assert!(!is_spack_task_collection(&value));
        assert!(unpack_task_schemas(&value).is_err());
    }

    #[test]
    fn test_unknown_field_type_code() {
        let mut fields = BTreeMap::new();
        fields.insert("usage".to_string(), Value::U8(0x7F));
        let mut tasks = BTreeMap::new();
        tasks.insert("cpu".to_string(), Value::Map(fields));

        assert!(matches!(
            unpack_task_schemas(&Value::Map(tasks)),
            Err(SpackError::UnknownFieldType(0x7F))
        ));
    }

    #[test]
    fn test_registry() {
        let mut registry = TaskRegistry::new();
        assert!(registry.is_empty());

        registry.extend(sample_schemas());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("cpu"));
        assert!(!registry.contains("disk"));
        assert_eq!(registry.get("mem").unwrap().field("swapping"), Some(FieldType::Bool));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["cpu", "mem"]);
    }
}
