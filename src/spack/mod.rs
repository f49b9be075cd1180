//! SPACK: the self-describing binary object format carried by encrypted
//! datagrams.
//!
//! Three layers:
//! - [`Value`] and its codec ([`serialize_spack`] / [`deserialize_spack`]),
//! - task schemas and their packed collection form
//!   ([`pack_task_schemas`] / [`unpack_task_schemas`]),
//! - schema-directed metric packing
//!   ([`serialize_task_metric`] / [`deserialize_task_metric`]).

mod metric;
mod schema;
mod value;

pub use metric::{TaskMetric, deserialize_task_metric, serialize_task_metric};
pub use schema::{
    FieldType, TaskRegistry, TaskSchema, is_spack_task_collection, pack_task_schemas,
    unpack_task_schemas,
};
pub use value::{Value, deserialize_spack, serialize_spack};
