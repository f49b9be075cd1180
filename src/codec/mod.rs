//! Positional big-endian byte codec.
//!
//! Every multi-byte integer on the NetTask wire is network byte order, and
//! every variable-length field is prefixed by a u32 length. [`ByteReader`]
//! and [`ByteWriter`] are the only pieces of the crate that touch raw
//! offsets; everything above them works in whole fields.

mod reader;
mod writer;

pub use reader::ByteReader;
pub use writer::ByteWriter;
