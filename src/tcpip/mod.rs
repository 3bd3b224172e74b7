//! Binary wire protocol: exact-length transport plus the type-tagged codec.
//!
//! The protocol carries no message boundaries beyond each primitive's own length
//! prefixes, so sender and receiver must agree on the order of decode calls.

pub mod deserializer;
pub mod serializer;
pub mod socket;

pub use deserializer::DeSerializer;
pub use serializer::{Serializer, Value};
pub use socket::{AsyncSocket, ByteSink, ByteSource, Socket, SocketString, DEFAULT_CHUNK_SIZE};
