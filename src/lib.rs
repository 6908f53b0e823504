//! Protobuf-style schema resolution, per-field wire codec planning and
//! message codec assembly, with a runtime that executes the assembled
//! procedures.
//!
//! Pipeline: [`raw::RawSchema`] → [`resolve::resolve`] → [`schema::Schema`]
//! → [`plan::plan`] per field → [`assemble`] per message →
//! [`codec::SchemaCodec`].
pub mod assemble;
pub mod cli;
pub mod codec;
pub mod error;
pub mod path_de;
pub mod plan;
pub mod raw;
pub mod resolve;
pub mod schema;
pub mod value;
pub mod wire;

pub use assemble::FramingMode;
pub use codec::SchemaCodec;
pub use error::{DecodeError, EncodeError, ResolveError};
pub use raw::RawSchema;
pub use resolve::resolve;
pub use schema::{MessageId, Schema};
pub use value::{MessageValue, Value};
