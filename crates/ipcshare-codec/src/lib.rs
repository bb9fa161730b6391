//! Self-describing binary encoding for values passed between peers.
//!
//! Every value starts with a one-byte [`Tag`]; a decoder needs nothing but
//! the byte stream to rebuild it. Types are written as a one-byte shorthand
//! for common types or as a name. Names are never resolved to code here:
//! they come back as [`TypeRef::Named`] inside [`Value::Record`] or
//! [`Value::Enum`], and only the [`TypeRegistry`] supplied by the embedding
//! program influences layout.
//!
//! Objects that are shared rather than copied are written as the id of the
//! channel that carries them, resolved through [`ResolveProxyIds`].

pub mod decode;
pub mod encode;
pub mod error;
pub mod fault;
pub mod limits;
pub mod record;
pub mod registry;
pub mod resolve;
pub mod tag;
pub mod types;
pub mod value;

pub use decode::{Decoder, SliceSource, Source};
pub use encode::{put_string, put_tagged_type, put_type, put_varint, Encoder};
pub use error::{CodecError, Result};
pub use fault::Fault;
pub use limits::Limits;
pub use record::{Field, Record, Serializable};
pub use registry::{ElementShape, TypeRegistry};
pub use resolve::{NoProxies, ResolveProxyIds};
pub use tag::Tag;
pub use types::{Form, KnownType, Scalar, TypeRef};
pub use value::{
    Array, DateTime, DateTimeKind, Decimal, Dimension, FromValue, Guid, Instance, TimeSpan, Value,
    TICKS_PER_SECOND,
};
