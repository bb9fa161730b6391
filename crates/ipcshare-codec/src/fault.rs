//! Failures that travel to the other side as values.

use crate::error::CodecError;
use crate::record::Record;
use crate::types::TypeRef;
use crate::value::Value;

/// An error raised on one side of a connection and re-raised on the other.
///
/// `kind` is the error's type name; it is sent as the record type, so a
/// receiver can match on it without knowing the sender's Rust types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: String,
    pub message: String,
}

impl Fault {
    /// No method or constructor matches the name and arguments.
    pub const ARGUMENT_ERROR: &'static str = "ArgumentError";
    /// The call is not valid in the receiver's current state.
    pub const INVALID_OPERATION: &'static str = "InvalidOperation";
    /// A reply could not be encoded.
    pub const SERIALIZATION_ERROR: &'static str = "SerializationError";
    /// The hosted method panicked.
    pub const METHOD_PANICKED: &'static str = "MethodPanicked";

    const MESSAGE_FIELD: &'static str = "message";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(Self::ARGUMENT_ERROR, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_OPERATION, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(Self::SERIALIZATION_ERROR, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(Self::METHOD_PANICKED, message)
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::named(&self.kind)
    }

    pub fn to_value(&self) -> Value {
        Value::Record(
            Record::new(self.type_ref()).with(Self::MESSAGE_FIELD, self.message.as_str()),
        )
    }

    /// Rebuild a fault from the `(type, value)` pair of a failure reply.
    ///
    /// Anything other than a record with a `message` string still yields a
    /// fault of the declared type, so a malformed reply is never lost.
    pub fn from_wire(ty: &TypeRef, value: Value) -> Self {
        match value {
            Value::Record(record) => {
                let message = record
                    .get(Self::MESSAGE_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::new(record.ty.to_string(), message)
            }
            Value::String(message) => Self::new(ty.to_string(), message),
            Value::Null => Self::new(ty.to_string(), ""),
            other => Self::new(ty.to_string(), other.describe()),
        }
    }
}

impl From<CodecError> for Fault {
    fn from(err: CodecError) -> Self {
        Fault::serialization(err.to_string())
    }
}
