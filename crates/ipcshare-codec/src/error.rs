/// Errors raised while encoding or decoding tagged values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A value started with a byte that is not a known tag.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    /// A type reference used a shorthand code outside the table.
    #[error("unknown type code {0}")]
    UnknownTypeCode(u8),

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 in string")]
    InvalidString,

    /// A char was not a single valid UTF-8 scalar.
    #[error("invalid char encoding")]
    InvalidChar,

    /// A length prefix was negative or malformed.
    #[error("invalid length {0}")]
    InvalidLength(i64),

    /// A declared length exceeds the configured limit.
    #[error("{what} too large ({size}, max {max})")]
    LimitExceeded {
        what: &'static str,
        size: usize,
        max: usize,
    },

    /// Values nest deeper than the configured limit.
    #[error("value nesting exceeds depth {0}")]
    DepthExceeded(usize),

    /// An enum carried a non-integral underlying value.
    #[error("enum {0} has a non-integral value")]
    InvalidEnum(String),

    #[error("invalid date/time kind {0}")]
    InvalidDateTimeKind(u8),

    /// An array item does not fit the array's element type.
    #[error("array element of type {found} does not fit element type {element}")]
    ShapeMismatch { element: String, found: String },

    /// A shared instance has no channel on this connection.
    #[error("instance is not shared over this connection")]
    UnsharedInstance,

    /// A value was converted to a Rust type it does not hold.
    #[error("expected {expected}, found {found}")]
    UnexpectedValue { expected: &'static str, found: String },

    /// A record lacks a field its Rust type requires.
    #[error("record {ty} has no field {field}")]
    MissingField { ty: String, field: String },

    /// The input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The byte source failed.
    #[error("source error: {0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

impl CodecError {
    pub fn source_error(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        CodecError::Source(Box::new(err))
    }

    /// Whether the underlying error came from the byte source rather than
    /// from malformed data.
    pub fn is_source(&self) -> bool {
        matches!(self, CodecError::Source(_) | CodecError::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
