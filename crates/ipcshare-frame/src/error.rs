/// Errors that can occur during framing, frame I/O and buffered reads.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A frame header declared a negative payload length.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// A data frame was requested with no payload (reserved for close).
    #[error("empty payload on channel {0} (zero length is the close signal)")]
    EmptyPayload(i64),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A read was requested while another read on the same buffer is outstanding.
    #[error("a read operation is already in progress")]
    ReadInProgress,

    /// The outstanding read was cancelled because its buffer was disposed.
    #[error("read cancelled")]
    Cancelled,

    /// The buffer has been disposed.
    #[error("stream buffer disposed")]
    Disposed,

    /// Every channel id in this side's half of the id space is in use.
    #[error("channel id space exhausted")]
    IdSpaceExhausted,
}

pub type Result<T> = std::result::Result<T, FrameError>;
