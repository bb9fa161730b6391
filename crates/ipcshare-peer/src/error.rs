use ipcshare_codec::Fault;

/// Errors that can occur in connection and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipcshare_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ipcshare_frame::FrameError),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ipcshare_codec::CodecError),

    /// The other side raised a fault.
    #[error("remote fault: {0}")]
    Remote(Fault),

    /// Local hosting failed, e.g. no constructor matched.
    #[error("host fault: {0}")]
    Host(Fault),

    /// The channel was disposed while the call was outstanding.
    #[error("call cancelled")]
    Cancelled,

    /// The channel or connection has been disposed.
    #[error("disposed")]
    Disposed,

    /// A caller passed something the protocol cannot carry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The channel is not in a state that allows the operation.
    #[error("channel {channel} is {state}")]
    InvalidState {
        channel: i64,
        state: crate::channel::ChannelState,
    },

    /// The remote handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl PeerError {
    /// The fault carried by a remote or host failure.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            PeerError::Remote(fault) | PeerError::Host(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
