use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed read half of a connected stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a connected stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which side of a connection this process is.
///
/// The role is fixed by the bootstrap (the spawning parent is the
/// initiator, the spawned child the acceptor) and decides which half of
/// the channel id space this side allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    /// The role of the other endpoint.
    pub fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Acceptor,
            Role::Acceptor => Role::Initiator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Acceptor => "acceptor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two halves of one connected duplex byte stream.
///
/// The halves may come from a single socket or from two unrelated pipes;
/// the connection layer only needs bytes in and bytes out.
pub struct StreamPair {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl StreamPair {
    /// Pair up an independent reader and writer.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a single bidirectional stream into halves.
    pub fn from_duplex<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    /// Two connected in-memory endpoints, each buffering up to `capacity`
    /// bytes in flight per direction.
    pub fn memory_pair(capacity: usize) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(capacity);
        (Self::from_duplex(left), Self::from_duplex(right))
    }

    /// Consume the pair and return `(reader, writer)`.
    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPair").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn peer_role_is_opposite() {
        assert_eq!(Role::Initiator.peer(), Role::Acceptor);
        assert_eq!(Role::Acceptor.peer(), Role::Initiator);
        assert_eq!(Role::Acceptor.to_string(), "acceptor");
    }

    #[tokio::test]
    async fn memory_pair_carries_bytes_both_ways() {
        let (left, right) = StreamPair::memory_pair(64);
        let (mut left_rx, mut left_tx) = left.into_parts();
        let (mut right_rx, mut right_tx) = right.into_parts();

        left_tx.write_all(b"ping").await.unwrap();
        right_tx.write_all(b"pong").await.unwrap();

        let mut buf = [0u8; 4];
        right_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        left_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn dropped_writer_reads_as_eof() {
        let (left, right) = StreamPair::memory_pair(64);
        drop(left);
        let (mut reader, _writer) = right.into_parts();
        let mut buf = Vec::new();
        let n = reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
