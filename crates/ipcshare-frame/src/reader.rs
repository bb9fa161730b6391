use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer::StreamBuffer;
use crate::codec::{Frame, FrameConfig, FrameHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

const DISCARD_CHUNK_SIZE: usize = 8 * 1024;

/// Reads frames from the read half of a connection.
///
/// Headers and bodies are read separately so a body can be streamed
/// straight into a channel's [`StreamBuffer`] without an intermediate copy.
/// Callers must consume each body (fill, discard or read) before asking for
/// the next header.
pub struct FrameReader<R> {
    inner: R,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next 12-byte header in full.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends,
    /// whether cleanly between frames or part-way through a header.
    pub async fn read_header(&mut self) -> Result<FrameHeader> {
        let mut raw = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut raw[filled..]).await?;
            if n == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            filled += n;
        }
        let header = FrameHeader::decode(&raw);
        header.payload_len(self.config.max_payload_size)?;
        Ok(header)
    }

    /// Stream the next `len` body bytes into `buffer`.
    pub async fn fill(&mut self, buffer: &StreamBuffer, len: usize) -> Result<()> {
        buffer.fill(&mut self.inner, len).await
    }

    /// Skip the next `len` body bytes.
    pub async fn discard(&mut self, len: usize) -> Result<()> {
        let mut scratch = vec![0u8; len.min(DISCARD_CHUNK_SIZE)];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            let n = self.inner.read(&mut scratch[..take]).await?;
            if n == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            remaining -= n;
        }
        Ok(())
    }

    /// Read the next `len` body bytes into memory.
    pub async fn read_payload(&mut self, len: usize) -> Result<Bytes> {
        let mut payload = BytesMut::zeroed(len);
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })?;
        Ok(payload.freeze())
    }

    /// Read the next complete frame, header and body.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = self.read_header().await?;
        let len = header.payload_len(self.config.max_payload_size)?;
        let payload = self.read_payload(len).await?;
        Ok(Frame {
            channel: header.channel,
            payload,
        })
    }
}
