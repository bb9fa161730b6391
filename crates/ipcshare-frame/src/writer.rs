use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, FrameConfig, FrameHeader};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to the write half of a connection.
///
/// Each call writes one whole frame and flushes; frames from different
/// channels are never interleaved as long as a single task owns the writer.
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
    config: FrameConfig,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: W) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send a non-empty payload on a channel.
    pub async fn send(&mut self, channel: i64, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(FrameError::EmptyPayload(channel));
        }
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(channel, payload, &mut self.buf)?;
        self.inner.write_all(&self.buf).await?;
        self.flush().await
    }

    /// Send the zero-length frame that closes `channel`.
    pub async fn send_close(&mut self, channel: i64) -> Result<()> {
        self.buf.clear();
        FrameHeader::close(channel).encode(&mut self.buf);
        self.inner.write_all(&self.buf).await?;
        self.flush().await
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(FrameError::Io)
    }

    /// Shut down the write direction of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(FrameError::Io)
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use super::*;
    use crate::codec::{Frame, HEADER_SIZE};
    use crate::reader::FrameReader;

    async fn read_back(bytes: Vec<u8>, count: usize) -> Vec<Frame> {
        let mut reader = FrameReader::new(bytes.as_slice());
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(reader.read_frame().await.unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn write_single_frame() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        writer.send(1, b"hello").await.unwrap();

        let frames = read_back(writer.into_inner(), 1).await;
        assert_eq!(frames[0].channel, 1);
        assert_eq!(frames[0].payload.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        writer.send(1, b"one").await.unwrap();
        writer.send_close(1).await.unwrap();
        writer.send(3, b"three").await.unwrap();

        let bytes = writer.into_inner();
        let mut reader = FrameReader::new(bytes.as_slice());
        let f1 = reader.read_frame().await.unwrap();
        let close = reader.read_header().await.unwrap();
        let f3 = reader.read_frame().await.unwrap();

        assert_eq!((f1.channel, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!(close, FrameHeader::close(1));
        assert_eq!((f3.channel, f3.payload.as_ref()), (3, b"three".as_ref()));
    }

    #[tokio::test]
    async fn close_frame_is_header_only() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        writer.send_close(-2).await.unwrap();
        assert_eq!(writer.into_inner().len(), HEADER_SIZE);
    }

    #[tokio::test]
    async fn empty_data_payload_rejected() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        let err = writer.send(5, b"").await.unwrap_err();
        assert!(matches!(err, FrameError::EmptyPayload(5)));
        assert!(writer.into_inner().is_empty());
    }

    #[tokio::test]
    async fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
        };
        let mut writer = FrameWriter::with_config(Vec::<u8>::new(), cfg);

        let err = writer.send(1, b"oversized").await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(1, b"x").await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn broken_pipe_surfaces_io_error() {
        let (left, right) = tokio::io::duplex(16);
        drop(right);
        let mut writer = FrameWriter::new(left);
        let err = writer.send(1, b"lost").await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl AsyncWrite for FlushTrackingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.flushed.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
