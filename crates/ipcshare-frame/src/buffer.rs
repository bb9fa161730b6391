//! Per-channel byte queue between frame delivery and protocol reads.
//!
//! The connection's reader pushes each frame body into the owning
//! channel's [`StreamBuffer`] with [`StreamBuffer::fill`]; the channel's
//! protocol loop pulls exact byte counts back out with
//! [`StreamBuffer::read`]. Frame boundaries are invisible to the reader.
//!
//! Invariants:
//! - at most one read is outstanding; a second one fails immediately
//! - a read completes only with exactly the requested number of bytes
//! - bytes are handed out in the order they were filled

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{FrameError, Result};

/// Growth unit of the internal buffer.
pub const PAGE_SIZE: usize = 4096;

/// Exact-length byte queue for a single consumer.
#[derive(Debug)]
pub struct StreamBuffer {
    state: Mutex<State>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct State {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    pending: Option<PendingRead>,
}

#[derive(Debug)]
struct PendingRead {
    out: BytesMut,
    wanted: usize,
    done: oneshot::Sender<Bytes>,
}

/// A read registered with [`StreamBuffer::begin_read`].
///
/// Registration and completion are split so the caller learns about a
/// conflicting read immediately, before waiting for any data.
#[derive(Debug)]
pub struct ReadRequest {
    inner: ReadInner,
}

#[derive(Debug)]
enum ReadInner {
    Ready(Bytes),
    Waiting {
        done: oneshot::Receiver<Bytes>,
        cancel: CancellationToken,
    },
}

impl ReadRequest {
    /// Wait until the requested bytes have arrived.
    ///
    /// Returns `FrameError::Cancelled` if the buffer is disposed first.
    pub async fn wait(self) -> Result<Bytes> {
        match self.inner {
            ReadInner::Ready(bytes) => Ok(bytes),
            ReadInner::Waiting { done, cancel } => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FrameError::Cancelled),
                res = done => res.map_err(|_| FrameError::Cancelled),
            },
        }
    }

    /// Whether the bytes were already buffered when the read was issued.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, ReadInner::Ready(_))
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A buffer that is disposed when `cancel` fires.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cancel,
        }
    }

    /// Move exactly `count` bytes from `source` into this buffer.
    ///
    /// Bytes go straight into an outstanding read when there is one and are
    /// queued otherwise. The internal lock is held for each chunk copy,
    /// including the wait on `source`, so a concurrent read sees either the
    /// state before or after the chunk.
    ///
    /// Once the buffer is disposed the rest of the `count` bytes are still
    /// consumed from `source` and dropped, keeping the source aligned on
    /// frame boundaries. Only I/O failures are returned as errors.
    pub async fn fill<R>(&self, source: &mut R, count: usize) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut remaining = count;
        while remaining > 0 {
            let mut state = self.state.lock().await;
            if self.is_disposed() {
                drop(state);
                return discard(source, remaining).await;
            }
            state.reap_abandoned();

            let read = match state.pending.as_mut() {
                Some(pending) => {
                    let start = pending.out.len();
                    let take = (pending.wanted - start).min(remaining);
                    pending.out.resize(start + take, 0);
                    match read_some(source, &mut pending.out[start..]).await {
                        Ok(n) => {
                            pending.out.truncate(start + n);
                            n
                        }
                        Err(err) => {
                            pending.out.truncate(start);
                            return Err(err);
                        }
                    }
                }
                None => {
                    let slot = state.writable();
                    let take = slot.len().min(remaining);
                    let n = read_some(source, &mut slot[..take]).await?;
                    state.write_pos += n;
                    n
                }
            };
            remaining -= read;
            state.complete_pending();
        }
        Ok(())
    }

    /// Register a read of exactly `count` bytes.
    ///
    /// Fails with `FrameError::ReadInProgress` if another read is still
    /// outstanding and with `FrameError::Disposed` after disposal. Bytes that
    /// are already buffered are claimed now; the rest are delivered by
    /// subsequent fills.
    pub async fn begin_read(&self, count: usize) -> Result<ReadRequest> {
        let mut state = self.state.lock().await;
        if self.is_disposed() {
            return Err(FrameError::Disposed);
        }
        state.reap_abandoned();
        if state.pending.is_some() {
            return Err(FrameError::ReadInProgress);
        }

        if state.buffered() >= count {
            let bytes = state.take(count);
            return Ok(ReadRequest {
                inner: ReadInner::Ready(bytes),
            });
        }

        let mut out = BytesMut::with_capacity(count);
        let available = state.buffered();
        out.extend_from_slice(&state.take(available));
        let (done, rx) = oneshot::channel();
        state.pending = Some(PendingRead {
            out,
            wanted: count,
            done,
        });
        trace!(count, available, "read waiting for fill");

        Ok(ReadRequest {
            inner: ReadInner::Waiting {
                done: rx,
                cancel: self.cancel.clone(),
            },
        })
    }

    /// Read exactly `count` bytes.
    pub async fn read(&self, count: usize) -> Result<Bytes> {
        self.begin_read(count).await?.wait().await
    }

    /// Number of bytes queued and not yet claimed by a read.
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffered()
    }

    /// Cancel any outstanding read and reject further reads. Idempotent.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn buffered(&self) -> usize {
        self.write_pos - self.read_pos
    }

    fn take(&mut self, count: usize) -> Bytes {
        let bytes = Bytes::copy_from_slice(&self.data[self.read_pos..self.read_pos + count]);
        self.read_pos += count;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
        bytes
    }

    /// Free space at the write cursor, compacting and then growing by one
    /// page when the tail is full.
    fn writable(&mut self) -> &mut [u8] {
        if self.write_pos == self.data.len() {
            if self.read_pos > 0 {
                self.data.copy_within(self.read_pos..self.write_pos, 0);
                self.write_pos -= self.read_pos;
                self.read_pos = 0;
            }
            if self.write_pos == self.data.len() {
                self.data.resize(self.data.len() + PAGE_SIZE, 0);
            }
        }
        &mut self.data[self.write_pos..]
    }

    fn complete_pending(&mut self) {
        let finished = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.out.len() == pending.wanted);
        if !finished {
            return;
        }
        if let Some(pending) = self.pending.take() {
            let _ = pending.done.send(pending.out.freeze());
        }
    }

    /// Drop a pending read whose requester went away, returning the bytes it
    /// had already collected to the front of the queue.
    fn reap_abandoned(&mut self) {
        if !self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.done.is_closed())
        {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.out.is_empty() {
            return;
        }

        let unread = self.buffered();
        let len = pending.out.len() + unread;
        let mut data = Vec::with_capacity(len.div_ceil(PAGE_SIZE) * PAGE_SIZE);
        data.extend_from_slice(&pending.out);
        data.extend_from_slice(&self.data[self.read_pos..self.write_pos]);
        data.resize(data.capacity(), 0);
        self.data = data;
        self.read_pos = 0;
        self.write_pos = len;
        trace!(restored = pending.out.len(), "abandoned read returned to buffer");
    }
}

async fn read_some<R>(source: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let n = source.read(buf).await?;
    if n == 0 {
        return Err(FrameError::ConnectionClosed);
    }
    Ok(n)
}

async fn discard<R>(source: &mut R, count: usize) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; 1024];
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(scratch.len());
        remaining -= read_some(source, &mut scratch[..take]).await?;
    }
    Ok(())
}
