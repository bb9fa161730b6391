//! One shared object's conversation with the peer.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::Bytes;
use futures_core::future::BoxFuture;
use ipcshare_codec::{CodecError, Instance, Source, TypeRef, Value};
use ipcshare_frame::StreamBuffer;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::ConnectionInner;
use crate::error::{PeerError, Result};
use crate::host::HostedInstance;
use crate::invoke;
use crate::proxy::{Arg, Interceptor};

/// Lifecycle of a channel. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Created,
    Starting,
    ActiveHost,
    ActiveProxy,
    Terminated,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Created => "created",
            ChannelState::Starting => "starting",
            ChannelState::ActiveHost => "hosting",
            ChannelState::ActiveProxy => "proxying",
            ChannelState::Terminated => "terminated",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, ChannelState::ActiveHost | ChannelState::ActiveProxy)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object a channel was opened for.
#[derive(Debug, Clone)]
pub enum SharedInstance {
    /// This side holds the real object.
    Hosted(HostedInstance),
    /// This side holds a stand-in; the object lives with the peer.
    Proxy(Instance),
}

impl SharedInstance {
    pub fn instance(&self) -> &Instance {
        match self {
            SharedInstance::Hosted(hosted) => hosted.instance(),
            SharedInstance::Proxy(instance) => instance,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, SharedInstance::Hosted(_))
    }
}

type Pending = oneshot::Sender<Result<Value>>;

/// A logical, independently closable stream carrying one shared object.
pub struct Channel {
    id: i64,
    state: Mutex<ChannelState>,
    shared: OnceLock<SharedInstance>,
    buffer: StreamBuffer,
    cancel: CancellationToken,
    pending: Mutex<HashMap<i32, Pending>>,
    next_request: AtomicI32,
    disposed: AtomicBool,
    peer_closed: AtomicBool,
    connection: Weak<ConnectionInner>,
}

impl Channel {
    pub(crate) fn new(id: i64, connection: Weak<ConnectionInner>, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        Self {
            id,
            state: Mutex::new(ChannelState::Created),
            shared: OnceLock::new(),
            buffer: StreamBuffer::with_token(cancel.clone()),
            cancel,
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicI32::new(0),
            disposed: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
            connection,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    /// Whether this side holds the real object.
    pub fn is_host(&self) -> bool {
        self.shared.get().is_some_and(SharedInstance::is_host)
    }

    /// The shared object or its stand-in, once the handshake has finished.
    pub fn instance(&self) -> Option<Instance> {
        self.shared.get().map(|shared| shared.instance().clone())
    }

    pub fn shared(&self) -> Option<&SharedInstance> {
        self.shared.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Close the channel. Idempotent.
    ///
    /// Outstanding calls fail with [`PeerError::Cancelled`], the listen loop
    /// stops and the peer is told to close its side.
    pub fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *lock(&self.state) = ChannelState::Terminated;
        self.cancel.cancel();

        let pending: Vec<Pending> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        let abandoned = pending.len();
        for tx in pending {
            let _ = tx.send(Err(PeerError::Cancelled));
        }
        if let Some(connection) = self.connection.upgrade() {
            connection.enqueue_close(self.id);
        }
        debug!(channel = self.id, abandoned, "channel disposed");
    }

    /// Send a call to the hosted object behind this proxy channel.
    ///
    /// With `fire_and_forget` this returns `Value::Null` once the request
    /// is queued; any response is discarded when it arrives.
    pub async fn remote_invoke(
        &self,
        fire_and_forget: bool,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Value> {
        let state = self.state();
        match state {
            ChannelState::ActiveProxy => {}
            ChannelState::Terminated => return Err(PeerError::Disposed),
            _ => {
                return Err(PeerError::InvalidState {
                    channel: self.id,
                    state,
                })
            }
        }
        let connection = self.connection()?;
        let mut payload = invoke::encode_request(&connection, method, &args)?;

        let (tx, rx) = oneshot::channel();
        let request_id = self.register(tx)?;
        payload[..4].copy_from_slice(&request_id.to_le_bytes());
        if let Err(err) = connection.send(self.id, payload.freeze()) {
            lock(&self.pending).remove(&request_id);
            return Err(err);
        }
        trace!(channel = self.id, request_id, method, fire_and_forget, "request queued");

        if fire_and_forget {
            return Ok(Value::Null);
        }
        rx.await.unwrap_or(Err(PeerError::Cancelled))
    }

    /// An interceptor for stand-ins built on this channel.
    ///
    /// It holds the channel weakly, so a stand-in that outlives the channel
    /// fails its calls with [`PeerError::Disposed`].
    pub fn interceptor(self: &Arc<Self>) -> Arc<dyn Interceptor> {
        Arc::new(ChannelInterceptor {
            channel: Arc::downgrade(self),
        })
    }

    fn register(&self, tx: Pending) -> Result<i32> {
        let mut pending = lock(&self.pending);
        if self.is_disposed() {
            return Err(PeerError::Disposed);
        }
        loop {
            let id = self.next_request.fetch_add(1, Ordering::Relaxed);
            if !pending.contains_key(&id) {
                pending.insert(id, tx);
                return Ok(id);
            }
        }
    }

    /// Dispose after the peer sent its close for this channel.
    /// Record that the peer closed this channel. Called with the channel
    /// table locked so it cannot interleave with the writer retiring the id.
    pub(crate) fn mark_closed_by_peer(&self) {
        self.peer_closed.store(true, Ordering::Release);
    }

    pub(crate) fn closed_by_peer(&self) -> bool {
        self.peer_closed.load(Ordering::Acquire)
    }

    /// Hand a response to the call waiting on `request_id`, if any.
    pub(crate) fn complete(&self, request_id: i32, result: Result<Value>) {
        match lock(&self.pending).remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!(channel = self.id, request_id, "response without a caller"),
        }
    }

    pub(crate) fn set_state(&self, next: ChannelState) {
        let mut state = lock(&self.state);
        if *state != ChannelState::Terminated {
            *state = next;
        }
    }

    /// Record the shared object and start the listen loop for it.
    pub(crate) fn activate(self: &Arc<Self>, shared: SharedInstance) -> Result<()> {
        let next = if shared.is_host() {
            ChannelState::ActiveHost
        } else {
            ChannelState::ActiveProxy
        };
        {
            let mut state = lock(&self.state);
            match *state {
                ChannelState::Terminated => return Err(PeerError::Disposed),
                ChannelState::ActiveHost | ChannelState::ActiveProxy => {
                    return Err(PeerError::InvalidState {
                        channel: self.id,
                        state: *state,
                    })
                }
                _ => {}
            }
            if self.shared.set(shared.clone()).is_err() {
                return Err(PeerError::InvalidState {
                    channel: self.id,
                    state: *state,
                });
            }
            *state = next;
        }
        invoke::spawn_listener(self.clone(), shared);
        debug!(channel = self.id, state = %next, "channel active");
        Ok(())
    }

    pub(crate) fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    pub(crate) fn reader(&self) -> ChannelReader<'_> {
        ChannelReader {
            buffer: &self.buffer,
        }
    }

    pub(crate) fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.connection.upgrade().ok_or(PeerError::Disposed)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Pulls protocol bytes out of a channel's buffer.
pub(crate) struct ChannelReader<'c> {
    buffer: &'c StreamBuffer,
}

impl Source for ChannelReader<'_> {
    fn take(
        &mut self,
        count: usize,
    ) -> impl Future<Output = ipcshare_codec::Result<Bytes>> + Send {
        let buffer = self.buffer;
        async move {
            buffer
                .read(count)
                .await
                .map_err(CodecError::source_error)
        }
    }
}

struct ChannelInterceptor {
    channel: Weak<Channel>,
}

impl Interceptor for ChannelInterceptor {
    /// Without a live channel every type passes, so the call itself reports
    /// [`PeerError::Disposed`].
    fn can_serialize(&self, ty: &TypeRef) -> bool {
        match self.channel.upgrade().map(|channel| channel.connection()) {
            Some(Ok(connection)) => connection.types.can_serialize(ty),
            _ => true,
        }
    }

    fn remote_invoke(
        &self,
        fire_and_forget: bool,
        method: &str,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>> {
        let channel = self.channel.clone();
        let method = method.to_string();
        Box::pin(async move {
            let channel = channel.upgrade().ok_or(PeerError::Disposed)?;
            channel.remote_invoke(fire_and_forget, &method, args).await
        })
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
