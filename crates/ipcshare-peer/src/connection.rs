//! The multiplexer: one physical stream, many channels.
//!
//! Each connection runs exactly two tasks. The reader pulls one frame at a
//! time off the stream and pushes its body into the owning channel's
//! buffer, opening channels the peer has started. The writer drains a FIFO
//! queue of outgoing frames, so writes reach the stream in the order they
//! were queued. An I/O failure in either task disposes the connection.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ipcshare_codec::{Decoder, Encoder, Instance, ResolveProxyIds, Source, TypeRef, TypeRegistry};
use ipcshare_frame::{originated_by, ChannelIdAllocator, FrameError, FrameReader, FrameWriter};
use ipcshare_transport::{BoxedReader, BoxedWriter, Role, StreamPair};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{lock, Channel, SharedInstance};
use crate::config::ConnectionConfig;
use crate::error::{PeerError, Result};
use crate::handshake::{self, LocalStart};
use crate::host::{HostRegistry, HostedInstance};
use crate::proxy::{Arg, ProxyFactory, RemoteObjectFactory};

const MAX_FRAME_LEN: usize = i32::MAX as usize;

enum Outgoing {
    Data { channel: i64, payload: Bytes },
    Close { channel: i64 },
}

/// Starts a [`Connection`] with its collaborators.
pub struct ConnectionBuilder {
    role: Role,
    config: ConnectionConfig,
    hosts: HostRegistry,
    types: TypeRegistry,
    proxies: Arc<dyn ProxyFactory>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Types this side constructs when asked to host.
    pub fn hosts(mut self, hosts: HostRegistry) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    /// How stand-ins are built. Defaults to [`RemoteObjectFactory`].
    pub fn proxies(mut self, proxies: Arc<dyn ProxyFactory>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Spawn the reader and writer tasks on the current tokio runtime.
    pub fn start(self, stream: StreamPair) -> Connection {
        let (reader, writer) = stream.into_parts();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let inner = Arc::new(ConnectionInner {
            role: self.role,
            ids: ChannelIdAllocator::new(self.role),
            channels: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            outgoing,
            events,
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            resources: Mutex::new(Vec::new()),
            config: self.config,
            hosts: self.hosts,
            types: self.types,
            proxies: self.proxies,
        });
        tokio::spawn(read_loop(inner.clone(), reader));
        tokio::spawn(write_loop(inner.clone(), writer, queue));
        debug!(role = %inner.role, "connection started");
        Connection { inner }
    }
}

/// One end of a connected stream pair, multiplexed into channels.
///
/// Dropping the connection disposes it.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    role: Role,
    pub(crate) config: ConnectionConfig,
    ids: ChannelIdAllocator,
    channels: Mutex<HashMap<i64, Arc<Channel>>>,
    /// Peer-opened ids closed from this side, held until the peer
    /// acknowledges the close so late frames cannot reopen them.
    retired: Mutex<HashSet<i64>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    events: broadcast::Sender<Arc<Channel>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    resources: Mutex<Vec<Box<dyn Any + Send>>>,
    pub(crate) hosts: HostRegistry,
    pub(crate) types: TypeRegistry,
    pub(crate) proxies: Arc<dyn ProxyFactory>,
}

impl Connection {
    pub fn builder(role: Role) -> ConnectionBuilder {
        ConnectionBuilder {
            role,
            config: ConnectionConfig::default(),
            hosts: HostRegistry::new(),
            types: TypeRegistry::new(),
            proxies: Arc::new(RemoteObjectFactory),
        }
    }

    /// Start a connection with default collaborators.
    pub fn new(role: Role, stream: StreamPair) -> Self {
        Self::builder(role).start(stream)
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Open a channel for an instance of `ty`.
    ///
    /// With `host_instance` this side constructs the object and the peer
    /// gets a stand-in; otherwise the peer constructs it and this side gets
    /// the stand-in. Returns the active channel.
    pub async fn create_instance(
        &self,
        ty: TypeRef,
        host_instance: bool,
        args: Vec<Arg>,
    ) -> Result<Arc<Channel>> {
        let start = if host_instance {
            LocalStart::Construct
        } else {
            LocalStart::Proxy
        };
        self.open(ty, start, args).await
    }

    /// Construct an instance of `ty` here and expose it to the peer.
    pub async fn host(&self, ty: TypeRef, args: Vec<Arg>) -> Result<HostedInstance> {
        let channel = self.open(ty, LocalStart::Construct, args).await?;
        match channel.shared() {
            Some(SharedInstance::Hosted(hosted)) => Ok(hosted.clone()),
            _ => Err(PeerError::InvalidState {
                channel: channel.id(),
                state: channel.state(),
            }),
        }
    }

    /// Expose an existing object to the peer as an instance of `ty`.
    pub async fn share(&self, ty: TypeRef, hosted: HostedInstance) -> Result<Arc<Channel>> {
        self.open(ty, LocalStart::Attach(hosted), Vec::new()).await
    }

    /// Ask the peer to construct an instance of `ty`; returns the stand-in.
    pub async fn create_remote(&self, ty: TypeRef, args: Vec<Arg>) -> Result<Instance> {
        let channel = self.open(ty, LocalStart::Proxy, args).await?;
        channel.instance().ok_or(PeerError::InvalidState {
            channel: channel.id(),
            state: channel.state(),
        })
    }

    async fn open(&self, ty: TypeRef, start: LocalStart, args: Vec<Arg>) -> Result<Arc<Channel>> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(PeerError::Disposed);
        }
        if let Some((unsendable, _)) = args
            .iter()
            .find(|(declared, _)| !inner.types.can_serialize(declared))
        {
            return Err(PeerError::InvalidArgument(format!(
                "{unsendable} cannot be sent to the peer"
            )));
        }

        let channel = inner.register_local()?;
        debug!(channel = channel.id(), %ty, "opening channel");
        match handshake::local_start(inner, &channel, &ty, start, args).await {
            Ok(_) => {
                inner.announce(&channel);
                Ok(channel)
            }
            Err(err) => {
                channel.dispose();
                Err(err)
            }
        }
    }

    /// Registered channels that have not been disposed.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        lock(&self.inner.channels)
            .values()
            .filter(|channel| !channel.is_disposed())
            .cloned()
            .collect()
    }

    pub fn channel(&self, id: i64) -> Option<Arc<Channel>> {
        lock(&self.inner.channels).get(&id).cloned()
    }

    /// The live channel whose object or stand-in is `instance`.
    pub fn channel_of(&self, instance: &Instance) -> Option<Arc<Channel>> {
        self.inner.find(instance)
    }

    /// Follow channels as they become active.
    ///
    /// Channels already active are replayed first.
    pub fn subscribe(&self) -> NewChannels {
        let events = self.inner.events.subscribe();
        let backlog: VecDeque<Arc<Channel>> = self
            .channels()
            .into_iter()
            .filter(|channel| channel.state().is_active())
            .collect();
        NewChannels {
            replayed: backlog.iter().map(|channel| channel.id()).collect(),
            backlog,
            events,
            cancel: self.inner.cancel.clone(),
        }
    }

    /// Keep `resource` alive until the connection is disposed.
    pub fn attach_resource<R: Any + Send>(&self, resource: R) {
        if self.inner.is_disposed() {
            return;
        }
        lock(&self.inner.resources).push(Box::new(resource));
    }

    /// Tear down the connection and every channel on it. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Resolves once the connection has been disposed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }
}

impl ResolveProxyIds for Connection {
    fn instance_id(&self, instance: &Instance) -> Option<i64> {
        self.inner.instance_id(instance)
    }

    fn instance(&self, id: i64) -> Option<Instance> {
        ResolveProxyIds::instance(&*self.inner, id)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.inner.role)
            .field("disposed", &self.inner.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ConnectionInner {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn encoder(&self) -> Encoder<'_> {
        Encoder::new(&self.types, self).with_limits(self.config.limits)
    }

    pub(crate) fn decoder<S: Source>(&self, source: S) -> Decoder<'_, S> {
        Decoder::new(source, &self.types, self).with_limits(self.config.limits)
    }

    /// Queue a data frame.
    ///
    /// Payloads the writer could not frame are refused here, so they fail
    /// the caller instead of the connection.
    pub(crate) fn send(&self, channel: i64, payload: Bytes) -> Result<()> {
        if self.is_disposed() {
            return Err(PeerError::Disposed);
        }
        let max = self.config.frame.max_payload_size.min(MAX_FRAME_LEN);
        if payload.len() > max {
            return Err(PeerError::Frame(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }));
        }
        self.outgoing
            .send(Outgoing::Data { channel, payload })
            .map_err(|_| PeerError::Disposed)
    }

    /// Queue the close of `channel`; a no-op once disposed.
    pub(crate) fn enqueue_close(&self, channel: i64) {
        if !self.is_disposed() {
            let _ = self.outgoing.send(Outgoing::Close { channel });
        }
    }

    fn register_local(self: &Arc<Self>) -> Result<Arc<Channel>> {
        let mut channels = lock(&self.channels);
        let id = self.ids.allocate(|id| channels.contains_key(&id))?;
        let channel = Arc::new(Channel::new(id, Arc::downgrade(self), &self.cancel));
        channels.insert(id, channel.clone());
        Ok(channel)
    }

    fn announce(&self, channel: &Arc<Channel>) {
        // No receivers is fine.
        let _ = self.events.send(channel.clone());
    }

    fn find(&self, instance: &Instance) -> Option<Arc<Channel>> {
        lock(&self.channels)
            .values()
            .find(|channel| {
                !channel.is_disposed()
                    && channel
                        .shared()
                        .is_some_and(|shared| shared.instance().ptr_eq(instance))
            })
            .cloned()
    }

    fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
        let channels: Vec<Arc<Channel>> = lock(&self.channels).drain().map(|(_, c)| c).collect();
        let count = channels.len();
        for channel in channels {
            channel.dispose();
        }
        let resources = std::mem::take(&mut *lock(&self.resources));
        drop(resources);
        debug!(role = %self.role, channels = count, "connection disposed");
    }

    /// The channel for an incoming frame, opening it if the peer started it.
    ///
    /// Returns `None` for ids that must be discarded, and whether the
    /// channel was just opened.
    fn route(self: &Arc<Self>, id: i64) -> (Option<Arc<Channel>>, bool) {
        let mut channels = lock(&self.channels);
        if let Some(channel) = channels.get(&id) {
            return (Some(channel.clone()), false);
        }
        if self.is_disposed()
            || originated_by(id) != Some(self.role.peer())
            || lock(&self.retired).contains(&id)
        {
            return (None, false);
        }
        let channel = Arc::new(Channel::new(id, Arc::downgrade(self), &self.cancel));
        channels.insert(id, channel.clone());
        debug!(channel = id, "peer opened channel");
        (Some(channel), true)
    }

    /// Unregister `id`.
    ///
    /// A peer-opened id is remembered until the peer's close arrives, unless
    /// the peer closed it first.
    fn retire(&self, id: i64) -> Option<Arc<Channel>> {
        let mut channels = lock(&self.channels);
        let removed = channels.remove(&id);
        if let Some(channel) = &removed {
            if originated_by(id) == Some(self.role.peer()) && !channel.closed_by_peer() {
                lock(&self.retired).insert(id);
            }
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn retired_len(&self) -> usize {
        lock(&self.retired).len()
    }

    async fn demultiplex(self: &Arc<Self>, frames: &mut FrameReader<BoxedReader>) -> Result<()> {
        let max_payload = self.config.frame.max_payload_size;
        loop {
            let header = frames.read_header().await?;
            let id = header.channel;
            if header.is_close() {
                let channel = lock(&self.channels)
                    .get(&id)
                    .inspect(|channel| channel.mark_closed_by_peer())
                    .cloned();
                match channel {
                    Some(channel) => {
                        debug!(channel = id, "peer closed channel");
                        channel.dispose();
                    }
                    None if lock(&self.retired).remove(&id) => {
                        trace!(channel = id, "close acknowledged");
                    }
                    None => trace!(channel = id, "close for unknown channel ignored"),
                }
                continue;
            }

            let len = header.payload_len(max_payload)?;
            match self.route(id) {
                (Some(channel), opened) if !channel.is_disposed() => {
                    frames.fill(channel.buffer(), len).await?;
                    trace!(channel = id, len, "frame delivered");
                    if opened && handshake::remote_start(self, &channel).await {
                        self.announce(&channel);
                    }
                }
                _ => {
                    trace!(channel = id, len, "frame discarded");
                    frames.discard(len).await?;
                }
            }
        }
    }

    async fn drain(
        &self,
        frames: &mut FrameWriter<BoxedWriter>,
        queue: &mut mpsc::UnboundedReceiver<Outgoing>,
    ) -> Result<()> {
        while let Some(entry) = queue.recv().await {
            match entry {
                Outgoing::Data { channel, payload } => {
                    let registered = lock(&self.channels).contains_key(&channel);
                    if registered {
                        frames.send(channel, &payload).await?;
                        trace!(channel, len = payload.len(), "frame sent");
                    } else {
                        trace!(channel, "data for closed channel dropped");
                    }
                }
                Outgoing::Close { channel } => {
                    if let Some(closed) = self.retire(channel) {
                        closed.dispose();
                        frames.send_close(channel).await?;
                        debug!(channel, "channel closed");
                    }
                }
            }
        }
        Ok(())
    }
}

impl ResolveProxyIds for ConnectionInner {
    fn instance_id(&self, instance: &Instance) -> Option<i64> {
        self.find(instance).map(|channel| channel.id())
    }

    fn instance(&self, id: i64) -> Option<Instance> {
        lock(&self.channels)
            .get(&id)
            .filter(|channel| !channel.is_disposed())
            .and_then(|channel| channel.instance())
    }
}

/// Disposes the connection when a loop exits, including by panic.
struct DisposeOnExit(Arc<ConnectionInner>);

impl Drop for DisposeOnExit {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

async fn read_loop(inner: Arc<ConnectionInner>, reader: BoxedReader) {
    let _guard = DisposeOnExit(inner.clone());
    let mut frames = FrameReader::with_config(reader, inner.config.frame.clone());
    let result = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => Ok(()),
        result = inner.demultiplex(&mut frames) => result,
    };
    match result {
        Err(PeerError::Frame(FrameError::ConnectionClosed)) => {
            debug!(role = %inner.role, "peer closed the stream");
        }
        Err(err) if !inner.is_disposed() => {
            warn!(role = %inner.role, error = %err, "reader failed, disposing connection");
        }
        _ => {}
    }
}

async fn write_loop(
    inner: Arc<ConnectionInner>,
    writer: BoxedWriter,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    let _guard = DisposeOnExit(inner.clone());
    let mut frames = FrameWriter::with_config(writer, inner.config.frame.clone());
    let result = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => Ok(()),
        result = inner.drain(&mut frames, &mut queue) => result,
    };
    if let Err(err) = result {
        if !inner.is_disposed() {
            warn!(role = %inner.role, error = %err, "writer failed, disposing connection");
        }
    }
    let _ = frames.shutdown().await;
}

/// Channels becoming active on a connection, in order.
///
/// Yields `None` once the connection is disposed and every queued
/// notification has been taken.
pub struct NewChannels {
    backlog: VecDeque<Arc<Channel>>,
    replayed: HashSet<i64>,
    events: broadcast::Receiver<Arc<Channel>>,
    cancel: CancellationToken,
}

impl NewChannels {
    pub async fn next(&mut self) -> Option<Arc<Channel>> {
        if let Some(channel) = self.backlog.pop_front() {
            return Some(channel);
        }
        loop {
            let event = tokio::select! {
                biased;
                event = self.events.recv() => event,
                _ = self.cancel.cancelled() => return None,
            };
            match event {
                Ok(channel) if self.replayed.remove(&channel.id()) => continue,
                Ok(channel) => return Some(channel),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "new-channel subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for NewChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewChannels")
            .field("backlog", &self.backlog.len())
            .finish_non_exhaustive()
    }
}
