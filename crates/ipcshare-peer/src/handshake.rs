//! Opening a channel: agree on who hosts the object.
//!
//! Request payload, sent by the side that opens the channel:
//! - u8 host flag: 1 when the opener hosts and the peer builds a stand-in
//! - the declared type, tagged
//! - u8 argument count, then per argument a tagged type and a tagged value
//!
//! Response payload: a single 1 byte on success, or a 0 byte followed by the
//! fault as a tagged type and a tagged value.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use ipcshare_codec::{put_tagged_type, Fault, TypeRef};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelState, SharedInstance};
use crate::connection::ConnectionInner;
use crate::error::{PeerError, Result};
use crate::host::HostedInstance;
use crate::invoke::{panic_message, put_args};
use crate::proxy::Arg;

/// What the opening side does once the peer has accepted.
pub(crate) enum LocalStart {
    /// Construct the object here from the registered constructors.
    Construct,
    /// Host an object that already exists.
    Attach(HostedInstance),
    /// Let the peer host; build a stand-in here.
    Proxy,
}

impl LocalStart {
    fn hosts(&self) -> bool {
        !matches!(self, LocalStart::Proxy)
    }
}

/// Run the opening side of the handshake and activate the channel.
///
/// The caller disposes the channel when this fails.
pub(crate) async fn local_start(
    connection: &ConnectionInner,
    channel: &Arc<Channel>,
    ty: &TypeRef,
    start: LocalStart,
    args: Vec<Arg>,
) -> Result<SharedInstance> {
    channel.set_state(ChannelState::Starting);

    // Registered before sending so the reply cannot race the read.
    let reply = channel.buffer().begin_read(1).await?;

    let mut payload = BytesMut::new();
    payload.put_u8(u8::from(start.hosts()));
    put_tagged_type(&mut payload, ty);
    put_args(connection, &mut payload, &args)?;
    connection.send(channel.id(), payload.freeze())?;

    let status = reply.wait().await?;
    if status.first() == Some(&0) {
        let mut decoder = connection.decoder(channel.reader());
        let (fault_type, fault) = decoder.read_typed().await?;
        let fault = Fault::from_wire(&fault_type, fault);
        debug!(channel = channel.id(), %ty, %fault, "peer refused the channel");
        return Err(PeerError::Remote(fault));
    }

    let shared = match start {
        LocalStart::Construct => SharedInstance::Hosted(
            guarded(|| connection.hosts.construct(ty, args)).map_err(PeerError::Host)?,
        ),
        LocalStart::Attach(hosted) => SharedInstance::Hosted(hosted),
        LocalStart::Proxy => SharedInstance::Proxy(
            guarded(|| connection.proxies.create(ty, &args, channel.interceptor()))
                .map_err(PeerError::Host)?,
        ),
    };
    channel.activate(shared.clone())?;
    Ok(shared)
}

/// Answer a handshake the peer started on a freshly seen channel.
///
/// Exactly one response is sent. On failure the channel stays registered
/// but idle until the peer closes it. Returns whether the channel is active.
pub(crate) async fn remote_start(connection: &ConnectionInner, channel: &Arc<Channel>) -> bool {
    channel.set_state(ChannelState::Starting);
    let timeout = connection.config.handshake_timeout;

    let outcome = match tokio::time::timeout(timeout, accept(connection, channel)).await {
        Ok(Ok(shared)) => channel
            .activate(shared)
            .map_err(|err| Fault::invalid_operation(err.to_string())),
        Ok(Err(fault)) => Err(fault),
        Err(_) => Err(Fault::invalid_operation(format!(
            "handshake not completed within {timeout:?}"
        ))),
    };

    let mut payload = BytesMut::new();
    let active = match &outcome {
        Ok(()) => {
            payload.put_u8(1);
            true
        }
        Err(fault) => {
            debug!(channel = channel.id(), %fault, "refusing channel");
            payload.put_u8(0);
            if let Err(err) =
                connection
                    .encoder()
                    .write_typed(&mut payload, &fault.type_ref(), &fault.to_value())
            {
                warn!(channel = channel.id(), error = %err, "handshake fault could not be encoded");
                channel.dispose();
                return false;
            }
            false
        }
    };
    if let Err(err) = connection.send(channel.id(), payload.freeze()) {
        debug!(channel = channel.id(), error = %err, "handshake response not sent");
        channel.dispose();
        return false;
    }
    active
}

async fn accept(
    connection: &ConnectionInner,
    channel: &Arc<Channel>,
) -> std::result::Result<SharedInstance, Fault> {
    let mut decoder = connection.decoder(channel.reader());
    let peer_hosts = decoder.read_u8().await? != 0;
    let ty = decoder.read_tagged_type().await?;
    let count = decoder.read_u8().await?;
    let mut args = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        args.push(decoder.read_typed().await?);
    }
    drop(decoder);

    if peer_hosts {
        debug!(channel = channel.id(), %ty, "peer hosts, building stand-in");
        guarded(|| connection.proxies.create(&ty, &args, channel.interceptor()))
            .map(SharedInstance::Proxy)
    } else {
        debug!(channel = channel.id(), %ty, "hosting for peer");
        guarded(|| connection.hosts.construct(&ty, args)).map(SharedInstance::Hosted)
    }
}

/// Run a constructor or stand-in factory, turning a panic into a fault.
fn guarded<T>(
    build: impl FnOnce() -> std::result::Result<T, Fault>,
) -> std::result::Result<T, Fault> {
    catch_unwind(AssertUnwindSafe(build))
        .unwrap_or_else(|payload| Err(Fault::panicked(panic_message(payload))))
}
