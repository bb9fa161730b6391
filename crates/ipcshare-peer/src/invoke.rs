//! Requests and responses on an active channel.
//!
//! Request payload:
//! - i32 request id
//! - method name, as a tagged string
//! - u8 argument count, then per argument a tagged type and a tagged value
//!
//! Response payload:
//! - i32 request id
//! - u8 success flag
//! - tagged type and tagged value: the result, or the fault on failure
//!
//! A host runs each request on its own task, so responses may come back in
//! any order; the proxy matches them to callers by request id.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use ipcshare_codec::{Fault, TypeRef, Value};
use ipcshare_frame::FrameError;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, SharedInstance};
use crate::connection::ConnectionInner;
use crate::error::{PeerError, Result};
use crate::host::{Args, Members, Method};
use crate::proxy::Arg;

/// The type sent alongside `value` when it was declared as `declared`.
///
/// Null and shared values carry no runtime type of their own, so the
/// declaration is sent for them; every other value is sent as what it is.
pub(crate) fn wire_type(declared: &TypeRef, value: &Value) -> TypeRef {
    match value {
        Value::Null | Value::Shared(_) => declared.clone(),
        other => other.type_ref(),
    }
}

/// Append an argument count and the arguments.
pub(crate) fn put_args(
    connection: &ConnectionInner,
    dst: &mut BytesMut,
    args: &[Arg],
) -> Result<()> {
    let count = u8::try_from(args.len()).map_err(|_| {
        PeerError::InvalidArgument(format!("{} arguments exceed the limit of 255", args.len()))
    })?;
    dst.put_u8(count);
    let encoder = connection.encoder();
    for (declared, value) in args {
        encoder.write_typed(dst, &wire_type(declared, value), value)?;
    }
    Ok(())
}

/// A request with a zero id; the caller patches the first four bytes.
pub(crate) fn encode_request(
    connection: &ConnectionInner,
    method: &str,
    args: &[Arg],
) -> Result<BytesMut> {
    let mut payload = BytesMut::new();
    payload.put_i32_le(0);
    connection
        .encoder()
        .write_value(&mut payload, &Value::String(method.to_string()))?;
    put_args(connection, &mut payload, args)?;
    Ok(payload)
}

fn encode_response(
    connection: &ConnectionInner,
    request_id: i32,
    returns: &TypeRef,
    outcome: &std::result::Result<Value, Fault>,
) -> Result<Bytes> {
    let mut payload = BytesMut::new();
    payload.put_i32_le(request_id);
    let encoder = connection.encoder();
    match outcome {
        Ok(value) => {
            payload.put_u8(1);
            encoder.write_typed(&mut payload, &wire_type(returns, value), value)?;
        }
        Err(fault) => {
            payload.put_u8(0);
            encoder.write_typed(&mut payload, &fault.type_ref(), &fault.to_value())?;
        }
    }
    Ok(payload.freeze())
}

/// Start the loop matching the channel's role.
pub(crate) fn spawn_listener(channel: Arc<Channel>, shared: SharedInstance) {
    tokio::spawn(async move {
        let result = match shared {
            SharedInstance::Hosted(hosted) => {
                match catch_unwind(AssertUnwindSafe(|| hosted.members())) {
                    Ok(members) => listen_for_requests(&channel, Arc::new(members)).await,
                    Err(payload) => Err(PeerError::Host(Fault::panicked(panic_message(payload)))),
                }
            }
            SharedInstance::Proxy(_) => listen_for_responses(&channel).await,
        };
        match result {
            Err(err) if !channel.is_disposed() => {
                warn!(channel = channel.id(), error = %err, "listen loop failed, closing channel");
            }
            _ => debug!(channel = channel.id(), "listen loop stopped"),
        }
        channel.dispose();
    });
}

async fn listen_for_requests(channel: &Arc<Channel>, members: Arc<Members>) -> Result<()> {
    loop {
        let connection = channel.connection()?;
        let mut decoder = connection.decoder(channel.reader());
        let request_id = decoder.read_i32().await?;
        let method = decoder.read_tagged_string().await?;
        let count = decoder.read_u8().await?;
        let mut args = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            args.push(decoder.read_typed().await?);
        }
        drop(decoder);
        trace!(channel = channel.id(), request_id, %method, "request received");

        let types: Vec<TypeRef> = args.iter().map(|(ty, _)| ty.clone()).collect();
        match members.resolve(&method, &types) {
            Ok(target) => {
                let target = target.clone();
                tokio::spawn(dispatch(channel.clone(), request_id, target, args));
            }
            Err(fault) => {
                debug!(channel = channel.id(), request_id, %fault, "request rejected");
                respond(channel, request_id, &TypeRef::OBJECT, Err(fault))?;
            }
        }
    }
}

async fn dispatch(channel: Arc<Channel>, request_id: i32, method: Method, args: Vec<Arg>) {
    let returns = method.returns().clone();
    let values = args.into_iter().map(|(_, value)| value).collect();
    let outcome = match tokio::spawn(async move { method.call(Args::new(values)).await }).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(Fault::panicked(panic_message(err.into_panic()))),
        Err(_) => Err(Fault::invalid_operation("invocation was cancelled")),
    };
    if let Err(err) = respond(&channel, request_id, &returns, outcome) {
        debug!(channel = channel.id(), request_id, error = %err, "response not sent");
    }
}

/// Queue the response to `request_id`.
///
/// A result that cannot be encoded, or that is too large for one frame, is
/// replaced by a serialization fault. When even that fails, or the
/// connection is gone, the channel is closed.
fn respond(
    channel: &Channel,
    request_id: i32,
    returns: &TypeRef,
    outcome: std::result::Result<Value, Fault>,
) -> Result<()> {
    let connection = channel.connection()?;
    let err = match encode_response(&connection, request_id, returns, &outcome) {
        Ok(payload) => match connection.send(channel.id(), payload) {
            Ok(()) => return Ok(()),
            Err(err @ PeerError::Frame(FrameError::PayloadTooLarge { .. })) => err,
            Err(err) => {
                channel.dispose();
                return Err(err);
            }
        },
        Err(err) => err,
    };

    warn!(channel = channel.id(), request_id, error = %err, "response could not be encoded");
    let fault = Fault::serialization(format!("result of type {returns}: {err}"));
    let fallback = encode_response(&connection, request_id, returns, &Err(fault))
        .and_then(|payload| connection.send(channel.id(), payload));
    if let Err(err) = fallback {
        channel.dispose();
        return Err(err);
    }
    Ok(())
}

async fn listen_for_responses(channel: &Arc<Channel>) -> Result<()> {
    loop {
        let connection = channel.connection()?;
        let mut decoder = connection.decoder(channel.reader());
        let request_id = decoder.read_i32().await?;
        let success = decoder.read_u8().await? != 0;
        let (ty, value) = decoder.read_typed().await?;
        drop(decoder);
        trace!(channel = channel.id(), request_id, success, "response received");

        let result = if success {
            Ok(value)
        } else {
            Err(PeerError::Remote(Fault::from_wire(&ty, value)))
        };
        channel.complete(request_id, result);
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "method panicked".to_string()
    }
}
