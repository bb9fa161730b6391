//! The proxy side: stand-ins whose calls are forwarded to the host.
//!
//! How a stand-in is built is up to the embedding program. A
//! [`ProxyFactory`] receives the channel's [`Interceptor`] and returns any
//! object that routes its calls through [`Interceptor::remote_invoke`].
//! [`RemoteObjectFactory`] builds the generic [`RemoteObject`], which takes
//! method names and argument lists directly.

use std::fmt;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use ipcshare_codec::{Fault, FromValue, Instance, TypeRef, Value};

use crate::error::{PeerError, Result};

/// A call argument: the declared type and the value.
pub type Arg = (TypeRef, Value);

/// Pair a value with its declared type.
pub fn arg(ty: TypeRef, value: impl Into<Value>) -> Arg {
    (ty, value.into())
}

/// The invocation entry point a channel offers to its stand-in.
pub trait Interceptor: Send + Sync {
    /// Whether values declared as `ty` can be sent.
    fn can_serialize(&self, ty: &TypeRef) -> bool;

    /// Send a call to the host. With `fire_and_forget` the future resolves
    /// to `Value::Null` as soon as the request is queued.
    fn remote_invoke(
        &self,
        fire_and_forget: bool,
        method: &str,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>>;
}

/// Builds stand-ins for types hosted by the peer.
pub trait ProxyFactory: Send + Sync {
    /// Create the stand-in for an instance of `ty` constructed remotely
    /// with `args`. A fault refuses the type.
    fn create(
        &self,
        ty: &TypeRef,
        args: &[Arg],
        interceptor: Arc<dyn Interceptor>,
    ) -> std::result::Result<Instance, Fault>;
}

/// Produces a [`RemoteObject`] for any type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteObjectFactory;

impl ProxyFactory for RemoteObjectFactory {
    fn create(
        &self,
        ty: &TypeRef,
        _args: &[Arg],
        interceptor: Arc<dyn Interceptor>,
    ) -> std::result::Result<Instance, Fault> {
        Ok(Instance::new(RemoteObject::new(ty.clone(), interceptor)))
    }
}

/// A stand-in that forwards calls by name.
pub struct RemoteObject {
    ty: TypeRef,
    interceptor: Arc<dyn Interceptor>,
}

impl RemoteObject {
    pub fn new(ty: TypeRef, interceptor: Arc<dyn Interceptor>) -> Self {
        Self { ty, interceptor }
    }

    /// The type of the remote instance.
    pub fn type_ref(&self) -> &TypeRef {
        &self.ty
    }

    /// Call `method` and wait for its result.
    pub async fn call(&self, method: &str, args: Vec<Arg>) -> Result<Value> {
        self.check_args(&args)?;
        self.interceptor.remote_invoke(false, method, args).await
    }

    /// Call `method` and convert its result.
    pub async fn call_as<T: FromValue>(&self, method: &str, args: Vec<Arg>) -> Result<T> {
        let value = self.call(method, args).await?;
        Ok(T::from_value(value)?)
    }

    /// Send `method` without waiting for it to run.
    pub async fn notify(&self, method: &str, args: Vec<Arg>) -> Result<()> {
        self.check_args(&args)?;
        self.interceptor.remote_invoke(true, method, args).await?;
        Ok(())
    }

    fn check_args(&self, args: &[Arg]) -> Result<()> {
        match args
            .iter()
            .find(|(ty, _)| !self.interceptor.can_serialize(ty))
        {
            Some((ty, _)) => Err(PeerError::InvalidArgument(format!(
                "{ty} cannot be sent to {}",
                self.ty
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}
