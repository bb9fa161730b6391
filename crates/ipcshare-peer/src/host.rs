//! The hosting side: objects whose methods can be called by the peer.
//!
//! A hosted object describes its callable surface as a [`Members`] table of
//! named, typed [`Method`]s. Incoming calls are matched against that table
//! by name, then by argument count and per-argument assignability; the
//! first matching overload wins.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use ipcshare_codec::{Fault, FromValue, Instance, TypeRef, Value};

use crate::proxy::Arg;

/// An object that can be shared by hosting it.
pub trait Hosted: Any + Send + Sync {
    /// The callable surface of this object.
    fn members(self: Arc<Self>) -> Members;
}

type Handler = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value, Fault>> + Send + Sync>;

/// One callable overload.
#[derive(Clone)]
pub struct Method {
    name: String,
    params: Vec<TypeRef>,
    returns: TypeRef,
    handler: Handler,
}

impl Method {
    /// A method that completes synchronously.
    pub fn sync<F>(name: impl Into<String>, params: Vec<TypeRef>, returns: TypeRef, f: F) -> Self
    where
        F: Fn(Args) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            returns,
            handler: Arc::new(move |args| Box::pin(std::future::ready(f(args)))),
        }
    }

    /// A method that completes asynchronously.
    pub fn future<F, Fut>(
        name: impl Into<String>,
        params: Vec<TypeRef>,
        returns: TypeRef,
        f: F,
    ) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params,
            returns,
            handler: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeRef] {
        &self.params
    }

    /// Declared return type, sent when the result is null or shared.
    pub fn returns(&self) -> &TypeRef {
        &self.returns
    }

    /// Whether arguments of these types can be passed to this overload.
    pub fn accepts(&self, types: &[TypeRef]) -> bool {
        self.params.len() == types.len()
            && self
                .params
                .iter()
                .zip(types)
                .all(|(param, arg)| param.is_assignable_from(arg))
    }

    pub(crate) fn call(&self, args: Args) -> BoxFuture<'static, Result<Value, Fault>> {
        (self.handler)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Callable methods of a hosted object, grouped by name.
#[derive(Debug, Clone, Default)]
pub struct Members {
    methods: HashMap<String, Vec<Method>>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an overload. Overloads of one name are tried in insertion order.
    pub fn method(mut self, method: Method) -> Self {
        self.methods
            .entry(method.name.clone())
            .or_default()
            .push(method);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Find the overload for a call.
    pub fn resolve(&self, name: &str, types: &[TypeRef]) -> Result<&Method, Fault> {
        let overloads = self
            .methods
            .get(name)
            .ok_or_else(|| Fault::argument(format!("member {name} not found")))?;
        overloads
            .iter()
            .find(|method| method.accepts(types))
            .ok_or_else(|| {
                Fault::argument(format!(
                    "no overload of {name} accepts ({})",
                    type_list(types)
                ))
            })
    }
}

fn type_list(types: &[TypeRef]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decoded arguments of a call or constructor.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The argument at `index`, converted. Failures become argument faults.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, Fault> {
        let value = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| Fault::argument(format!("missing argument {index}")))?;
        T::from_value(value).map_err(|err| Fault::argument(format!("argument {index}: {err}")))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A hosted object together with its type-erased identity.
#[derive(Clone)]
pub struct HostedInstance {
    object: Arc<dyn Hosted>,
    instance: Instance,
}

impl HostedInstance {
    pub fn new<T: Hosted>(object: Arc<T>) -> Self {
        Self {
            instance: Instance::from_arc(object.clone()),
            object,
        }
    }

    /// The identity used when this object is passed as an argument.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn members(&self) -> Members {
        self.object.clone().members()
    }

    pub fn downcast<T: Hosted>(&self) -> Option<Arc<T>> {
        self.instance.downcast::<T>()
    }
}

impl fmt::Debug for HostedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostedInstance").field(&self.instance).finish()
    }
}

type Constructor = Arc<dyn Fn(Args) -> Result<HostedInstance, Fault> + Send + Sync>;

#[derive(Clone)]
struct Ctor {
    params: Vec<TypeRef>,
    build: Constructor,
}

/// Types this side is willing to construct when the peer asks it to host.
///
/// The registry is the allow-list for type names arriving from the wire;
/// a name with no entry is refused with an argument fault.
#[derive(Clone, Default)]
pub struct HostRegistry {
    types: HashMap<TypeRef, Vec<Ctor>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor overload for `ty`.
    pub fn with_constructor<T, F>(mut self, ty: TypeRef, params: Vec<TypeRef>, build: F) -> Self
    where
        T: Hosted,
        F: Fn(Args) -> Result<T, Fault> + Send + Sync + 'static,
    {
        let build: Constructor =
            Arc::new(move |args| build(args).map(|object| HostedInstance::new(Arc::new(object))));
        self.types
            .entry(ty)
            .or_default()
            .push(Ctor { params, build });
        self
    }

    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.types.contains_key(ty)
    }

    /// Build an instance with the first constructor accepting `args`.
    pub fn construct(&self, ty: &TypeRef, args: Vec<Arg>) -> Result<HostedInstance, Fault> {
        let ctors = self
            .types
            .get(ty)
            .ok_or_else(|| Fault::argument(format!("type {ty} cannot be hosted here")))?;
        let (types, values): (Vec<TypeRef>, Vec<Value>) = args.into_iter().unzip();
        let ctor = ctors
            .iter()
            .find(|ctor| {
                ctor.params.len() == types.len()
                    && ctor
                        .params
                        .iter()
                        .zip(&types)
                        .all(|(param, arg)| param.is_assignable_from(arg))
            })
            .ok_or_else(|| {
                Fault::argument(format!(
                    "no constructor of {ty} accepts ({})",
                    type_list(&types)
                ))
            })?;
        (ctor.build)(Args::new(values))
    }
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.types.keys()).finish()
    }
}
