//! Objects the CLI offers to its peers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ipcshare_codec::{Fault, TypeRef, TypeRegistry, Value};
use ipcshare_peer::{HostRegistry, Hosted, Members, Method};

pub fn counter_type() -> TypeRef {
    TypeRef::named("Counter")
}

pub fn echo_type() -> TypeRef {
    TypeRef::named("Echo")
}

/// A shared 64-bit counter.
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self {
            value: AtomicI64::new(start),
        }
    }

    fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Hosted for Counter {
    fn members(self: Arc<Self>) -> Members {
        let (inc, add, get, div) = (self.clone(), self.clone(), self.clone(), self);
        Members::new()
            .method(Method::sync("increment", vec![], TypeRef::I64, move |_| {
                Ok(Value::I64(inc.add(1)))
            }))
            .method(Method::sync("add", vec![TypeRef::I64], TypeRef::I64, move |args| {
                Ok(Value::I64(add.add(args.get(0)?)))
            }))
            .method(Method::sync("get", vec![], TypeRef::I64, move |_| {
                Ok(Value::I64(get.value.load(Ordering::SeqCst)))
            }))
            .method(Method::sync(
                "divide",
                vec![TypeRef::I64],
                TypeRef::I64,
                move |args| {
                    let divisor: i64 = args.get(0)?;
                    if divisor == 0 {
                        return Err(Fault::new("DivideByZero", "attempted to divide by zero"));
                    }
                    Ok(Value::I64(div.value.load(Ordering::SeqCst) / divisor))
                },
            ))
    }
}

/// Returns what it is given, as bytes or as text.
pub struct Echo;

impl Hosted for Echo {
    fn members(self: Arc<Self>) -> Members {
        Members::new()
            .method(Method::sync(
                "echo",
                vec![TypeRef::BYTES],
                TypeRef::BYTES,
                |args| Ok(Value::Bytes(args.get::<Bytes>(0)?)),
            ))
            .method(Method::sync(
                "echo",
                vec![TypeRef::STRING],
                TypeRef::STRING,
                |args| Ok(Value::String(args.get::<String>(0)?)),
            ))
    }
}

pub fn hosts() -> HostRegistry {
    HostRegistry::new()
        .with_constructor(counter_type(), vec![], |_| Ok(Counter::new(0)))
        .with_constructor(counter_type(), vec![TypeRef::I64], |args| {
            Ok(Counter::new(args.get(0)?))
        })
        .with_constructor(echo_type(), vec![], |_| Ok(Echo))
}

pub fn types() -> TypeRegistry {
    TypeRegistry::new()
        .with_shared(counter_type())
        .with_shared(echo_type())
}
