#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ipcshare_codec::{Fault, Instance, TypeRef, TypeRegistry, Value};
use ipcshare_peer::{
    Connection, ConnectionConfig, HostRegistry, Hosted, Members, Method, RemoteObject, Role,
};
use ipcshare_transport::StreamPair;
use tokio::sync::Notify;

pub fn echo_type() -> TypeRef {
    TypeRef::named("Echo")
}

pub fn calculator_type() -> TypeRef {
    TypeRef::named("Calculator")
}

pub fn counter_type() -> TypeRef {
    TypeRef::named("Counter")
}

/// Registered with a constructor that panics.
pub fn bomb_type() -> TypeRef {
    TypeRef::named("Bomb")
}

/// Returns its input.
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
                "grow",
                vec![TypeRef::I32],
                TypeRef::BYTES,
                |args| {
                    let len = usize::try_from(args.get::<i32>(0)?).unwrap_or_default();
                    Ok(Value::Bytes(Bytes::from(vec![0u8; len])))
                },
            ))
    }
}

pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self {
            value: AtomicI64::new(start),
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Hosted for Counter {
    fn members(self: Arc<Self>) -> Members {
        let counter = self.clone();
        Members::new()
            .method(Method::sync("increment", vec![], TypeRef::I64, move |_| {
                Ok(Value::I64(counter.value.fetch_add(1, Ordering::SeqCst) + 1))
            }))
            .method(Method::sync("get", vec![], TypeRef::I64, move |_| {
                Ok(Value::I64(self.get()))
            }))
    }
}

/// Hooks the tests use to observe and steer a hosted calculator.
#[derive(Default)]
pub struct Probe {
    pub gate: Notify,
    pub done: Notify,
    pub held: AtomicUsize,
}

pub struct Calculator {
    probe: Arc<Probe>,
}

impl Hosted for Calculator {
    fn members(self: Arc<Self>) -> Members {
        let probe = self.probe.clone();
        Members::new()
            .method(Method::sync(
                "f",
                vec![TypeRef::I32],
                TypeRef::STRING,
                |args| Ok(Value::from(format!("one:{}", args.get::<i32>(0)?))),
            ))
            .method(Method::sync(
                "f",
                vec![TypeRef::I32, TypeRef::STRING],
                TypeRef::STRING,
                |args| {
                    Ok(Value::from(format!(
                        "two:{}:{}",
                        args.get::<i32>(0)?,
                        args.get::<String>(1)?
                    )))
                },
            ))
            .method(Method::sync(
                "divide",
                vec![TypeRef::I32, TypeRef::I32],
                TypeRef::I32,
                |args| {
                    let (a, b) = (args.get::<i32>(0)?, args.get::<i32>(1)?);
                    if b == 0 {
                        return Err(Fault::new("DivideByZero", "attempted to divide by zero"));
                    }
                    Ok(Value::I32(a / b))
                },
            ))
            .method(Method::future("hold", vec![], TypeRef::OBJECT, move |_| {
                let probe = probe.clone();
                async move {
                    probe.gate.notified().await;
                    probe.held.fetch_add(1, Ordering::SeqCst);
                    probe.done.notify_one();
                    Ok(Value::Null)
                }
            }))
            .method(Method::sync("leak", vec![], TypeRef::OBJECT, |_| {
                Ok(Value::Shared(Instance::new(7u32)))
            }))
            .method(Method::sync("boom", vec![], TypeRef::OBJECT, |_| {
                panic!("boom")
            }))
            .method(Method::sync(
                "read",
                vec![counter_type()],
                TypeRef::I64,
                |args| {
                    let counter = args
                        .get::<Instance>(0)?
                        .downcast::<Counter>()
                        .ok_or_else(|| Fault::argument("not a hosted counter"))?;
                    Ok(Value::I64(counter.get()))
                },
            ))
            .method(Method::sync("nothing", vec![], counter_type(), |_| {
                Ok(Value::Null)
            }))
    }
}

pub fn hosts(probe: Arc<Probe>) -> HostRegistry {
    HostRegistry::new()
        .with_constructor(echo_type(), vec![], |_| Ok(Echo))
        .with_constructor(counter_type(), vec![TypeRef::I64], |args| {
            Ok(Counter::new(args.get::<i64>(0)?))
        })
        .with_constructor(calculator_type(), vec![], move |_| {
            Ok(Calculator {
                probe: probe.clone(),
            })
        })
        .with_constructor::<Echo, _>(bomb_type(), vec![], |_| panic!("constructor exploded"))
}

pub fn types() -> TypeRegistry {
    TypeRegistry::new().with_shared(counter_type())
}

/// Two connections over an in-memory pipe, both able to host every test type.
pub fn connect(probe: Arc<Probe>) -> (Connection, Connection) {
    connect_with(ConnectionConfig::default(), probe)
}

/// [`connect`] with the same `config` on both sides.
pub fn connect_with(config: ConnectionConfig, probe: Arc<Probe>) -> (Connection, Connection) {
    let (left, right) = StreamPair::memory_pair(64 * 1024);
    let initiator = Connection::builder(Role::Initiator)
        .config(config.clone())
        .hosts(hosts(probe.clone()))
        .types(types())
        .start(left);
    let acceptor = Connection::builder(Role::Acceptor)
        .config(config)
        .hosts(hosts(probe))
        .types(types())
        .start(right);
    (initiator, acceptor)
}

pub fn stand_in(instance: &Instance) -> Arc<RemoteObject> {
    instance
        .downcast::<RemoteObject>()
        .expect("default factory builds remote objects")
}

/// Wait until `check` holds, failing after two seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap_or_else(|_| panic!("timed out: {what}"))
}

/// Deterministic xorshift64 for test data.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn bytes(&mut self, max_len: usize) -> Vec<u8> {
        let len = (self.next_u64() % (max_len as u64 + 1)) as usize;
        (0..len).map(|_| self.next_u64() as u8).collect()
    }
}
