//! One side hosts a counter, the other side picks up the stand-in and calls it.
//!
//! Run with:
//!   cargo run --example shared-counter

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ipcshare::codec::{TypeRef, TypeRegistry, Value};
use ipcshare::peer::{arg, Connection, HostRegistry, Hosted, Members, Method, RemoteObject, Role};
use ipcshare::transport::StreamPair;

struct Tally {
    value: AtomicI64,
}

impl Hosted for Tally {
    fn members(self: Arc<Self>) -> Members {
        let (add, get) = (self.clone(), self);
        Members::new()
            .method(Method::sync("add", vec![TypeRef::I64], TypeRef::I64, move |args| {
                let delta: i64 = args.get(0)?;
                Ok(Value::I64(add.value.fetch_add(delta, Ordering::SeqCst) + delta))
            }))
            .method(Method::sync("get", vec![], TypeRef::I64, move |_| {
                Ok(Value::I64(get.value.load(Ordering::SeqCst)))
            }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tally = TypeRef::named("Tally");
    let types = || TypeRegistry::new().with_shared(TypeRef::named("Tally"));
    let hosts = HostRegistry::new().with_constructor(tally.clone(), vec![TypeRef::I64], |args| {
        Ok(Tally {
            value: AtomicI64::new(args.get(0)?),
        })
    });

    let (left, right) = StreamPair::memory_pair(64 * 1024);
    let owner = Connection::builder(Role::Initiator)
        .hosts(hosts)
        .types(types())
        .start(left);
    let user = Connection::builder(Role::Acceptor).types(types()).start(right);
    let mut incoming = user.subscribe();

    let hosted = owner.host(tally, vec![arg(TypeRef::I64, 10i64)]).await?;
    eprintln!("owner hosts a Tally starting at 10");

    let channel = incoming.next().await.ok_or("connection closed")?;
    let remote = channel
        .instance()
        .and_then(|instance| instance.downcast::<RemoteObject>())
        .ok_or("channel has no stand-in")?;
    eprintln!("user received channel {:#x}", channel.id());

    for delta in [1i64, 2, 3] {
        let value: i64 = remote.call_as("add", vec![arg(TypeRef::I64, delta)]).await?;
        eprintln!("user: add({delta}) -> {value}");
    }

    let local = hosted.downcast::<Tally>().ok_or("hosted object is not a Tally")?;
    eprintln!("owner sees {}", local.value.load(Ordering::SeqCst));

    channel.dispose();
    owner.dispose();
    user.dispose();
    Ok(())
}
