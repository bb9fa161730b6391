//! Share live objects between two connected processes.
//!
//! A [`Connection`] multiplexes one duplex byte stream into channels. Each
//! channel carries one shared object: one side hosts the real object, the
//! other holds a stand-in whose calls travel over the channel and come back
//! as values or faults.
//!
//! Opening a channel runs a short handshake that decides which side hosts.
//! After that the hosting side answers requests and the proxy side matches
//! responses to the calls waiting for them.
//!
//! ```no_run
//! use ipcshare_codec::TypeRef;
//! use ipcshare_peer::{arg, Connection, RemoteObject};
//! use ipcshare_transport::{Role, StreamPair};
//!
//! # async fn run(stream: StreamPair) -> ipcshare_peer::Result<()> {
//! let connection = Connection::new(Role::Initiator, stream);
//! let counter = connection
//!     .create_remote(TypeRef::named("Counter"), vec![arg(TypeRef::I64, 10i64)])
//!     .await?;
//! let counter = counter.downcast::<RemoteObject>().expect("default stand-in");
//! let value: i64 = counter.call_as("increment", vec![]).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
mod handshake;
pub mod host;
mod invoke;
pub mod proxy;

pub use channel::{Channel, ChannelState, SharedInstance};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionBuilder, NewChannels};
pub use error::{PeerError, Result};
pub use host::{Args, HostRegistry, Hosted, HostedInstance, Members, Method};
pub use ipcshare_transport::Role;
pub use proxy::{arg, Arg, Interceptor, ProxyFactory, RemoteObject, RemoteObjectFactory};
