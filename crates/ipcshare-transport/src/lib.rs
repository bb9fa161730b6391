//! Connected duplex byte streams for ipcshare.
//!
//! This is the lowest layer of ipcshare. The process bootstrap hands the
//! connection layer two already-connected stream halves and a [`Role`];
//! everything else builds on the [`StreamPair`] provided here.
//!
//! Sources of stream pairs:
//! - any `AsyncRead + AsyncWrite` value, split into halves
//! - in-process memory pipes (tests, same-process peers)
//! - Unix domain sockets, either bound by path or as an anonymous pair

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{BoxedReader, BoxedWriter, Role, StreamPair};

#[cfg(unix)]
pub use uds::{unix_pair, UnixDomainSocket};
