//! Share live objects between two processes.
//!
//! One process hosts an object; the other receives a stand-in whose method
//! calls travel over a single duplex byte stream and come back as values or
//! faults. The stream is multiplexed into independent channels, one per
//! shared object.
//!
//! # Crate Structure
//!
//! - [`transport`]: connected stream pairs and the connection role
//! - [`frame`]: channel-multiplexed framing and per-channel stream buffers
//! - [`codec`]: the tagged binary value codec
//! - [`peer`]: connections, channels, hosting and stand-ins (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipcshare_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipcshare_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use ipcshare_codec::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ipcshare_peer::*;
}
