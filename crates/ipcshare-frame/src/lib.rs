//! Channel-multiplexed framing for a single duplex byte stream.
//!
//! Every unit on the wire is framed with:
//! - an 8-byte little-endian signed channel id
//! - a 4-byte little-endian signed payload length
//! - exactly that many payload bytes
//!
//! A zero length carries no payload and means "this channel is closed".
//!
//! Besides the wire codec this crate provides role-partitioned channel id
//! allocation and the [`StreamBuffer`] that turns frame-sized pushes into
//! exact-length reads for a single consumer.

pub mod buffer;
pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use buffer::{ReadRequest, StreamBuffer, PAGE_SIZE};
pub use channel::{originated_by, ChannelIdAllocator};
pub use codec::{encode_frame, Frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
