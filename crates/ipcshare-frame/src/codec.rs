use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Frame header: channel (8) + length (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// The channel this frame belongs to.
    pub channel: i64,
    /// Payload length; zero means the channel is closed.
    pub length: i32,
}

impl FrameHeader {
    pub fn new(channel: i64, length: i32) -> Self {
        Self { channel, length }
    }

    /// A zero-length header signalling that `channel` is closed.
    pub fn close(channel: i64) -> Self {
        Self { channel, length: 0 }
    }

    pub fn is_close(&self) -> bool {
        self.length == 0
    }

    /// Append the 12 header bytes to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_i64_le(self.channel);
        dst.put_i32_le(self.length);
    }

    pub fn decode(src: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &src[..];
        let channel = buf.get_i64_le();
        let length = buf.get_i32_le();
        Self { channel, length }
    }

    /// Validate the declared length against `max_payload` and return it as a size.
    pub fn payload_len(&self, max_payload: usize) -> Result<usize> {
        let len = usize::try_from(self.length).map_err(|_| FrameError::InvalidLength(self.length))?;
        if len > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: max_payload,
            });
        }
        Ok(len)
    }
}

/// A complete frame with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: i64,
    /// The message payload. Empty for a close frame.
    pub payload: Bytes,
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬─────────────┬──────────────────┐
/// │ Channel (8B LE)  │ Length      │ Payload          │
/// │ signed           │ (4B LE)     │ (Length bytes)   │
/// │                  │ signed      │                  │
/// └──────────────────┴─────────────┴──────────────────┘
/// ```
///
/// An empty `payload` produces a close frame.
pub fn encode_frame(channel: i64, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = i32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    FrameHeader::new(channel, length).encode(dst);
    dst.put_slice(payload);
    Ok(())
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(buf: &[u8]) -> FrameHeader {
        let raw: [u8; HEADER_SIZE] = buf[..HEADER_SIZE].try_into().unwrap();
        FrameHeader::decode(&raw)
    }

    #[test]
    fn encoded_frame_is_header_then_payload() {
        let mut buf = BytesMut::new();
        let payload = b"hello, ipcshare!";
        let channel = 0x0000_0007_0000_0000;

        encode_frame(channel, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());
        assert_eq!(header_of(&buf), FrameHeader::new(channel, payload.len() as i32));
        assert_eq!(&buf[HEADER_SIZE..], payload);
    }

    #[test]
    fn header_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_frame(0x0102, b"abc", &mut buf).unwrap();
        assert_eq!(
            &buf[..HEADER_SIZE],
            &[0x02, 0x01, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0]
        );
    }

    #[test]
    fn negative_channel_ids_survive() {
        let mut buf = BytesMut::new();
        encode_frame(-5, b"x", &mut buf).unwrap();
        assert_eq!(header_of(&buf).channel, -5);
    }

    #[test]
    fn payload_len_rejects_oversized() {
        let header = FrameHeader::new(1, 32 * 1024 * 1024);
        let result = header.payload_len(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn payload_len_rejects_negative() {
        let result = FrameHeader::new(1, -1).payload_len(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidLength(-1))));
    }

    #[test]
    fn empty_payload_is_close_frame() {
        let mut buf = BytesMut::new();
        encode_frame(9, b"", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let header = header_of(&buf);
        assert!(header.is_close());
        assert_eq!(header, FrameHeader::close(9));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: FrameConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, FrameConfig::default());
    }
}
