use std::time::Duration;

use ipcshare_codec::Limits;
use ipcshare_frame::FrameConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Decoder limits for every value read from the peer.
    pub limits: Limits,
    /// Upper bound on answering a handshake the peer started.
    #[serde(with = "millis")]
    pub handshake_timeout: Duration,
    /// Queue depth of the new-channel broadcast; slow subscribers past this
    /// lag and skip notifications.
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            limits: Limits::default(),
            handshake_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_partial_json() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"handshake_timeout": 250, "limits": {"max_depth": 8}}"#)
                .unwrap();
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));
        assert_eq!(config.limits.max_depth, 8);
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.frame, FrameConfig::default());
    }

    #[test]
    fn config_serializes_timeout_as_millis() {
        let json = serde_json::to_value(ConnectionConfig::default()).unwrap();
        assert_eq!(json["handshake_timeout"], 5000);
    }
}
