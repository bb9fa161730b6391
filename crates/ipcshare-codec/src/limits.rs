use serde::{Deserialize, Serialize};

/// Bounds applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum nesting of arrays, enums and records.
    pub max_depth: usize,
    /// Maximum element, field or byte count taken from a length prefix.
    pub max_collection_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_collection_len: 16 * 1024 * 1024,
        }
    }
}

impl Limits {
    pub(crate) fn check_len(&self, what: &'static str, size: usize) -> crate::Result<()> {
        if size > self.max_collection_len {
            return Err(crate::CodecError::LimitExceeded {
                what,
                size,
                max: self.max_collection_len,
            });
        }
        Ok(())
    }
}
