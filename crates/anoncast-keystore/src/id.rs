//! Channel identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of an encoded channel identifier in bytes.
pub const UUID_SIZE: usize = 16;

/// 128-bit channel identifier. Never sent in clear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Generate a random (v4) channel id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build a channel id from raw bytes.
    pub const fn from_bytes(bytes: [u8; UUID_SIZE]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw identifier bytes, as encrypted into frames.
    pub fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        self.0.as_bytes()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ChannelId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ChannelId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hyphenated lowercase form doubles as the on-disk directory name.
        write!(f, "{}", self.0.hyphenated())
    }
}
