use anoncast_keystore::{ChannelId, KeyStoreError};

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// No key pack is registered for the channel being sent on.
    #[error("no key pack for channel {0}")]
    NoKeyPack(ChannelId),

    /// The last byte of the frame is not the terminator sentinel.
    #[error("wrong frame terminator 0x{found:02x}")]
    WrongTerminator { found: u8 },

    /// No registered channel's identity key matches the frame.
    #[error("frame is not addressed to any known channel")]
    UnknownChannel,

    /// A key stream ran out of material.
    #[error("key material exhausted: {0}")]
    KeyMaterialExhausted(#[source] KeyStoreError),

    /// Any other key store failure (closed stream, storage I/O).
    #[error("key store error: {0}")]
    KeyStore(#[source] KeyStoreError),

    /// A variable-length integer has an invalid length marker.
    #[error("malformed variable-length integer (marker 0x{marker:02x})")]
    MalformedInteger { marker: u8 },

    /// The frame ended before a field was complete.
    #[error("truncated frame (needed {needed} bytes, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// The frame has bytes left over after the payload.
    #[error("{0} unexpected trailing bytes in frame")]
    TrailingBytes(usize),

    /// The declared total length does not match the frame.
    #[error("declared frame length {declared} does not match actual {actual}")]
    LengthMismatch { declared: u64, actual: usize },

    /// The declared length prefix is zero or not below the configured maximum.
    #[error("invalid declared frame length {size} (must be in 1..{max})")]
    InvalidLength { size: u64, max: usize },

    /// The payload cannot fit in a frame below the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the frame was simply not meant for us.
    pub fn is_unknown_channel(&self) -> bool {
        matches!(self, Self::UnknownChannel)
    }

    /// Whether the error came from the underlying stream rather than the frame.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}

impl From<KeyStoreError> for FrameError {
    fn from(err: KeyStoreError) -> Self {
        if err.is_exhausted() {
            Self::KeyMaterialExhausted(err)
        } else {
            Self::KeyStore(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
