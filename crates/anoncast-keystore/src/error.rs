use std::path::PathBuf;

use crate::id::ChannelId;
use crate::stream::StreamKind;

/// Errors that can occur while managing key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// A key pack for this channel is already registered or on disk.
    #[error("key pack {0} already exists")]
    AlreadyExists(ChannelId),

    /// No key pack is registered for this channel.
    #[error("no key pack for channel {0}")]
    NotFound(ChannelId),

    /// The stream does not hold enough key bytes for the request.
    #[error(
        "{stream} key material exhausted (requested {requested} bytes at {position}, {available} available)"
    )]
    KeyExhausted {
        stream: StreamKind,
        position: u64,
        requested: u64,
        available: u64,
    },

    /// Allocations must reserve at least one byte.
    #[error("cannot allocate zero key bytes")]
    EmptyAllocation,

    /// The stream was torn down.
    #[error("{0} key stream is closed")]
    Closed(StreamKind),

    /// A shared-secret bundle is missing pieces or malformed.
    #[error("invalid key bundle at {path}: {reason}")]
    InvalidBundle { path: PathBuf, reason: String },

    /// Another open store already holds this root.
    #[error("key store {path} is in use by another process")]
    Locked { path: PathBuf },

    /// Filesystem error on a specific key store path.
    #[error("key store I/O error on {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error without path context.
    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyStoreError {
    /// Whether this error means the stream ran out of key bytes.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::KeyExhausted { .. })
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, KeyStoreError>;
