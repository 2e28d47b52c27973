use anoncast_frame::FrameError;
use anoncast_keystore::KeyStoreError;
use anoncast_transport::TransportError;

/// Errors that can occur in client and relay operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Dialing the relay failed; no connection was established.
    #[error("connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The connection is gone (never started, stopped, or failed mid-stream).
    #[error("connection already closed")]
    ConnectionClosed,

    /// A frame could not be built; the connection is unaffected.
    #[error("attempted to send a broken package: {0}")]
    BrokenPackageSend(#[source] FrameError),

    /// A received frame was malformed or could not be decrypted.
    #[error("received a broken package: {0}")]
    BrokenPackageRecv(#[source] FrameError),

    /// No frame arrived within the configured read timeout.
    #[error("receive timed out")]
    Timeout,

    /// The wait was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The client was closed and can no longer be used.
    #[error("client is closed")]
    Closed,

    /// Key store error.
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error outside the frame stream (worker spawn, stream setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether a send failed because the channel ran out of key material.
    ///
    /// Permanent for that channel until new material is shared.
    pub fn is_key_exhausted(&self) -> bool {
        matches!(
            self,
            Self::BrokenPackageSend(FrameError::KeyMaterialExhausted(_))
                | Self::BrokenPackageRecv(FrameError::KeyMaterialExhausted(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
