use std::fmt;
use std::io;

use anoncast_client::ClientError;
use anoncast_frame::FrameError;
use anoncast_keystore::KeyStoreError;
use anoncast_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const KEY_EXHAUSTED: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Accept(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn keystore_error(context: &str, err: KeyStoreError) -> CliError {
    match err {
        KeyStoreError::Storage { source, .. } | KeyStoreError::Io(source) => {
            io_error(context, source)
        }
        KeyStoreError::KeyExhausted { .. } => {
            CliError::new(KEY_EXHAUSTED, format!("{context}: {err}"))
        }
        KeyStoreError::Locked { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        KeyStoreError::NotFound(_)
        | KeyStoreError::AlreadyExists(_)
        | KeyStoreError::InvalidBundle { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::KeyMaterialExhausted(_) => {
            CliError::new(KEY_EXHAUSTED, format!("{context}: {err}"))
        }
        FrameError::NoKeyPack(_) => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::ConnectionFailed { source, .. } => transport_error(context, source),
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::KeyStore(err) => keystore_error(context, err),
        ClientError::BrokenPackageSend(err) | ClientError::BrokenPackageRecv(err) => {
            frame_error(context, err)
        }
        ClientError::Io(source) => io_error(context, source),
        ClientError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::ConnectionClosed | ClientError::Cancelled | ClientError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
