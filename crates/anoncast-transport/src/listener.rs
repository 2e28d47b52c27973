use std::net::TcpListener;

#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::PathBuf;

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::NetStream;

/// A bound listening socket.
pub struct NetListener {
    inner: NetListenerInner,
}

enum NetListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl NetListener {
    /// Permission mode applied to created Unix socket paths.
    #[cfg(unix)]
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on `endpoint`.
    ///
    /// For Unix sockets a stale socket file at the path is removed first;
    /// any other existing file is left alone and binding fails.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        let inner = match endpoint {
            Endpoint::Tcp(addr) => NetListenerInner::Tcp(TcpListener::bind(addr.as_str()).map_err(bind_err)?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if let Ok(metadata) = std::fs::symlink_metadata(path) {
                    if !metadata.file_type().is_socket() {
                        return Err(bind_err(std::io::Error::new(
                            std::io::ErrorKind::AlreadyExists,
                            "existing path is not a unix socket",
                        )));
                    }
                    debug!(?path, "removing stale socket");
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                std::fs::set_permissions(
                    path,
                    std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
                )
                .map_err(bind_err)?;
                NetListenerInner::Unix {
                    listener,
                    path: path.clone(),
                }
            }
        };

        let listener = Self { inner };
        info!(endpoint = %listener.local_endpoint()?, "listening");
        Ok(listener)
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<NetStream> {
        let stream = match &self.inner {
            NetListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().map_err(TransportError::Accept)?;
                stream.set_nodelay(true)?;
                debug!(%addr, "accepted connection");
                NetStream::from_tcp(stream)
            }
            #[cfg(unix)]
            NetListenerInner::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
                debug!("accepted connection");
                NetStream::from_unix(stream)
            }
        };
        Ok(stream)
    }

    /// The endpoint actually bound (resolves port 0 for TCP).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            NetListenerInner::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            NetListenerInner::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
        }
    }
}

#[cfg(unix)]
impl Drop for NetListener {
    fn drop(&mut self) {
        if let NetListenerInner::Unix { path, .. } = &self.inner {
            debug!(?path, "cleaning up socket file");
            let _ = std::fs::remove_file(path);
        }
    }
}

impl std::fmt::Debug for NetListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoint = self
            .local_endpoint()
            .map(|ep| ep.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        f.debug_struct("NetListener")
            .field("endpoint", &endpoint)
            .finish()
    }
}
