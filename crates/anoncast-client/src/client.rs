//! Blocking client: one connection to a relay, shared by many threads.
//!
//! ```text
//!            start()              stop() / socket failure
//! Disconnected ──────▶ Connected ─────────────────────────▶ Disconnected
//!      │                   │
//!      └──── close() ──────┴──────────────────────────────▶ Closed
//! ```

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anoncast_frame::{Frame, FrameError, FrameReader, FrameWriter};
use anoncast_keystore::{ChannelId, KeyStore};
use anoncast_transport::{connect, NetStream};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

type SharedReader = Arc<Mutex<FrameReader<NetStream>>>;
type SharedWriter = Arc<Mutex<FrameWriter<NetStream>>>;

enum ConnectionState {
    Disconnected,
    Connected(Connection),
    Closed,
}

/// One live socket. Reads and writes use independent clones of the stream;
/// `control` shuts the socket down to unblock a pending read.
#[derive(Clone)]
struct Connection {
    generation: u64,
    reader: SharedReader,
    writer: SharedWriter,
    control: Arc<NetStream>,
}

/// Anonymous messaging client.
///
/// Sends encrypted frames for registered channels through a relay and
/// receives frames addressed to any of them. All methods take `&self`.
pub struct Client {
    store: Arc<KeyStore>,
    config: ClientConfig,
    state: Mutex<ConnectionState>,
    start_lock: Mutex<()>,
    next_generation: AtomicU64,
}

impl Client {
    /// Open the key store under `config.data_dir` and build a disconnected client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = KeyStore::load(config.keystore_path(), config.key_buffer_size)?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Build a disconnected client around an already opened store.
    pub fn with_store(store: Arc<KeyStore>, config: ClientConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            start_lock: Mutex::new(()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// The key store used for encoding and decoding.
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), ConnectionState::Connected(_))
    }

    /// Connect to the relay. Concurrent calls are serialized; starting an
    /// already connected client is a no-op.
    pub fn start(&self) -> Result<()> {
        let _starting = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match *self.lock_state() {
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Connected(_) => return Ok(()),
            ConnectionState::Disconnected => {}
        }

        let endpoint = &self.config.address;
        let failed = |source| ClientError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            source,
        };
        let stream = connect(endpoint).map_err(failed)?;
        stream.set_read_timeout(self.config.read_timeout).map_err(failed)?;
        stream.set_write_timeout(self.config.write_timeout).map_err(failed)?;
        let reader_stream = stream.try_clone().map_err(failed)?;
        let control = stream.try_clone().map_err(failed)?;

        let frame_config = self.config.frame_config();
        let connection = Connection {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            reader: Arc::new(Mutex::new(FrameReader::with_config(
                reader_stream,
                frame_config.clone(),
            ))),
            writer: Arc::new(Mutex::new(FrameWriter::with_config(stream, frame_config))),
            control: Arc::new(control),
        };

        let mut state = self.lock_state();
        if matches!(*state, ConnectionState::Closed) {
            connection.control.shutdown();
            return Err(ClientError::Closed);
        }
        info!(%endpoint, generation = connection.generation, "connected to relay");
        *state = ConnectionState::Connected(connection);
        Ok(())
    }

    /// Encrypt `payload` for `channel` and send it.
    ///
    /// Succeeds without sending anything when not connected. A frame that
    /// cannot be built fails with `BrokenPackageSend` and leaves the
    /// connection open; a socket failure closes it.
    pub fn write(&self, channel: ChannelId, payload: &[u8]) -> Result<()> {
        let Some(connection) = self.current()? else {
            trace!(%channel, "not connected, dropping outgoing message");
            return Ok(());
        };

        let result = connection
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(&self.store, channel, payload);

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_connection_error() => {
                warn!(error = %err, "write failed, closing connection");
                self.stop_if(connection.generation);
                Err(ClientError::ConnectionClosed)
            }
            Err(err) => Err(ClientError::BrokenPackageSend(err)),
        }
    }

    /// Block until a frame for one of our channels arrives.
    ///
    /// Frames for other channels are dropped silently. On a read timeout the
    /// connection stays open and a partially received frame is kept.
    pub fn receive(&self) -> Result<Frame> {
        loop {
            let Some(connection) = self.current()? else {
                return Err(ClientError::ConnectionClosed);
            };

            let result = connection
                .reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_frame(&self.store);

            match result {
                Ok(frame) => return Ok(frame),
                Err(err) if err.is_unknown_channel() => {
                    trace!("dropping frame for unknown channel");
                }
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(ClientError::Timeout);
                }
                Err(err) if err.is_connection_error() => {
                    debug!(error = %err, "read failed, closing connection");
                    self.stop_if(connection.generation);
                    return Err(ClientError::ConnectionClosed);
                }
                Err(err @ FrameError::InvalidLength { .. }) => {
                    warn!(error = %err, "received frame with invalid length");
                    if self.config.drop_on_broken_length {
                        self.stop_if(connection.generation);
                    }
                    return Err(ClientError::BrokenPackageRecv(err));
                }
                Err(err) => return Err(ClientError::BrokenPackageRecv(err)),
            }
        }
    }

    /// Close the connection if any. Idempotent; unblocks a pending `receive`.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if let ConnectionState::Connected(connection) = &*state {
            connection.control.shutdown();
            debug!(generation = connection.generation, "connection stopped");
            *state = ConnectionState::Disconnected;
        }
    }

    /// Stop and tear down the key store. The client is unusable afterwards.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if let ConnectionState::Connected(connection) = &*state {
            connection.control.shutdown();
        }
        if !matches!(*state, ConnectionState::Closed) {
            *state = ConnectionState::Closed;
            drop(state);
            self.store.close();
            info!("client closed");
        }
    }

    /// Stop only if the connection that failed is still the current one.
    fn stop_if(&self, generation: u64) {
        let mut state = self.lock_state();
        if let ConnectionState::Connected(connection) = &*state {
            if connection.generation == generation {
                connection.control.shutdown();
                *state = ConnectionState::Disconnected;
            }
        }
    }

    fn current(&self) -> Result<Option<Connection>> {
        match &*self.lock_state() {
            ConnectionState::Closed => Err(ClientError::Closed),
            ConnectionState::Disconnected => Ok(None),
            ConnectionState::Connected(connection) => Ok(Some(connection.clone())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address.to_string())
            .field("connected", &self.is_connected())
            .field("channels", &self.store.len())
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use anoncast_keystore::KeyPack;
    use anoncast_transport::{Endpoint, NetListener};

    use super::*;

    fn memory_client(address: Endpoint) -> (Client, ChannelId) {
        let id = ChannelId::new_random();
        let (ours, _) = KeyPack::generate_pair(id, 1024);
        let store = KeyStore::in_memory(0);
        store.insert_key_pack(ours).unwrap();
        let config = ClientConfig {
            address,
            ..ClientConfig::default()
        };
        (Client::with_store(Arc::new(store), config), id)
    }

    fn refused_endpoint() -> Endpoint {
        let listener = NetListener::bind(&Endpoint::tcp("127.0.0.1:0")).unwrap();
        listener.local_endpoint().unwrap()
    }

    #[test]
    fn write_while_disconnected_is_silent() {
        let (client, id) = memory_client(refused_endpoint());
        client.write(id, b"nobody listens").unwrap();

        let pack = client.store().get_key_pack(id).unwrap();
        assert_eq!(pack.payload_out().position(), 0);
    }

    #[test]
    fn receive_while_disconnected_is_connection_closed() {
        let (client, _) = memory_client(refused_endpoint());
        assert!(matches!(client.receive(), Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn start_failure_is_connection_failed() {
        let (client, _) = memory_client(refused_endpoint());
        assert!(matches!(
            client.start(),
            Err(ClientError::ConnectionFailed { .. })
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn start_is_idempotent_and_stop_is_repeatable() {
        let listener = NetListener::bind(&Endpoint::tcp("127.0.0.1:0")).unwrap();
        let (client, _) = memory_client(listener.local_endpoint().unwrap());

        client.start().unwrap();
        let _server = listener.accept().unwrap();
        client.start().unwrap();
        assert!(client.is_connected());

        client.stop();
        client.stop();
        assert!(!client.is_connected());
    }

    #[test]
    fn closed_client_rejects_everything() {
        let (client, id) = memory_client(refused_endpoint());
        client.close();
        client.close();

        assert!(matches!(client.start(), Err(ClientError::Closed)));
        assert!(matches!(client.write(id, b"x"), Err(ClientError::Closed)));
        assert!(matches!(client.receive(), Err(ClientError::Closed)));
        assert!(client.store().is_empty());
    }

    #[test]
    fn unknown_channel_is_broken_package_send() {
        let listener = NetListener::bind(&Endpoint::tcp("127.0.0.1:0")).unwrap();
        let (client, _) = memory_client(listener.local_endpoint().unwrap());
        client.start().unwrap();
        let _server = listener.accept().unwrap();

        let err = client.write(ChannelId::new_random(), b"x").unwrap_err();
        assert!(matches!(
            err,
            ClientError::BrokenPackageSend(FrameError::NoKeyPack(_))
        ));
        assert!(client.is_connected());
    }

    #[test]
    fn exhausted_channel_reports_key_exhaustion() {
        let listener = NetListener::bind(&Endpoint::tcp("127.0.0.1:0")).unwrap();
        let (client, id) = memory_client(listener.local_endpoint().unwrap());
        client.start().unwrap();
        let _server = listener.accept().unwrap();

        let err = client.write(id, &[0u8; 1024]).unwrap_err();
        assert!(err.is_key_exhausted());
        assert!(client.is_connected());
    }
}
