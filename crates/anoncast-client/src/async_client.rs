use std::sync::Arc;

use anoncast_frame::{decode_frame, encode_frame, max_payload_len, Frame, FrameError, RawFrameCodec};
use anoncast_keystore::{ChannelId, KeyStore};
use anoncast_transport::Endpoint;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type FrameStream = FramedRead<BoxedRead, RawFrameCodec>;
type FrameSink = FramedWrite<BoxedWrite, RawFrameCodec>;

/// Tokio client bound to a single connection.
///
/// Waits are cut short by a [`CancellationToken`] instead of socket
/// timeouts. Once the connection drops, create a new client on the same
/// store to reconnect.
pub struct AsyncClient {
    store: Arc<KeyStore>,
    config: ClientConfig,
    reader: Mutex<Option<FrameStream>>,
    writer: Mutex<Option<FrameSink>>,
    disconnected: CancellationToken,
}

impl AsyncClient {
    /// Dial `config.address` and return a connected client.
    pub async fn connect(store: Arc<KeyStore>, config: ClientConfig) -> Result<Self> {
        let (read_half, write_half) = dial(&config.address).await?;
        let codec = RawFrameCodec::new(config.max_package_size);
        info!(endpoint = %config.address, "connected to relay");

        Ok(Self {
            store,
            reader: Mutex::new(Some(FramedRead::new(read_half, codec))),
            writer: Mutex::new(Some(FramedWrite::new(write_half, codec))),
            config,
            disconnected: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.is_cancelled()
    }

    /// Encrypt and send. Succeeds without sending when disconnected.
    pub async fn write(&self, channel: ChannelId, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if self.disconnected.is_cancelled() {
            // The read side saw the connection drop; never reserve pad bytes for it.
            *writer = None;
        }
        let Some(sink) = writer.as_mut() else {
            trace!(%channel, "not connected, dropping outgoing message");
            return Ok(());
        };

        let max = max_payload_len(self.config.max_package_size);
        if payload.len() > max {
            return Err(ClientError::BrokenPackageSend(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }));
        }
        let mut buf = BytesMut::new();
        encode_frame(&self.store, channel, payload, &mut buf)
            .map_err(ClientError::BrokenPackageSend)?;

        if let Err(err) = sink.send(buf.freeze()).await {
            warn!(error = %err, "write failed, closing connection");
            *writer = None;
            self.disconnected.cancel();
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    /// Wait for a frame addressed to one of our channels.
    ///
    /// Returns `Cancelled` when `cancel` fires first; the connection and
    /// any partially received frame are kept.
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        loop {
            let Some(stream) = reader.as_mut() else {
                return Err(ClientError::ConnectionClosed);
            };

            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = self.disconnected.cancelled() => None,
                next = stream.next() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                None => {
                    debug!("connection closed");
                    *reader = None;
                    self.disconnected.cancel();
                    return Err(ClientError::ConnectionClosed);
                }
                Some(Err(err)) if err.is_connection_error() => {
                    debug!(error = %err, "read failed, closing connection");
                    *reader = None;
                    self.disconnected.cancel();
                    return Err(ClientError::ConnectionClosed);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "received frame with invalid length");
                    if self.config.drop_on_broken_length {
                        *reader = None;
                        self.disconnected.cancel();
                    } else if let Some(stream) = reader.take() {
                        *reader = Some(resume_after_error(stream));
                    }
                    return Err(ClientError::BrokenPackageRecv(err));
                }
            };

            match decode_frame(&self.store, &raw) {
                Ok(frame) => return Ok(frame),
                Err(err) if err.is_unknown_channel() => trace!("dropping frame for unknown channel"),
                Err(err) => return Err(ClientError::BrokenPackageRecv(err)),
            }
        }
    }

    /// Close the connection. Idempotent; wakes a pending `receive`.
    pub async fn stop(&self) {
        self.disconnected.cancel();
        if let Some(mut sink) = self.writer.lock().await.take() {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "shutdown on closed stream");
            }
        }
    }

    /// Stop, then tear down the key store.
    pub async fn close(&self) {
        self.stop().await;
        self.store.close();
    }
}

/// A framed stream stops after yielding a decode error; rebuild it around
/// the same socket and buffered bytes so reading can continue.
fn resume_after_error(stream: FrameStream) -> FrameStream {
    let codec = *stream.decoder();
    let pending = stream.read_buffer().clone();
    let mut resumed = FramedRead::new(stream.into_inner(), codec);
    resumed.read_buffer_mut().extend_from_slice(&pending);
    resumed
}

async fn dial(endpoint: &Endpoint) -> Result<(BoxedRead, BoxedWrite)> {
    let failed = |source: std::io::Error| ClientError::ConnectionFailed {
        endpoint: endpoint.to_string(),
        source: anoncast_transport::TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        },
    };

    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str())
                .await
                .map_err(failed)?;
            stream.set_nodelay(true).map_err(failed)?;
            let (read_half, write_half) = stream.into_split();
            Ok((Box::new(read_half), Box::new(write_half)))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await.map_err(failed)?;
            let (read_half, write_half) = stream.into_split();
            Ok((Box::new(read_half), Box::new(write_half)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anoncast_keystore::KeyPack;
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn stores() -> (Arc<KeyStore>, Arc<KeyStore>, ChannelId) {
        let id = ChannelId::new_random();
        let (ours, theirs) = KeyPack::generate_pair(id, 8192);
        let a = KeyStore::in_memory(0);
        let b = KeyStore::in_memory(0);
        a.insert_key_pack(ours).unwrap();
        b.insert_key_pack(theirs).unwrap();
        (Arc::new(a), Arc::new(b), id)
    }

    #[tokio::test]
    async fn receives_frames_written_to_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (sender, receiver, id) = stores();

        let client = AsyncClient::connect(receiver, ClientConfig::new("unused", endpoint))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let mut wire = BytesMut::new();
        let (_, stranger, foreign) = stores();
        encode_frame(&stranger, foreign, b"not ours", &mut wire).unwrap();
        encode_frame(&sender, id, b"ours", &mut wire).unwrap();
        server.write_all(&wire).await.unwrap();

        let frame = client.receive(&CancellationToken::new()).await.unwrap();
        assert_eq!(frame.channel, id);
        assert_eq!(frame.payload.as_ref(), b"ours");
    }

    #[tokio::test]
    async fn cancellation_keeps_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (_, receiver, _) = stores();

        let client = AsyncClient::connect(receiver, ClientConfig::new("unused", endpoint))
            .await
            .unwrap();
        let _server = listener.accept().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(matches!(
            client.receive(&cancel).await,
            Err(ClientError::Cancelled)
        ));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn stop_then_write_is_silent_and_receive_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (sender, _, id) = stores();

        let client = AsyncClient::connect(Arc::clone(&sender), ClientConfig::new("unused", endpoint))
            .await
            .unwrap();
        let _server = listener.accept().await.unwrap();

        client.stop().await;
        client.stop().await;
        client.write(id, b"dropped").await.unwrap();
        assert_eq!(sender.get_key_pack(id).unwrap().payload_out().position(), 0);
        assert!(matches!(
            client.receive(&CancellationToken::new()).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn write_after_peer_hangup_reserves_nothing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (sender, _, id) = stores();

        let client = AsyncClient::connect(Arc::clone(&sender), ClientConfig::new("unused", endpoint))
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        assert!(matches!(
            client.receive(&CancellationToken::new()).await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(!client.is_connected());

        client.write(id, b"hello").await.unwrap();
        let pack = sender.get_key_pack(id).unwrap();
        assert_eq!(pack.payload_out().position(), 0);
        assert_eq!(pack.id_out().position(), 0);
    }

    #[tokio::test]
    async fn broken_length_then_next_frame_is_read() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (sender, receiver, id) = stores();

        let client = AsyncClient::connect(receiver, ClientConfig::new("unused", endpoint))
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let mut wire = BytesMut::from(&[0x00u8][..]);
        encode_frame(&sender, id, b"after the junk", &mut wire).unwrap();
        server.write_all(&wire).await.unwrap();

        let cancel = CancellationToken::new();
        assert!(matches!(
            client.receive(&cancel).await,
            Err(ClientError::BrokenPackageRecv(FrameError::InvalidLength { size: 0, .. }))
        ));
        assert!(client.is_connected());

        let frame = client.receive(&cancel).await.unwrap();
        assert_eq!(frame.channel, id);
        assert_eq!(frame.payload.as_ref(), b"after the junk");
    }

    #[tokio::test]
    async fn broken_length_can_force_disconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (sender, receiver, id) = stores();

        let config = ClientConfig {
            drop_on_broken_length: true,
            ..ClientConfig::new("unused", endpoint)
        };
        let client = AsyncClient::connect(receiver, config).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        server.write_all(&[0x00]).await.unwrap();

        assert!(matches!(
            client.receive(&CancellationToken::new()).await,
            Err(ClientError::BrokenPackageRecv(_))
        ));
        assert!(!client.is_connected());
        client.write(id, b"dropped").await.unwrap();
        assert_eq!(sender.get_key_pack(id).unwrap().payload_out().position(), 0);
    }
}
