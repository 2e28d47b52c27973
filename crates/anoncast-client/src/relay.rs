//! Broadcast relay: every frame a peer sends is forwarded to all other peers.
//!
//! The relay holds no keys and never decodes frames. It only checks the
//! length prefix so it can split the byte stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anoncast_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PACKAGE_SIZE};
use anoncast_transport::{connect, Endpoint, NetListener, NetStream};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::Result;

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `failures` consecutive accept errors: doubling from 10ms, capped at 1s.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(10);
    ACCEPT_BACKOFF_BASE.saturating_mul(factor).min(ACCEPT_BACKOFF_MAX)
}

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Frames declaring a length at or above this drop the sending peer.
    pub max_package_size: usize,
    /// Peers that cannot take a frame within this long are dropped.
    pub write_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

struct RelayPeer {
    label: String,
    writer: Mutex<FrameWriter<NetStream>>,
    control: NetStream,
}

struct Shared {
    peers: Mutex<HashMap<u64, Arc<RelayPeer>>>,
    stopped: AtomicBool,
}

impl Shared {
    fn lock_peers(&self) -> MutexGuard<'_, HashMap<u64, Arc<RelayPeer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_peer(&self, id: u64) {
        if let Some(peer) = self.lock_peers().remove(&id) {
            peer.control.shutdown();
            debug!(peer = %peer.label, "peer removed");
        }
    }

    fn broadcast(&self, from: u64, frame: &Bytes) {
        let targets: Vec<(u64, Arc<RelayPeer>)> = self
            .lock_peers()
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, peer)| (*id, Arc::clone(peer)))
            .collect();

        for (id, peer) in targets {
            let result = peer
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_raw_frame(frame);
            if let Err(err) = result {
                warn!(peer = %peer.label, error = %err, "dropping peer after failed forward");
                self.drop_peer(id);
            }
        }
    }
}

/// Handle for stopping a running relay from another thread.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Shared>,
    endpoint: Endpoint,
}

impl RelayHandle {
    /// Stop accepting, disconnect every peer and make `serve` return.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept.
        if let Err(err) = connect(&self.endpoint) {
            debug!(error = %err, "relay wake-up connect failed");
        }
        let peers: Vec<u64> = self.shared.lock_peers().keys().copied().collect();
        for id in peers {
            self.shared.drop_peer(id);
        }
    }
}

/// Broadcast relay server.
pub struct Relay {
    listener: NetListener,
    config: RelayConfig,
    shared: Arc<Shared>,
    next_peer_id: AtomicU64,
}

impl Relay {
    /// Bind the relay on `endpoint`.
    pub fn bind(endpoint: &Endpoint, config: RelayConfig) -> Result<Self> {
        let listener = NetListener::bind(endpoint)?;
        Ok(Self {
            listener,
            config,
            shared: Arc::new(Shared {
                peers: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// The endpoint actually bound (resolves port 0 for TCP).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        Ok(self.listener.local_endpoint()?)
    }

    pub fn handle(&self) -> Result<RelayHandle> {
        Ok(RelayHandle {
            shared: Arc::clone(&self.shared),
            endpoint: self.local_endpoint()?,
        })
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.shared.lock_peers().len()
    }

    /// Accept and serve peers until [`RelayHandle::stop`] is called.
    pub fn serve(&self) -> Result<()> {
        info!(endpoint = %self.local_endpoint()?, "relay serving");
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut accept_failures = 0u32;

        while !self.shared.stopped.load(Ordering::SeqCst) {
            let stream = match self.listener.accept() {
                Ok(stream) => {
                    accept_failures = 0;
                    stream
                }
                Err(err) => {
                    accept_failures = accept_failures.saturating_add(1);
                    let pause = accept_backoff(accept_failures);
                    warn!(error = %err, failures = accept_failures, ?pause, "accept failed");
                    std::thread::sleep(pause);
                    continue;
                }
            };
            if self.shared.stopped.load(Ordering::SeqCst) {
                stream.shutdown();
                break;
            }

            match self.register(stream) {
                Ok(worker) => workers.push(worker),
                Err(err) => warn!(error = %err, "failed to register peer"),
            }
            workers.retain(|worker| !worker.is_finished());
        }

        let remaining: Vec<u64> = self.shared.lock_peers().keys().copied().collect();
        for id in remaining {
            self.shared.drop_peer(id);
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("relay peer worker panicked");
            }
        }
        info!("relay stopped");
        Ok(())
    }

    fn register(&self, stream: NetStream) -> Result<JoinHandle<()>> {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let label = format!("peer-{id}@{}", stream.peer_label());
        let frame_config = FrameConfig {
            max_package_size: self.config.max_package_size,
            read_timeout: None,
            write_timeout: self.config.write_timeout,
        };

        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;
        let writer = FrameWriter::with_config_net(stream, frame_config.clone())
            .map_err(frame_to_io)?;
        let mut reader = FrameReader::with_config(reader_stream, frame_config);

        self.shared.lock_peers().insert(
            id,
            Arc::new(RelayPeer {
                label: label.clone(),
                writer: Mutex::new(writer),
                control,
            }),
        );
        info!(peer = %label, "peer connected");

        let shared = Arc::clone(&self.shared);
        let worker = std::thread::Builder::new()
            .name(format!("anoncast-relay-{id}"))
            .spawn(move || {
                loop {
                    match reader.read_raw_frame() {
                        Ok(frame) => shared.broadcast(id, &frame),
                        Err(FrameError::ConnectionClosed) => {
                            debug!(peer = %label, "peer disconnected");
                            break;
                        }
                        Err(err) => {
                            warn!(peer = %label, error = %err, "dropping peer");
                            break;
                        }
                    }
                }
                shared.drop_peer(id);
            })?;
        Ok(worker)
    }
}

fn frame_to_io(err: FrameError) -> std::io::Error {
    match err {
        FrameError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("listener", &self.listener)
            .field("peers", &self.peer_count())
            .finish()
    }
}
