use std::path::{Path, PathBuf};
use std::time::Duration;

use anoncast_frame::{FrameConfig, DEFAULT_MAX_PACKAGE_SIZE};
use anoncast_keystore::DEFAULT_BUFFER_SIZE;
use anoncast_transport::Endpoint;

/// Default relay address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7400";

/// Name of the key store directory inside the data directory.
pub const KEYSTORE_DIR: &str = "keystore";

/// Client construction parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding client state; the key store lives in `<data_dir>/keystore`.
    pub data_dir: PathBuf,
    /// Relay to connect to.
    pub address: Endpoint,
    /// Random bytes generated per stream when a new channel is created.
    pub key_buffer_size: u64,
    /// Declared frame lengths must be below this.
    pub max_package_size: usize,
    /// Socket read timeout; `None` blocks until a frame or disconnect.
    pub read_timeout: Option<Duration>,
    /// Socket write timeout.
    pub write_timeout: Option<Duration>,
    /// Close the connection when a frame declares an invalid length.
    ///
    /// Off by default: the offending prefix is skipped and the connection
    /// stays open.
    pub drop_on_broken_length: bool,
}

impl ClientConfig {
    /// Config for `address` with state under `data_dir` and defaults elsewhere.
    pub fn new(data_dir: impl Into<PathBuf>, address: Endpoint) -> Self {
        Self {
            data_dir: data_dir.into(),
            address,
            ..Self::default()
        }
    }

    /// Key store root derived from the data directory.
    pub fn keystore_path(&self) -> PathBuf {
        keystore_path(&self.data_dir)
    }

    /// Frame reader/writer settings derived from this config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_package_size: self.max_package_size,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("anoncast-data"),
            address: Endpoint::tcp(DEFAULT_ADDRESS),
            key_buffer_size: DEFAULT_BUFFER_SIZE,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
            drop_on_broken_length: false,
        }
    }
}

/// Key store root for a data directory.
pub fn keystore_path(data_dir: &Path) -> PathBuf {
    data_dir.join(KEYSTORE_DIR)
}
