//! Anonymous one-time-pad messaging client.
//!
//! A [`Client`] connects to a [`Relay`], sends frames for registered
//! channels and receives frames for any of them. Which channel a frame
//! belongs to is hidden from the relay and from other peers.

pub mod client;
pub mod config;
pub mod error;
pub mod relay;

#[cfg(feature = "async")]
pub mod async_client;

pub use client::Client;
pub use config::{keystore_path, ClientConfig, DEFAULT_ADDRESS, KEYSTORE_DIR};
pub use error::{ClientError, Result};
pub use relay::{Relay, RelayConfig, RelayHandle};

#[cfg(feature = "async")]
pub use async_client::AsyncClient;
