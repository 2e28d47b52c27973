//! Anonymous messaging over a shared broadcast relay.
//!
//! Peers exchange one-time-pad key material out of band, then talk through
//! a relay that sees only opaque frames: neither the payload nor the
//! channel a frame belongs to is visible on the wire.
//!
//! # Crate Structure
//!
//! - [`keystore`]: channel ids, key streams, key packs and their persistence
//! - [`transport`]: TCP and Unix stream sockets
//! - [`frame`]: the encrypted frame codec and buffered frame I/O
//! - [`client`]: the messaging client and the broadcast relay

/// Re-export key store types.
pub mod keystore {
    pub use anoncast_keystore::*;
}

/// Re-export transport types.
pub mod transport {
    pub use anoncast_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use anoncast_frame::*;
}

/// Re-export client and relay types.
pub mod client {
    pub use anoncast_client::*;
}

pub use anoncast_client::{Client, ClientConfig, ClientError, Relay, RelayConfig};
pub use anoncast_frame::Frame;
pub use anoncast_keystore::{ChannelId, KeyStore};
