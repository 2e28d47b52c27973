//! Stream socket transport for anoncast.
//!
//! Provides a unified connect/bind/accept surface over:
//! - TCP (`host:port` or `tcp://host:port`)
//! - Unix domain sockets (`unix:/path/to.sock`, Unix only)
//!
//! This is the lowest layer of anoncast. It knows nothing about frames or
//! keys; everything else builds on the [`NetStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::NetListener;
pub use stream::{connect, NetStream};
