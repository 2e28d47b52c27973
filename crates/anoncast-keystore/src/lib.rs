//! Pre-shared one-time-pad key material for anoncast channels.
//!
//! Every channel owns a [`KeyPack`] of four directional [`KeyStream`]s:
//! - `id_out` / `id_in` obfuscate the channel identifier on the wire
//! - `payload_out` / `payload_in` encrypt the payload
//!
//! Outbound streams hand out key bytes through [`KeyStream::allocate`], which
//! never returns the same byte twice, not even across restarts. The
//! [`KeyStore`] registry owns all packs and recovers the channel of an
//! incoming frame without the identifier ever being sent in clear.

pub mod bundle;
pub mod error;
mod fs;
pub mod id;
pub mod pack;
pub mod store;
pub mod stream;

pub use bundle::{BundleManifest, BUNDLE_FORMAT, BUNDLE_MANIFEST};
pub use error::{KeyStoreError, Result};
pub use id::{ChannelId, UUID_SIZE};
pub use pack::KeyPack;
pub use store::{KeyStore, DEFAULT_BUFFER_SIZE};
pub use stream::{KeyStream, StreamKind};

/// XOR `key` into `data` in place.
///
/// Only the overlapping prefix is touched; callers size both sides.
pub fn xor_in_place(data: &mut [u8], key: &[u8]) {
    for (byte, k) in data.iter_mut().zip(key) {
        *byte ^= k;
    }
}
