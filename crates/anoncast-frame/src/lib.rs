//! One-time-pad frame codec with hidden channel identity.
//!
//! Every frame on the wire is:
//! - a variable-length total-length prefix
//! - a cleartext position into the sender's identity key stream
//! - the channel id and the payload key position, encrypted with identity key
//! - the payload length and payload, encrypted with payload key
//! - a one-byte terminator sentinel
//!
//! The channel id is never sent in clear; receivers recover it by trying
//! every known channel's inbound identity key.

pub mod codec;
pub mod error;
pub mod reader;
pub mod varint;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_frame, max_payload_len, split_frame, Frame, FrameConfig,
    DEFAULT_MAX_PACKAGE_SIZE, MAX_FRAME_OVERHEAD, TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use varint::INT_MAX_SIZE;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::RawFrameCodec;
