use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{split_frame, DEFAULT_MAX_PACKAGE_SIZE};
use crate::error::{FrameError, Result};

/// Splits a byte stream into raw, still encrypted frames.
///
/// Decryption needs the key store, so it happens after the codec; pair this
/// with [`crate::decode_frame`]. Encoding writes already encoded frames.
#[derive(Debug, Clone, Copy)]
pub struct RawFrameCodec {
    max_package_size: usize,
}

impl RawFrameCodec {
    pub fn new(max_package_size: usize) -> Self {
        Self { max_package_size }
    }

    pub fn max_package_size(&self) -> usize {
        self.max_package_size
    }
}

impl Default for RawFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKAGE_SIZE)
    }
}

impl Decoder for RawFrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        split_frame(src, self.max_package_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for RawFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.put_slice(&item);
        Ok(())
    }
}
