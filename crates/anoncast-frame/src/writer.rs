use std::io::{ErrorKind, Write};

use anoncast_keystore::{ChannelId, KeyStore};
use anoncast_transport::NetStream;
use bytes::BytesMut;

use crate::codec::{encode_frame, max_payload_len, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Frame sink over any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Writer with [`FrameConfig::default`].
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Writer with the given limits.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encrypt `payload` for `channel` and send it (blocking).
    ///
    /// Payloads that could not fit below the configured maximum frame size
    /// are refused before any key material is reserved.
    pub fn send(&mut self, store: &KeyStore, channel: ChannelId, payload: &[u8]) -> Result<()> {
        let max = max_payload_len(self.config.max_package_size);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let result = encode_frame(store, channel, payload, &mut buf)
            .and_then(|()| self.write_raw_frame(&buf));
        self.buf = buf;
        result
    }

    /// Write an already encoded frame (blocking).
    ///
    /// A write timeout surfaces as `FrameError::Io`; the frame may then be
    /// partially written and the stream must not be reused.
    pub fn write_raw_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the wrapped stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// The wrapped stream, mutably.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the maximum frame size for subsequent sends.
    pub fn set_max_package_size(&mut self, max_package_size: usize) {
        self.config.max_package_size = max_package_size;
    }

    /// Limits in effect.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<NetStream> {
    /// Create a frame writer for `NetStream` and apply write timeout from config.
    pub fn with_config_net(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
