use anoncast_keystore::{xor_in_place, ChannelId, KeyStore, KeyStream, UUID_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::varint::{self, VarInt, INT_MAX_SIZE};

/// Sentinel closing every frame. A framing sanity check, not a checksum.
pub const TERMINATOR: u8 = 0b1011_0010;

/// Default maximum declared frame length: 16 MiB.
pub const DEFAULT_MAX_PACKAGE_SIZE: usize = 16 * 1024 * 1024;

/// Worst-case bytes a frame adds around its payload, excluding the
/// total-length prefix: three integers, the channel id and the terminator.
pub const MAX_FRAME_OVERHEAD: usize = 3 * INT_MAX_SIZE + UUID_SIZE + 1;

/// A decoded message and the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel recovered from the frame.
    pub channel: ChannelId,
    /// The decrypted payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: ChannelId, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// Largest payload that always encodes below `max_package_size`.
pub fn max_payload_len(max_package_size: usize) -> usize {
    max_package_size.saturating_sub(MAX_FRAME_OVERHEAD + 1)
}

/// Encrypt `payload` for `channel` and append the frame to `dst`.
///
/// Wire format:
/// ```text
/// ┌────────┬──────────┬─────────────┬───────────────┬──────────┬─────────┬──────┐
/// │ Total  │ IdKeyPos │ ChannelId   │ PayloadKeyPos │ Size     │ Payload │ 0xB2 │
/// │ varint │ varint   │ 16B         │ varint        │ varint   │         │      │
/// │ clear  │ clear    │ ^ id key    │ ^ id key      │ ^ payload key            │
/// └────────┴──────────┴─────────────┴───────────────┴──────────┴─────────┴──────┘
/// ```
///
/// Key bytes are reserved from the pack's outbound streams before anything
/// is written; if the payload stream is exhausted nothing is reserved.
pub fn encode_frame(
    store: &KeyStore,
    channel: ChannelId,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let pack = store
        .get_key_pack(channel)
        .ok_or(FrameError::NoKeyPack(channel))?;

    let mut payload_size_enc = VarInt::encode(payload.len() as u64);
    let payload_key_len = payload_size_enc.len() + payload.len();
    let payload_key_pos = pack.payload_out().allocate(payload_key_len as u64)?;
    let payload_key = pack.payload_out().read_at(payload_key_pos, payload_key_len)?;

    let mut payload_key_pos_enc = VarInt::encode(payload_key_pos);
    let id_key_len = UUID_SIZE + payload_key_pos_enc.len();
    let id_key_pos = pack.id_out().allocate(id_key_len as u64)?;
    let id_key = pack.id_out().read_at(id_key_pos, id_key_len)?;
    let id_key_pos_enc = VarInt::encode(id_key_pos);

    let mut channel_enc = *channel.as_bytes();
    let (channel_key, position_key) = id_key.split_at(UUID_SIZE);
    xor_in_place(&mut channel_enc, channel_key);
    xor_in_place(payload_key_pos_enc.as_mut_slice(), position_key);
    let (size_key, body_key) = payload_key.split_at(payload_size_enc.len());
    xor_in_place(payload_size_enc.as_mut_slice(), size_key);

    let body_len = id_key_pos_enc.len()
        + UUID_SIZE
        + payload_key_pos_enc.len()
        + payload_size_enc.len()
        + payload.len()
        + 1;
    let total_enc = VarInt::encode(body_len as u64);

    dst.reserve(total_enc.len() + body_len);
    dst.put_slice(total_enc.as_slice());
    dst.put_slice(id_key_pos_enc.as_slice());
    dst.put_slice(&channel_enc);
    dst.put_slice(payload_key_pos_enc.as_slice());
    dst.put_slice(payload_size_enc.as_slice());
    let payload_start = dst.len();
    dst.put_slice(payload);
    xor_in_place(&mut dst[payload_start..], body_key);
    dst.put_u8(TERMINATOR);

    trace!(id_key_pos, payload_key_pos, size = payload.len(), "encoded frame");
    Ok(())
}

/// Recover the channel and decrypt the payload of one complete frame.
///
/// `frame` starts at the total-length prefix and ends with the terminator.
/// Returns [`FrameError::UnknownChannel`] when no registered channel's
/// identity key matches, which means the frame is for someone else.
pub fn decode_frame(store: &KeyStore, frame: &[u8]) -> Result<Frame> {
    let Some((&last, body)) = frame.split_last() else {
        return Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        });
    };
    if last != TERMINATOR {
        return Err(FrameError::WrongTerminator { found: last });
    }

    let mut src = body;
    let (declared, width) = varint::decode(src)?;
    src.advance(width);
    if declared != (frame.len() - width) as u64 {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: frame.len() - width,
        });
    }

    let (id_key_pos, width) = varint::decode(src)?;
    src.advance(width);
    let encrypted_id = take(&mut src, UUID_SIZE)?;

    let channel = store
        .try_recover_channel_id(id_key_pos, encrypted_id)
        .ok_or(FrameError::UnknownChannel)?;
    // Removed between recovery and lookup: treat as not ours.
    let pack = store
        .get_key_pack(channel)
        .ok_or(FrameError::UnknownChannel)?;

    let (payload_key_pos, _) = decrypt_varint(
        pack.id_in(),
        id_key_pos.saturating_add(UUID_SIZE as u64),
        &mut src,
    )?;
    let (payload_size, size_width) = decrypt_varint(pack.payload_in(), payload_key_pos, &mut src)?;

    let payload_len = usize::try_from(payload_size).map_err(|_| FrameError::Truncated {
        needed: usize::MAX,
        available: src.len(),
    })?;
    let encrypted_payload = take(&mut src, payload_len)?;
    if !src.is_empty() {
        return Err(FrameError::TrailingBytes(src.len()));
    }

    let key = pack
        .payload_in()
        .read_at(payload_key_pos.saturating_add(size_width as u64), payload_len)?;
    let mut payload = encrypted_payload.to_vec();
    xor_in_place(&mut payload, &key);

    trace!(%channel, size = payload_len, "decoded frame");
    Ok(Frame::new(channel, payload))
}

/// Split one complete raw frame off the front of `src`.
///
/// Returns `Ok(None)` until the whole frame is buffered. A declared length
/// of zero or at least `max_package_size` fails with
/// [`FrameError::InvalidLength`]; the offending prefix is consumed.
pub fn split_frame(src: &mut BytesMut, max_package_size: usize) -> Result<Option<Bytes>> {
    let Some(&marker) = src.first() else {
        return Ok(None);
    };
    let width = match varint::width_from_marker(marker) {
        Ok(width) => width,
        Err(err) => {
            src.advance(1);
            return Err(err);
        }
    };
    if src.len() < width {
        return Ok(None);
    }

    let (size, _) = varint::decode(&src[..width])?;
    if size == 0 || size >= max_package_size as u64 {
        src.advance(width);
        return Err(FrameError::InvalidLength {
            size,
            max: max_package_size,
        });
    }

    let total = width + size as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    Ok(Some(src.split_to(total).freeze()))
}

/// Decrypt a variable-length integer whose key starts at `key_pos`.
///
/// Only the marker byte's key is read first, so the decode never asks the
/// stream for more key bytes than the integer occupies.
fn decrypt_varint(stream: &KeyStream, key_pos: u64, src: &mut &[u8]) -> Result<(u64, usize)> {
    let Some(&cipher_marker) = src.first() else {
        return Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        });
    };
    let marker_key = stream.read_at(key_pos, 1)?;
    let width = varint::width_from_marker(cipher_marker ^ marker_key[0])?;

    let cipher = take(src, width)?;
    let key = stream.read_at(key_pos, width)?;
    let mut plain = [0u8; INT_MAX_SIZE];
    plain[..width].copy_from_slice(cipher);
    xor_in_place(&mut plain[..width], &key);
    varint::decode(&plain[..width])
}

fn take<'a>(src: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if src.len() < n {
        return Err(FrameError::Truncated {
            needed: n,
            available: src.len(),
        });
    }
    let (head, tail) = src.split_at(n);
    *src = tail;
    Ok(head)
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Declared frame lengths must be below this. Default: 16 MiB.
    pub max_package_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
