//! Self-describing variable-length unsigned integers.
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ Marker (1B)  │ Value (marker bytes, BE) │
//! │ 0..=8        │ leading zeros stripped   │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! Zero encodes as the single byte `0x00`. Decoding reports both the value
//! and how many bytes it occupied.

use crate::error::{FrameError, Result};

/// Widest possible encoding: marker plus eight value bytes.
pub const INT_MAX_SIZE: usize = 9;

/// An encoded integer, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt {
    buf: [u8; INT_MAX_SIZE],
    len: usize,
}

impl VarInt {
    pub fn encode(value: u64) -> Self {
        let width = encoded_len(value);
        let mut buf = [0u8; INT_MAX_SIZE];
        buf[0] = (width - 1) as u8;
        buf[1..width].copy_from_slice(&value.to_be_bytes()[INT_MAX_SIZE - width..]);
        Self { buf, len: width }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    let significant = 8 - (value.leading_zeros() / 8) as usize;
    1 + significant
}

/// Total encoded width announced by a marker byte.
pub fn width_from_marker(marker: u8) -> Result<usize> {
    let value_bytes = marker as usize;
    if value_bytes > INT_MAX_SIZE - 1 {
        return Err(FrameError::MalformedInteger { marker });
    }
    Ok(1 + value_bytes)
}

/// Decode an integer from the front of `src`, returning `(value, width)`.
pub fn decode(src: &[u8]) -> Result<(u64, usize)> {
    let Some(&marker) = src.first() else {
        return Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        });
    };
    let width = width_from_marker(marker)?;
    if src.len() < width {
        return Err(FrameError::Truncated {
            needed: width,
            available: src.len(),
        });
    }

    let value = src[1..width]
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));
    Ok((value, width))
}
