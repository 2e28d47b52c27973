use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{KeyStoreError, Result};
use crate::fs;

/// Which of the four directional streams of a pack this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Obfuscates our channel id and payload position on frames we send.
    IdOut,
    /// Mirror of the peer's `IdOut`.
    IdIn,
    /// Encrypts payload length and payload on frames we send.
    PayloadOut,
    /// Mirror of the peer's `PayloadOut`.
    PayloadIn,
}

impl StreamKind {
    /// All kinds, in on-disk order.
    pub const ALL: [StreamKind; 4] = [
        StreamKind::IdOut,
        StreamKind::IdIn,
        StreamKind::PayloadOut,
        StreamKind::PayloadIn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::IdOut => "id_out",
            StreamKind::IdIn => "id_in",
            StreamKind::PayloadOut => "payload_out",
            StreamKind::PayloadIn => "payload_in",
        }
    }

    /// File holding the key bytes.
    pub fn key_file(self) -> &'static str {
        match self {
            StreamKind::IdOut => "id_out.key",
            StreamKind::IdIn => "id_in.key",
            StreamKind::PayloadOut => "payload_out.key",
            StreamKind::PayloadIn => "payload_in.key",
        }
    }

    /// File holding the persisted allocation cursor.
    pub fn cursor_file(self) -> &'static str {
        match self {
            StreamKind::IdOut => "id_out.pos",
            StreamKind::IdIn => "id_in.pos",
            StreamKind::PayloadOut => "payload_out.pos",
            StreamKind::PayloadIn => "payload_in.pos",
        }
    }

    pub fn is_outbound(self) -> bool {
        matches!(self, StreamKind::IdOut | StreamKind::PayloadOut)
    }

    /// The kind the peer uses for the same bytes.
    pub fn mirror(self) -> Self {
        match self {
            StreamKind::IdOut => StreamKind::IdIn,
            StreamKind::IdIn => StreamKind::IdOut,
            StreamKind::PayloadOut => StreamKind::PayloadIn,
            StreamKind::PayloadIn => StreamKind::PayloadOut,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum KeySource {
    File { file: File, path: PathBuf },
    Memory(Bytes),
}

struct StreamState {
    /// `None` once the stream is closed.
    source: Option<KeySource>,
    cursor: u64,
    cursor_path: Option<PathBuf>,
}

/// An addressable source of pre-shared random bytes.
///
/// `allocate` hands out disjoint ranges from a cursor that only moves
/// forward; `read_at` fetches bytes anywhere without touching the cursor.
/// File-backed streams persist the cursor before an allocation returns.
pub struct KeyStream {
    kind: StreamKind,
    len: u64,
    state: Mutex<StreamState>,
}

impl KeyStream {
    /// Wrap in-memory key bytes. The cursor starts at zero and is not persisted.
    pub fn from_bytes(kind: StreamKind, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            kind,
            len: bytes.len() as u64,
            state: Mutex::new(StreamState {
                source: Some(KeySource::Memory(bytes)),
                cursor: 0,
                cursor_path: None,
            }),
        }
    }

    /// Open the `kind` stream stored in a pack directory, restoring its cursor.
    pub(crate) fn open(dir: &Path, kind: StreamKind) -> Result<Self> {
        let path = dir.join(kind.key_file());
        let file = File::open(&path).map_err(|e| KeyStoreError::storage(&path, e))?;
        let len = file
            .metadata()
            .map_err(|e| KeyStoreError::storage(&path, e))?
            .len();

        let cursor_path = dir.join(kind.cursor_file());
        let cursor = fs::read_cursor(&cursor_path)?;
        if cursor > len {
            return Err(KeyStoreError::storage(
                &cursor_path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("cursor {cursor} beyond key length {len}"),
                ),
            ));
        }

        debug!(stream = %kind, len, cursor, "opened key stream");
        Ok(Self {
            kind,
            len,
            state: Mutex::new(StreamState {
                source: Some(KeySource::File { file, path }),
                cursor,
                cursor_path: Some(cursor_path),
            }),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Total key bytes in the stream.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current allocation cursor.
    pub fn position(&self) -> u64 {
        self.lock().cursor
    }

    /// Bytes still available for allocation.
    pub fn remaining(&self) -> u64 {
        self.len - self.lock().cursor
    }

    /// Reserve `n` never-before-reserved bytes and return their start position.
    ///
    /// Exclusive under concurrent callers. A failed allocation reserves nothing.
    pub fn allocate(&self, n: u64) -> Result<u64> {
        if n == 0 {
            return Err(KeyStoreError::EmptyAllocation);
        }

        let mut state = self.lock();
        if state.source.is_none() {
            return Err(KeyStoreError::Closed(self.kind));
        }

        let start = state.cursor;
        let end = match start.checked_add(n) {
            Some(end) if end <= self.len => end,
            _ => {
                return Err(KeyStoreError::KeyExhausted {
                    stream: self.kind,
                    position: start,
                    requested: n,
                    available: self.len - start,
                })
            }
        };

        if let Some(path) = &state.cursor_path {
            fs::write_cursor(path, end)?;
        }
        state.cursor = end;

        trace!(stream = %self.kind, start, n, "allocated key bytes");
        Ok(start)
    }

    /// Read `n` key bytes at `position`.
    pub fn read_at(&self, position: u64, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_into(position, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` with key bytes starting at `position`.
    pub fn read_into(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let requested = buf.len() as u64;
        let in_range = position
            .checked_add(requested)
            .is_some_and(|end| end <= self.len);
        if !in_range {
            return Err(KeyStoreError::KeyExhausted {
                stream: self.kind,
                position,
                requested,
                available: self.len.saturating_sub(position),
            });
        }

        let mut state = self.lock();
        match state.source.as_mut() {
            None => Err(KeyStoreError::Closed(self.kind)),
            Some(KeySource::Memory(bytes)) => {
                let start = position as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                Ok(())
            }
            Some(KeySource::File { file, path }) => file
                .seek(SeekFrom::Start(position))
                .and_then(|_| file.read_exact(buf))
                .map_err(|e| KeyStoreError::storage(path.as_path(), e)),
        }
    }

    /// Release the backing storage. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.source.take().is_some() {
            debug!(stream = %self.kind, "closed key stream");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().source.is_none()
    }

    /// Write the full key contents to a new owner-only file.
    pub(crate) fn write_to(&self, dst: &Path) -> Result<()> {
        let state = self.lock();
        match state.source.as_ref() {
            None => Err(KeyStoreError::Closed(self.kind)),
            Some(KeySource::Memory(bytes)) => fs::write_private_file(dst, bytes),
            Some(KeySource::File { path, .. }) => fs::copy_private_file(path, dst),
        }
    }

    /// Copy of the full key contents.
    pub(crate) fn to_bytes(&self) -> Result<Bytes> {
        let mut state = self.lock();
        match state.source.as_mut() {
            None => Err(KeyStoreError::Closed(self.kind)),
            Some(KeySource::Memory(bytes)) => Ok(bytes.clone()),
            Some(KeySource::File { file, path }) => {
                let mut out = Vec::with_capacity(self.len as usize);
                file.seek(SeekFrom::Start(0))
                    .and_then(|_| file.read_to_end(&mut out))
                    .map_err(|e| KeyStoreError::storage(path.as_path(), e))?;
                Ok(Bytes::from(out))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let backing = match &state.source {
            None => "closed",
            Some(KeySource::File { .. }) => "file",
            Some(KeySource::Memory(_)) => "memory",
        };
        f.debug_struct("KeyStream")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("cursor", &state.cursor)
            .field("backing", &backing)
            .finish()
    }
}
