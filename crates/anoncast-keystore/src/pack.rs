use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use crate::bundle::BundleManifest;
use crate::error::{KeyStoreError, Result};
use crate::fs;
use crate::id::ChannelId;
use crate::stream::{KeyStream, StreamKind};

/// The four directional key streams of one channel.
#[derive(Debug)]
pub struct KeyPack {
    id: ChannelId,
    dir: Option<PathBuf>,
    id_out: KeyStream,
    id_in: KeyStream,
    payload_out: KeyStream,
    payload_in: KeyStream,
}

impl KeyPack {
    /// Assemble a pack from already opened streams.
    pub fn from_streams(
        id: ChannelId,
        id_out: KeyStream,
        id_in: KeyStream,
        payload_out: KeyStream,
        payload_in: KeyStream,
    ) -> Self {
        Self {
            id,
            dir: None,
            id_out,
            id_in,
            payload_out,
            payload_in,
        }
    }

    /// Generate fresh in-memory material for both ends of a channel.
    ///
    /// The second pack's inbound streams mirror the first pack's outbound ones
    /// and vice versa.
    pub fn generate_pair(id: ChannelId, stream_len: usize) -> (Self, Self) {
        let random = || {
            let mut buf = vec![0u8; stream_len];
            OsRng.fill_bytes(&mut buf);
            Bytes::from(buf)
        };
        let (a_id, b_id, a_payload, b_payload) = (random(), random(), random(), random());

        let ours = Self::from_streams(
            id,
            KeyStream::from_bytes(StreamKind::IdOut, a_id.clone()),
            KeyStream::from_bytes(StreamKind::IdIn, b_id.clone()),
            KeyStream::from_bytes(StreamKind::PayloadOut, a_payload.clone()),
            KeyStream::from_bytes(StreamKind::PayloadIn, b_payload.clone()),
        );
        let theirs = Self::from_streams(
            id,
            KeyStream::from_bytes(StreamKind::IdOut, b_id),
            KeyStream::from_bytes(StreamKind::IdIn, a_id),
            KeyStream::from_bytes(StreamKind::PayloadOut, b_payload),
            KeyStream::from_bytes(StreamKind::PayloadIn, a_payload),
        );
        (ours, theirs)
    }

    /// Create a pack directory at `dir` filled with fresh random material.
    pub(crate) fn create(dir: &Path, id: ChannelId, stream_len: u64) -> Result<Self> {
        make_pack_dir(dir, id)?;
        let filled = StreamKind::ALL
            .iter()
            .try_for_each(|kind| fs::write_random_file(&dir.join(kind.key_file()), stream_len));
        if let Err(err) = filled {
            let _ = std::fs::remove_dir_all(dir);
            return Err(err);
        }

        info!(channel = %id, stream_len, "created key pack");
        Self::open(dir, id)
    }

    /// Reopen a pack directory written earlier.
    pub(crate) fn open(dir: &Path, id: ChannelId) -> Result<Self> {
        let pack = Self {
            id,
            dir: Some(dir.to_path_buf()),
            id_out: KeyStream::open(dir, StreamKind::IdOut)?,
            id_in: KeyStream::open(dir, StreamKind::IdIn)?,
            payload_out: KeyStream::open(dir, StreamKind::PayloadOut)?,
            payload_in: KeyStream::open(dir, StreamKind::PayloadIn)?,
        };
        debug!(channel = %id, ?dir, "loaded key pack");
        Ok(pack)
    }

    /// Materialize a pack from a bundle.
    ///
    /// With `dir` the streams are copied there with fresh cursors; without it
    /// they are read into memory.
    pub(crate) fn import(bundle: &Path, manifest: &BundleManifest, dir: Option<&Path>) -> Result<Self> {
        let id = manifest.channel;
        let Some(dir) = dir else {
            let read = |kind: StreamKind| -> Result<KeyStream> {
                let path = bundle.join(kind.key_file());
                let bytes = std::fs::read(&path).map_err(|e| KeyStoreError::storage(&path, e))?;
                Ok(KeyStream::from_bytes(kind, bytes))
            };
            return Ok(Self::from_streams(
                id,
                read(StreamKind::IdOut)?,
                read(StreamKind::IdIn)?,
                read(StreamKind::PayloadOut)?,
                read(StreamKind::PayloadIn)?,
            ));
        };

        make_pack_dir(dir, id)?;
        let copied = StreamKind::ALL.iter().try_for_each(|kind| {
            fs::copy_private_file(&bundle.join(kind.key_file()), &dir.join(kind.key_file()))
        });
        if let Err(err) = copied {
            let _ = std::fs::remove_dir_all(dir);
            return Err(err);
        }

        info!(channel = %id, ?bundle, "imported key pack");
        Self::open(dir, id)
    }

    /// Write a bundle for the other party into `dest`.
    pub(crate) fn export(&self, dest: &Path) -> Result<()> {
        fs::create_private_dir_all(dest)?;
        for kind in StreamKind::ALL {
            self.stream(kind.mirror()).write_to(&dest.join(kind.key_file()))?;
        }
        BundleManifest::new(self.id).write(dest)?;
        info!(channel = %self.id, ?dest, "exported key bundle");
        Ok(())
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// On-disk directory, if the pack is file-backed.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn id_out(&self) -> &KeyStream {
        &self.id_out
    }

    pub fn id_in(&self) -> &KeyStream {
        &self.id_in
    }

    pub fn payload_out(&self) -> &KeyStream {
        &self.payload_out
    }

    pub fn payload_in(&self) -> &KeyStream {
        &self.payload_in
    }

    pub fn stream(&self, kind: StreamKind) -> &KeyStream {
        match kind {
            StreamKind::IdOut => &self.id_out,
            StreamKind::IdIn => &self.id_in,
            StreamKind::PayloadOut => &self.payload_out,
            StreamKind::PayloadIn => &self.payload_in,
        }
    }

    /// Copy of the pack with the same material, for embedding the peer side
    /// of an in-memory channel.
    pub fn mirrored(&self) -> Result<Self> {
        let mirror = |kind: StreamKind| -> Result<KeyStream> {
            Ok(KeyStream::from_bytes(kind, self.stream(kind.mirror()).to_bytes()?))
        };
        Ok(Self::from_streams(
            self.id,
            mirror(StreamKind::IdOut)?,
            mirror(StreamKind::IdIn)?,
            mirror(StreamKind::PayloadOut)?,
            mirror(StreamKind::PayloadIn)?,
        ))
    }

    /// Release all four streams. Idempotent.
    pub fn close(&self) {
        for kind in StreamKind::ALL {
            self.stream(kind).close();
        }
    }
}

fn make_pack_dir(dir: &Path, id: ChannelId) -> Result<()> {
    fs::create_private_dir(dir).map_err(|err| {
        if err.kind() == std::io::ErrorKind::AlreadyExists {
            KeyStoreError::AlreadyExists(id)
        } else {
            KeyStoreError::storage(dir, err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pair_is_mirrored() {
        let (ours, theirs) = KeyPack::generate_pair(ChannelId::new_random(), 64);
        for kind in StreamKind::ALL {
            assert_eq!(
                ours.stream(kind).read_at(0, 64).unwrap(),
                theirs.stream(kind.mirror()).read_at(0, 64).unwrap(),
            );
        }
        assert_ne!(
            ours.id_out().read_at(0, 64).unwrap(),
            ours.payload_out().read_at(0, 64).unwrap()
        );
    }

    #[test]
    fn mirrored_copy_matches_generated_peer() {
        let (ours, theirs) = KeyPack::generate_pair(ChannelId::new_random(), 32);
        let copy = ours.mirrored().unwrap();
        for kind in StreamKind::ALL {
            assert_eq!(
                copy.stream(kind).read_at(0, 32).unwrap(),
                theirs.stream(kind).read_at(0, 32).unwrap(),
            );
        }
    }

    #[test]
    fn close_is_idempotent() {
        let (pack, _) = KeyPack::generate_pair(ChannelId::new_random(), 8);
        pack.close();
        pack.close();
        for kind in StreamKind::ALL {
            assert!(pack.stream(kind).is_closed());
        }
    }
}
