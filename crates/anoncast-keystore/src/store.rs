use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::bundle::BundleManifest;
use crate::error::{KeyStoreError, Result};
use crate::fs;
use crate::id::ChannelId;
use crate::pack::KeyPack;
use crate::xor_in_place;

/// Default number of key bytes generated per stream for fresh packs: 16 MiB.
pub const DEFAULT_BUFFER_SIZE: u64 = 16 * 1024 * 1024;

type Registry = HashMap<ChannelId, Arc<KeyPack>>;

/// Registry of key packs, one per channel.
///
/// Registry mutations and the channel recovery scan are serialized by a
/// single lock, so a pack is never removed mid-scan. A file-backed store
/// also holds an exclusive lock on its root until [`KeyStore::close`], so two
/// stores never hand out the same cursors.
#[derive(Debug)]
pub struct KeyStore {
    packs: RwLock<Registry>,
    root: Option<PathBuf>,
    buffer_size: u64,
    root_lock: Mutex<Option<File>>,
}

impl KeyStore {
    /// Open the store rooted at `root`, loading every persisted pack.
    ///
    /// A missing root is created with owner-only permissions. Entries that
    /// fail to load are logged and skipped. Fails with
    /// [`KeyStoreError::Locked`] while another store has `root` open.
    pub fn load(root: impl AsRef<Path>, buffer_size: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_private_dir_all(&root)?;
            info!(?root, "created key store");
        }
        let lock = fs::lock_root(&root)?;

        let store = Self {
            packs: RwLock::new(HashMap::new()),
            root: Some(root.clone()),
            buffer_size,
            root_lock: Mutex::new(Some(lock)),
        };

        let entries = std::fs::read_dir(&root).map_err(|e| KeyStoreError::storage(&root, e))?;
        let mut packs = store.write();
        load_entries(
            &mut packs,
            entries.map(|entry| entry.map(|entry| (entry.file_name(), entry.path()))),
        );
        info!(?root, packs = packs.len(), "loaded key store");
        drop(packs);

        Ok(store)
    }

    /// A store that keeps everything in memory. Fresh packs are generated
    /// with `buffer_size` bytes per stream.
    pub fn in_memory(buffer_size: u64) -> Self {
        Self {
            packs: RwLock::new(HashMap::new()),
            root: None,
            buffer_size,
            root_lock: Mutex::new(None),
        }
    }

    /// Root directory for file-backed stores.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Key bytes generated per stream for fresh packs.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Create and register a pack with fresh random material.
    pub fn add_key_pack(&self, id: ChannelId) -> Result<Arc<KeyPack>> {
        let mut packs = self.write();
        if packs.contains_key(&id) {
            return Err(KeyStoreError::AlreadyExists(id));
        }

        let pack = match &self.root {
            Some(root) => KeyPack::create(&root.join(id.to_string()), id, self.buffer_size)?,
            None => {
                let (ours, _) = KeyPack::generate_pair(id, self.buffer_size as usize);
                ours
            }
        };
        let pack = Arc::new(pack);
        packs.insert(id, Arc::clone(&pack));
        Ok(pack)
    }

    /// Register an already built pack.
    pub fn insert_key_pack(&self, pack: KeyPack) -> Result<Arc<KeyPack>> {
        let mut packs = self.write();
        let id = pack.id();
        if packs.contains_key(&id) {
            return Err(KeyStoreError::AlreadyExists(id));
        }
        let pack = Arc::new(pack);
        packs.insert(id, Arc::clone(&pack));
        Ok(pack)
    }

    /// Unregister and tear down a pack. No-op if absent.
    ///
    /// On-disk material is kept; see [`KeyStore::delete_key_pack`].
    pub fn remove_key_pack(&self, id: ChannelId) {
        if let Some(pack) = self.write().remove(&id) {
            pack.close();
            info!(channel = %id, "removed key pack");
        }
    }

    /// Remove a pack and erase its on-disk directory.
    ///
    /// Returns whether anything was registered under `id`.
    pub fn delete_key_pack(&self, id: ChannelId) -> Result<bool> {
        let Some(pack) = self.write().remove(&id) else {
            return Ok(false);
        };
        pack.close();
        if let Some(dir) = pack.dir() {
            std::fs::remove_dir_all(dir).map_err(|e| KeyStoreError::storage(dir, e))?;
        }
        info!(channel = %id, "deleted key pack");
        Ok(true)
    }

    /// Import the bundle at `source` and register its pack.
    pub fn import_key_pack(&self, source: impl AsRef<Path>) -> Result<Arc<KeyPack>> {
        let source = source.as_ref();
        let manifest = BundleManifest::read(source)?;
        let id = manifest.channel;

        let mut packs = self.write();
        if packs.contains_key(&id) {
            return Err(KeyStoreError::AlreadyExists(id));
        }

        let dir = self.root.as_ref().map(|root| root.join(id.to_string()));
        let pack = Arc::new(KeyPack::import(source, &manifest, dir.as_deref())?);
        packs.insert(id, Arc::clone(&pack));
        Ok(pack)
    }

    /// Write the bundle the peer of channel `id` needs into `dest`.
    pub fn export_key_pack(&self, id: ChannelId, dest: impl AsRef<Path>) -> Result<()> {
        let pack = self.get_key_pack(id).ok_or(KeyStoreError::NotFound(id))?;
        pack.export(dest.as_ref())
    }

    pub fn get_key_pack(&self, id: ChannelId) -> Option<Arc<KeyPack>> {
        self.read().get(&id).cloned()
    }

    /// Registered channel ids, sorted.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Find the channel whose inbound identity key turns `encrypted_id` back
    /// into that channel's own id.
    ///
    /// A sender always encrypts its channel id with the matching outbound
    /// identity key, so only the right candidate decrypts to itself. The scan
    /// is linear in the number of registered channels. Candidates whose key
    /// cannot be read at `id_key_pos` are skipped.
    pub fn try_recover_channel_id(&self, id_key_pos: u64, encrypted_id: &[u8]) -> Option<ChannelId> {
        let mut candidate = vec![0u8; encrypted_id.len()];
        let packs = self.read();
        for (id, pack) in packs.iter() {
            candidate.copy_from_slice(encrypted_id);
            let Ok(key) = pack.id_in().read_at(id_key_pos, encrypted_id.len()) else {
                continue;
            };
            xor_in_place(&mut candidate, &key);
            if candidate.as_slice() == id.as_bytes() {
                return Some(*id);
            }
        }
        None
    }

    /// Tear down every registered pack, empty the registry and release the
    /// root lock.
    pub fn close(&self) {
        let mut packs = self.write();
        for pack in packs.values() {
            pack.close();
        }
        if !packs.is_empty() {
            debug!(packs = packs.len(), "closed key store");
        }
        packs.clear();
        drop(packs);
        self.root_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.packs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.packs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Open every channel-named entry into `packs`. Anything that cannot be
/// read or opened is logged and skipped.
fn load_entries(
    packs: &mut Registry,
    entries: impl IntoIterator<Item = std::io::Result<(OsString, PathBuf)>>,
) {
    for entry in entries {
        let (name, path) = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable key store entry");
                continue;
            }
        };
        let Some(id) = name.to_str().and_then(|name| name.parse::<ChannelId>().ok()) else {
            debug!(entry = ?name, "ignoring non-channel key store entry");
            continue;
        };

        match KeyPack::open(&path, id) {
            Ok(pack) => {
                packs.insert(id, Arc::new(pack));
            }
            Err(err) => warn!(channel = %id, error = %err, "failed to load key pack"),
        }
    }
}
